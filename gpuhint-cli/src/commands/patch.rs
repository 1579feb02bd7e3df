use std::path::Path;

use anyhow::Context;
use gpuhint::patcher::{self, PatchOptions, PatchOutcome};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_image},
    output::print_output,
};

#[derive(Debug, Serialize)]
struct PatchReport {
    input: String,
    output: String,
    value: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
    added: Vec<String>,
    updated: Vec<String>,
}

/// Set every GPU export of `input` to `value` and write the result to `output`, or back
/// to `input` when no output is given.
pub fn run(
    input: &Path,
    output: Option<&Path>,
    value: u32,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut image = load_image(input)?;
    let options = PatchOptions::default().with_module_name(file_display_name(input));

    let outcome = patcher::apply(&mut image, &options, value)
        .with_context(|| format!("failed to patch {}", input.display()))?;

    let destination = output.unwrap_or(input);
    image
        .write_to_file(destination)
        .with_context(|| format!("failed to write {}", destination.display()))?;

    let (section, added, updated) = match outcome {
        PatchOutcome::Updated { .. } => (None, Vec::new(), options.symbols.clone()),
        PatchOutcome::SectionAdded {
            section,
            added,
            updated,
            ..
        } => (Some(section), added, updated),
    };
    let report = PatchReport {
        input: input.display().to_string(),
        output: destination.display().to_string(),
        value,
        section,
        added,
        updated,
    };

    print_output(&report, opts, |_| {
        if !opts.quiet {
            println!("OK");
        }
    })
}
