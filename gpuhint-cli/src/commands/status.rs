use std::path::Path;

use gpuhint::patcher::{self, PatchOptions, SymbolState, SymbolStatus};
use serde::Serialize;

use crate::{app::GlobalOptions, commands::common::load_image, output::print_output};

#[derive(Debug, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded_to: Option<String>,
}

impl From<SymbolStatus> for SymbolReport {
    fn from(status: SymbolStatus) -> Self {
        let (exported, value, forwarded_to) = match status.state {
            SymbolState::Absent => (false, None, None),
            SymbolState::Value(value) => (true, Some(value), None),
            SymbolState::Forwarded(target) => (true, None, Some(target)),
        };
        SymbolReport {
            symbol: status.name,
            exported,
            value,
            forwarded_to,
        }
    }
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let image = load_image(path)?;

    let reports: Vec<SymbolReport> = patcher::query(&image, &PatchOptions::default())?
        .into_iter()
        .map(SymbolReport::from)
        .collect();

    print_output(&reports, opts, |reports| {
        for report in reports {
            match (report.value, &report.forwarded_to) {
                (Some(value), _) => {
                    println!("Module exports {} symbol as 0x{value:08X}", report.symbol);
                }
                (None, Some(target)) => {
                    println!("Module forwards {} symbol to {target}", report.symbol);
                }
                (None, None) => println!("Module doesn't export {} symbol", report.symbol),
            }
        }
    })
}
