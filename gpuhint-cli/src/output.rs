use comfy_table::{presets, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as JSON (if `--json`) or call `display_fn` for human-readable output.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        display_fn(data);
    }
    Ok(())
}

/// Prints borderless columns under `headers`, indented below a heading line.
pub fn print_table(headers: &[&str], rows: impl IntoIterator<Item = Vec<String>>) {
    for line in render_table(headers, rows) {
        println!("{line}");
    }
}

fn render_table(headers: &[&str], rows: impl IntoIterator<Item = Vec<String>>) -> Vec<String> {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING).set_header(headers.to_vec());
    for row in rows {
        table.add_row(row);
    }

    // comfy-table pads every cell by one space, which makes up the rest of the indent
    table
        .to_string()
        .lines()
        .map(|line| format!(" {}", line.trim_end()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table() {
        let lines = render_table(
            &["Name", "RVA"],
            vec![
                vec![".text".to_string(), "0x00001000".to_string()],
                vec![".nvpatch".to_string(), "0x00005000".to_string()],
            ],
        );

        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.starts_with("  ")));
        assert!(lines.iter().all(|line| !line.ends_with(' ')));
        assert!(lines[0].contains("Name") && lines[0].contains("RVA"));

        let column = lines[1].find("0x00001000").unwrap();
        assert_eq!(lines[2].find("0x00005000"), Some(column));
        assert_eq!(lines[0].find("RVA"), Some(column));
    }
}
