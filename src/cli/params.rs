//! `shipline params`

use anyhow::Result;
use serde::Serialize;
use shipline::pipeline::PARAMETER_DEFINITIONS;

#[derive(Debug, Serialize)]
struct ParameterRow {
    name: &'static str,
    domain: String,
    default: String,
    description: &'static str,
}

fn rows() -> Vec<ParameterRow> {
    PARAMETER_DEFINITIONS
        .iter()
        .map(|def| ParameterRow {
            name: def.name(),
            domain: def.domain(),
            default: def.default_value(),
            description: def.description(),
        })
        .collect()
}

/// Prints every declared parameter
pub fn print_parameters(json: bool) -> Result<()> {
    let rows = rows();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in rows {
        let default = if row.default.is_empty() {
            "(empty)"
        } else {
            row.default.as_str()
        };
        println!(
            "{:<18} {:<22} default {:<40} {}",
            row.name, row.domain, default, row.description
        );
    }
    Ok(())
}
