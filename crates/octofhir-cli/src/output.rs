use colored::Colorize;
use octofhir_core::{IndexRow, IndexValue, format_index_instant};
use octofhir_search::SearchResult;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn describe(value: &IndexValue) -> String {
    match value {
        IndexValue::String { value } => value.clone(),
        IndexValue::Token {
            system,
            code,
            display,
        } => {
            let mut s = match system {
                Some(system) => format!("{system}|{code}"),
                None => code.clone(),
            };
            if let Some(display) = display {
                s.push_str(&format!(" ({display})"));
            }
            s
        }
        IndexValue::Reference { reference, raw } if reference == raw => reference.clone(),
        IndexValue::Reference { reference, raw } => format!("{reference} <- {raw}"),
        IndexValue::Date { instant } => format_index_instant(*instant),
        IndexValue::Number { value } => value.to_string(),
    }
}

pub fn print_rows(rows: &[IndexRow]) {
    if rows.is_empty() {
        println!("No index rows.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Parameter", "Type", "Value"]);
    for row in rows {
        builder.push_record([
            row.param_name.clone(),
            row.param_type().to_string(),
            describe(&row.value),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

pub fn print_result(resource_type: &str, result: &SearchResult) {
    if result.rows.is_empty() {
        println!("No resources found.");
    } else {
        let mut builder = Builder::default();
        builder.push_record(["Resource"]);
        for id in &result.rows {
            builder.push_record([format!("{resource_type}/{id}")]);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }
    println!("Total: {}", result.total);

    if !result.included.is_empty() {
        println!("{}", "Included:".cyan());
        for key in &result.included {
            println!("  {key}");
        }
    }
    for warning in &result.warnings {
        print_warning(warning);
    }
}
