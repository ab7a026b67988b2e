use colored::Colorize;
use medcert_cid::CidEntry;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_entries(entries: &[CidEntry], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            println!("{}", entries_table(entries));
            println!("Total: {}", entries.len());
        }
    }
    Ok(())
}

pub fn print_entry(entry: &CidEntry, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entry)?),
        OutputFormat::Table => {
            println!("{} {}", "Code:".cyan(), entry.code.bold());
            println!("{} {}", "Title:".cyan(), entry.title);
            if !entry.description.is_empty() && entry.description != entry.title {
                println!("{} {}", "Description:".cyan(), entry.description);
            }
        }
    }
    Ok(())
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn entries_table(entries: &[CidEntry]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Code", "Title"]);
    for entry in entries {
        let code = if entry.code.is_empty() { "-" } else { entry.code.as_str() };
        builder.push_record([code, entry.title.as_str()]);
    }
    builder.build().with(Style::rounded()).to_string()
}
