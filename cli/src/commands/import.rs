use std::path::Path;

use anyhow::{Context, Result};

use whey_core::TrackerService;
use whey_core::models::User;

use super::helpers::print_json;

pub fn cmd_import(
    svc: &TrackerService,
    user: &User,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let summary = svc.import_intakes_csv(user, &data, dry_run)?;

    if summary.rows_parsed == 0 {
        if json {
            println!(
                "{}",
                serde_json::json!({ "error": "No rows found in CSV file" })
            );
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    if json {
        return print_json(&summary);
    }

    if dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Rows parsed:    {}", summary.rows_parsed);
        println!("  Intakes to log: {}", summary.intakes_logged);
        println!("  Dates spanned:  {}", summary.dates_spanned);
    } else {
        println!("Import complete.\n");
        println!("  Rows parsed:    {}", summary.rows_parsed);
        println!("  Intakes logged: {}", summary.intakes_logged);
        println!("  Dates spanned:  {}", summary.dates_spanned);
        if let Some(report) = summary.reconciled {
            println!(
                "  Summaries:      {} updated, {} without target",
                report.updated, report.skipped_no_target
            );
        }
    }

    Ok(())
}
