use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use whey_core::TrackerService;
use whey_core::models::User;

use super::helpers::{fmt_grams, parse_date, parse_opt_date, print_intake_table, print_json};

pub(crate) fn cmd_summary_generate(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let summary = svc.generate_summary(user, date)?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "{}: {}g of {}g",
            summary.summary_date, summary.total_protein_grams, summary.target_protein_grams
        );
    }
    Ok(())
}

pub(crate) fn cmd_summary_range(
    svc: &TrackerService,
    user: &User,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    let report = svc.generate_range(user, start, end)?;

    if json {
        print_json(&report)?;
    } else {
        println!("Reconciled {start} to {end}");
        println!("  Updated:             {}", report.updated);
        println!("  Skipped (no target): {}", report.skipped_no_target);
    }
    Ok(())
}

pub(crate) fn cmd_summary_list(
    svc: &TrackerService,
    user: &User,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct SummaryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Total")]
        total: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Remaining")]
        remaining: String,
    }

    let summaries = svc.list_summaries(user, parse_opt_date(start)?, parse_opt_date(end)?)?;
    if json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        eprintln!("No summaries yet. Set a target and log an intake first.");
        return Ok(());
    }

    let rows: Vec<SummaryRow> = summaries
        .iter()
        .map(|s| SummaryRow {
            date: s.summary_date.to_string(),
            total: format!("{}g", s.total_protein_grams),
            target: format!("{}g", s.target_protein_grams),
            remaining: format!("{}g", s.target_protein_grams - s.total_protein_grams),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_dashboard(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let dashboard = svc.dashboard(user, date)?;

    if json {
        return print_json(&dashboard);
    }

    println!("=== {} ===\n", dashboard.date);
    if dashboard.intakes.is_empty() {
        println!("  No intakes logged");
    } else {
        print_intake_table(&dashboard.intakes);
    }
    println!();
    println!("  TOTAL:     {}g", dashboard.total_protein_grams);
    println!("  TARGET:    {}", fmt_grams(dashboard.target_grams));
    println!("  REMAINING: {}", fmt_grams(dashboard.remaining_grams));
    Ok(())
}
