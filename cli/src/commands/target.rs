use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use whey_core::TrackerService;
use whey_core::models::{DailyTarget, User};

use super::helpers::{parse_date, parse_opt_date, print_json};

fn print_target(target: &DailyTarget) {
    println!(
        "{}: {}g protein ({})",
        target.target_date, target.target_grams, target.calculation_method
    );
}

pub(crate) fn cmd_target_set(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let target = svc.set_target(user, date)?;

    if json {
        print_json(&target)?;
    } else {
        print_target(&target);
    }
    Ok(())
}

pub(crate) fn cmd_target_show(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let target = svc.get_target(user, date)?;

    if json {
        print_json(&target)?;
    } else {
        print_target(&target);
    }
    Ok(())
}

pub(crate) fn cmd_target_list(
    svc: &TrackerService,
    user: &User,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct TargetRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Target")]
        grams: String,
        #[tabled(rename = "Method")]
        method: String,
    }

    let targets = svc.list_targets(user, parse_opt_date(start)?, parse_opt_date(end)?)?;
    if json {
        return print_json(&targets);
    }
    if targets.is_empty() {
        eprintln!("No targets set. Use `whey target set [date]` to set one.");
        return Ok(());
    }

    let rows: Vec<TargetRow> = targets
        .iter()
        .map(|t| TargetRow {
            date: t.target_date.to_string(),
            grams: format!("{}g", t.target_grams),
            method: t.calculation_method.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_target_delete(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    svc.delete_target(user, date)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": date }));
    } else {
        println!("Target for {date} cleared (its summary was removed too)");
    }
    Ok(())
}
