use anyhow::{Result, bail};

use whey_core::TrackerService;
use whey_core::models::{IntakeFilter, NewIntake, UpdateIntake, User};

use super::helpers::{parse_date, parse_grams, parse_opt_date, print_intake_table, print_json};
use super::resolve_source;

pub(crate) fn cmd_log(
    svc: &TrackerService,
    user: &User,
    source_query: &str,
    grams: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let source = resolve_source(svc, source_query)?;
    let intake = NewIntake {
        source_id: source.id,
        quantity_grams: parse_grams("quantity_grams", grams)?,
        intake_date: parse_date(date)?,
    };
    let record = svc.log_intake(user, &intake)?;

    if json {
        print_json(&record)?;
    } else {
        println!(
            "Logged {}g protein from {} on {} (ID: {})",
            record.quantity_grams, source.name, record.intake_date, record.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_update(
    svc: &TrackerService,
    user: &User,
    id: i64,
    grams: Option<&str>,
    date: Option<String>,
    source_query: Option<&str>,
    json: bool,
) -> Result<()> {
    let update = UpdateIntake {
        source_id: source_query
            .map(|q| resolve_source(svc, q).map(|s| s.id))
            .transpose()?,
        quantity_grams: grams.map(|g| parse_grams("quantity_grams", g)).transpose()?,
        intake_date: parse_opt_date(date)?,
    };
    if update.is_empty() {
        bail!("Nothing to update. Pass --grams, --date or --source");
    }

    let record = svc.update_intake(user, id, &update)?;
    if json {
        print_json(&record)?;
    } else {
        println!(
            "Updated intake {}: {}g on {}",
            record.id, record.quantity_grams, record.intake_date
        );
    }
    Ok(())
}

pub(crate) fn cmd_delete(svc: &TrackerService, user: &User, id: i64, json: bool) -> Result<()> {
    svc.delete_intake(user, id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted intake {id}");
    }
    Ok(())
}

pub(crate) fn cmd_intakes(
    svc: &TrackerService,
    user: &User,
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let filter = IntakeFilter {
        date: parse_opt_date(date)?,
        start: parse_opt_date(start)?,
        end: parse_opt_date(end)?,
    };
    let intakes = svc.list_intakes(user, &filter)?;

    if json {
        return print_json(&intakes);
    }
    if intakes.is_empty() {
        eprintln!("No intakes found");
        return Ok(());
    }
    print_intake_table(&intakes);
    Ok(())
}
