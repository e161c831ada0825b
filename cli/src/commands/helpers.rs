use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use whey_core::models::{IntakeRecord, ProteinSource, parse_decimal};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Like [`parse_date`], but an absent value stays absent.
pub(crate) fn parse_opt_date(date_str: Option<String>) -> Result<Option<NaiveDate>> {
    date_str.map(|s| parse_date(Some(s))).transpose()
}

/// Parse a gram amount like "25", "25.5" or "25g". Range checks happen in the core.
pub(crate) fn parse_grams(field: &str, s: &str) -> Result<Decimal> {
    let trimmed = s.trim().trim_end_matches('g').trim();
    Ok(parse_decimal(field, trimmed)?)
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn fmt_grams(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}g"))
}

pub(crate) fn print_source_table(sources: &[ProteinSource]) {
    #[derive(Tabled)]
    struct SourceRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "P/100g")]
        protein: String,
    }

    let rows: Vec<SourceRow> = sources
        .iter()
        .map(|s| SourceRow {
            id: s.id,
            name: truncate(&s.name, 35),
            category: truncate(&s.category, 20),
            protein: s.protein_per_100g.to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_intake_table(intakes: &[IntakeRecord]) {
    #[derive(Tabled)]
    struct IntakeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Source")]
        source: String,
        #[tabled(rename = "Protein")]
        grams: String,
    }

    let rows: Vec<IntakeRow> = intakes
        .iter()
        .map(|i| IntakeRow {
            id: i.id,
            date: i.intake_date.to_string(),
            source: i
                .source_name
                .as_deref()
                .map_or_else(|| format!("#{}", i.source_id), |n| truncate(n, 35)),
            grams: format!("{}g", i.quantity_grams),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
