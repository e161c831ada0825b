//! Bulk intake import from CSV.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::db::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{DATE_FORMAT, NewIntake, RangeReport, User, parse_decimal, validate_quantity};
use crate::reconcile::SummaryReconciler;

/// A single row parsed from an intake CSV.
#[derive(Debug, Clone)]
pub struct IntakeRow {
    /// 1-based line number in the file, header included.
    pub line: usize,
    pub date: String,
    pub source: String,
    pub grams: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub rows_parsed: usize,
    pub intakes_logged: usize,
    pub dates_spanned: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<RangeReport>,
}

fn row_error(line: usize, message: impl std::fmt::Display) -> TrackerError {
    TrackerError::validation("csv", format!("row {line}: {message}"))
}

/// Parse an intake CSV from any reader.
///
/// Expected header: `Date,Source,Protein (g)`. Column order is free and
/// header matching ignores case. Blank rows are skipped.
pub fn parse_intake_csv<R: Read>(reader: R) -> TrackerResult<Vec<IntakeRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| TrackerError::validation("csv", format!("Failed to read headers: {e}")))?
        .clone();
    let col = |name: &str| -> TrackerResult<usize> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                TrackerError::validation("csv", format!("Missing required column: {name}"))
            })
    };

    let idx_date = col("Date")?;
    let idx_source = col("Source")?;
    let idx_grams = col("Protein (g)")?;

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let record = result.map_err(|e| row_error(line, e))?;

        let field = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();
        let row = IntakeRow {
            line,
            date: field(idx_date),
            source: field(idx_source),
            grams: field(idx_grams),
        };
        if row.date.is_empty() && row.source.is_empty() && row.grams.is_empty() {
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Accepts `YYYY-MM-DD` or `M/D/YYYY`.
fn normalize_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

/// Resolve every row, then insert them all and reconcile the span of
/// imported dates in one transaction. Nothing is written if any row or any
/// reconcile fails, or when `dry_run` is set.
pub fn import_intakes(
    db: &Database,
    user: &User,
    rows: &[IntakeRow],
    dry_run: bool,
) -> TrackerResult<ImportSummary> {
    let mut source_cache: HashMap<String, i64> = HashMap::new();
    let mut intakes = Vec::with_capacity(rows.len());

    for row in rows {
        let intake_date = normalize_date(&row.date).ok_or_else(|| {
            row_error(row.line, format!("cannot parse date '{}'", row.date))
        })?;

        // Same folding as the store's NOCASE collation
        let key = row.source.to_ascii_lowercase();
        let source_id = if let Some(&id) = source_cache.get(&key) {
            id
        } else {
            let source = db
                .find_source_by_name(&row.source)?
                .ok_or_else(|| row_error(row.line, format!("unknown source '{}'", row.source)))?;
            source_cache.insert(key, source.id);
            source.id
        };

        let quantity_grams = parse_decimal("quantity_grams", &row.grams)
            .and_then(validate_quantity)
            .map_err(|e| row_error(row.line, e))?;

        intakes.push(NewIntake {
            source_id,
            quantity_grams,
            intake_date,
        });
    }

    let dates: BTreeSet<NaiveDate> = intakes.iter().map(|i| i.intake_date).collect();
    let mut summary = ImportSummary {
        rows_parsed: rows.len(),
        intakes_logged: intakes.len(),
        dates_spanned: dates.len(),
        dry_run,
        reconciled: None,
    };

    if dry_run {
        return Ok(summary);
    }

    summary.reconciled = db.in_transaction(|db| -> TrackerResult<_> {
        for intake in &intakes {
            db.insert_intake(user.id, intake)?;
        }
        match (dates.first(), dates.last()) {
            (Some(&start), Some(&end)) => SummaryReconciler::new(db)
                .reconcile_range(user.id, start, end)
                .map(Some),
            _ => Ok(None),
        }
    })?;
    info!(
        user_id = user.id,
        intakes = summary.intakes_logged,
        dates = summary.dates_spanned,
        "intakes imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::models::{IntakeFilter, NewProteinSource, NewUser};

    fn setup() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .insert_user(&NewUser {
                username: "u1".to_string(),
                email: None,
                weight_kg: Some(Decimal::from(70)),
            })
            .unwrap();
        for (name, per_100g) in [("Chicken Breast", "31"), ("Egg", "13")] {
            db.insert_source(&NewProteinSource {
                name: name.to_string(),
                protein_per_100g: Decimal::from_str(per_100g).unwrap(),
                category: "meat".to_string(),
            })
            .unwrap();
        }
        (db, user)
    }

    #[test]
    fn test_parse_intake_csv() {
        let csv = "Date,Source,Protein (g)\n2026-02-20,Chicken Breast,31\n\n2/21/2026, egg ,6.5\n";
        let rows = parse_intake_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].source, "egg");
        assert_eq!(rows[1].grams, "6.5");
    }

    #[test]
    fn test_parse_missing_column() {
        let err = parse_intake_csv("Date,Source\n2026-02-20,Egg\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Protein (g)"));
    }

    #[test]
    fn test_normalize_date() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 21);
        assert_eq!(normalize_date("2026-02-21"), expected);
        assert_eq!(normalize_date("2/21/2026"), expected);
        assert_eq!(normalize_date("yesterday"), None);
    }

    #[test]
    fn test_import_reconciles_span() {
        let (db, user) = setup();
        db.replace_target(
            user.id,
            NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            Decimal::from(56),
            "weight * 0.8",
        )
        .unwrap();

        let csv = "Date,Source,Protein (g)\n\
                   2026-02-20,chicken breast,31\n\
                   2026-02-20,Egg,6.5\n\
                   2026-02-22,Egg,13\n";
        let rows = parse_intake_csv(csv.as_bytes()).unwrap();
        let summary = import_intakes(&db, &user, &rows, false).unwrap();

        assert_eq!(summary.rows_parsed, 3);
        assert_eq!(summary.intakes_logged, 3);
        assert_eq!(summary.dates_spanned, 2);
        assert_eq!(
            summary.reconciled,
            Some(RangeReport {
                updated: 1,
                skipped_no_target: 2,
            })
        );
        let day = db
            .get_summary(user.id, NaiveDate::from_ymd_opt(2026, 2, 20).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(day.total_protein_grams.to_string(), "37.50");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (db, user) = setup();
        let rows = parse_intake_csv("Date,Source,Protein (g)\n2026-02-20,Egg,6\n".as_bytes())
            .unwrap();
        let summary = import_intakes(&db, &user, &rows, true).unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.intakes_logged, 1);
        assert!(summary.reconciled.is_none());
        assert!(db.list_intakes(user.id, &IntakeFilter::all()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_source_names_row_and_writes_nothing() {
        let (db, user) = setup();
        let csv = "Date,Source,Protein (g)\n2026-02-20,Egg,6\n2026-02-20,Tofu,10\n";
        let rows = parse_intake_csv(csv.as_bytes()).unwrap();
        let err = import_intakes(&db, &user, &rows, false).unwrap_err();
        assert!(err.to_string().contains("row 3"));
        assert!(err.to_string().contains("Tofu"));
        assert!(db.list_intakes(user.id, &IntakeFilter::all()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_reconcile_rolls_back_intakes() {
        let (db, user) = setup();
        let day = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        db.replace_target(user.id, day, Decimal::from(56), "weight * 0.8")
            .unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER refuse_summary_insert BEFORE INSERT ON daily_summaries
                 BEGIN SELECT RAISE(ABORT, 'summary write refused'); END;
                 CREATE TRIGGER refuse_summary_update BEFORE UPDATE ON daily_summaries
                 BEGIN SELECT RAISE(ABORT, 'summary write refused'); END;",
            )
            .unwrap();

        let rows = parse_intake_csv("Date,Source,Protein (g)\n2026-02-20,Egg,6\n".as_bytes())
            .unwrap();
        assert!(import_intakes(&db, &user, &rows, false).is_err());

        assert!(db.list_intakes(user.id, &IntakeFilter::all()).unwrap().is_empty());
        assert!(db.get_summary(user.id, day).unwrap().is_none());
    }

    #[test]
    fn test_source_match_folds_ascii_case_only() {
        let (db, user) = setup();
        let upper = db
            .insert_source(&NewProteinSource {
                name: "Äpfel".to_string(),
                protein_per_100g: Decimal::from(1),
                category: "fruit".to_string(),
            })
            .unwrap();
        let lower = db
            .insert_source(&NewProteinSource {
                name: "äpfel".to_string(),
                protein_per_100g: Decimal::from(1),
                category: "fruit".to_string(),
            })
            .unwrap();

        let csv = "Date,Source,Protein (g)\n2026-02-20,Äpfel,1\n2026-02-20,äpfel,2\n";
        let rows = parse_intake_csv(csv.as_bytes()).unwrap();
        import_intakes(&db, &user, &rows, false).unwrap();

        let intakes = db.list_intakes(user.id, &IntakeFilter::all()).unwrap();
        assert_eq!(intakes.len(), 2);
        assert_eq!(intakes[0].source_id, upper.id);
        assert_eq!(intakes[1].source_id, lower.id);
    }

    #[test]
    fn test_bad_quantity_rejected() {
        let (db, user) = setup();
        let rows =
            parse_intake_csv("Date,Source,Protein (g)\n2026-02-20,Egg,0\n".as_bytes()).unwrap();
        let err = import_intakes(&db, &user, &rows, false).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }
}
