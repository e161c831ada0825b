use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Largest user-entered gram/kilogram value (five digits, two after the point).
pub const MAX_INPUT_AMOUNT: Decimal = Decimal::from_parts(99_999, 0, 0, false, 2);

const MAX_SOURCE_NAME_LEN: usize = 255;
const MAX_CATEGORY_LEN: usize = 50;
const MAX_USERNAME_LEN: usize = 150;
const MAX_EMAIL_LEN: usize = 254;
/// Longest span, in days, that one generate-range request may reconcile.
pub const MAX_RANGE_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub weight_kg: Option<Decimal>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub weight_kg: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProteinSource {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub protein_per_100g: Decimal,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewProteinSource {
    pub name: String,
    pub protein_per_100g: Decimal,
    pub category: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProteinSource {
    pub name: Option<String>,
    pub protein_per_100g: Option<Decimal>,
    pub category: Option<String>,
}

impl UpdateProteinSource {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.protein_per_100g.is_none() && self.category.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeRecord {
    pub id: i64,
    pub uuid: String,
    pub user_id: i64,
    pub source_id: i64,
    pub quantity_grams: Decimal,
    pub intake_date: NaiveDate,
    pub created_at: String,
    pub updated_at: String,
    // Joined for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewIntake {
    pub source_id: i64,
    pub quantity_grams: Decimal,
    pub intake_date: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateIntake {
    pub source_id: Option<i64>,
    pub quantity_grams: Option<Decimal>,
    pub intake_date: Option<NaiveDate>,
}

impl UpdateIntake {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.quantity_grams.is_none() && self.intake_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTarget {
    pub id: i64,
    pub user_id: i64,
    pub target_date: NaiveDate,
    pub target_grams: Decimal,
    pub calculation_method: String,
    pub created_at: String,
}

/// Snapshot of a user's total vs. target for one day, as of the last reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub id: i64,
    pub user_id: i64,
    pub summary_date: NaiveDate,
    pub total_protein_grams: Decimal,
    pub target_protein_grams: Decimal,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub date: NaiveDate,
    pub target_grams: Option<Decimal>,
    pub total_protein_grams: Decimal,
    pub remaining_grams: Option<Decimal>,
    pub intakes: Vec<IntakeRecord>,
}

/// Tally returned by a range reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeReport {
    pub updated: u32,
    pub skipped_no_target: u32,
}

/// Criteria for listing a user's intake records: an exact date, or an
/// inclusive (possibly half-open) range. No criteria lists everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeFilter {
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl IntakeFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            date: None,
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.date.is_some() && (self.start.is_some() || self.end.is_some()) {
            return Err(TrackerError::validation(
                "date",
                "cannot be combined with start/end",
            ));
        }
        validate_range(self.start, self.end)
    }

    #[must_use]
    pub fn matches(&self, date: NaiveDate) -> bool {
        self.date.is_none_or(|d| d == date)
            && self.start.is_none_or(|s| date >= s)
            && self.end.is_none_or(|e| date <= e)
    }
}

/// Round to two places and pin the scale, so values always print as `N.NN`.
#[must_use]
pub fn two_places(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

pub fn parse_date(field: &str, value: &str) -> TrackerResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        TrackerError::validation(field, format!("Invalid date '{value}'. Use YYYY-MM-DD"))
    })
}

pub fn parse_decimal(field: &str, value: &str) -> TrackerResult<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|_| TrackerError::validation(field, format!("'{value}' is not a valid number")))
}

pub fn validate_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> TrackerResult<()> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(TrackerError::validation(
                "start",
                format!("start ({s}) must not be after end ({e})"),
            ));
        }
    }
    Ok(())
}

/// Validate a user-entered amount: positive, at most 999.99, two decimal places.
pub fn validate_amount(field: &str, value: Decimal) -> TrackerResult<Decimal> {
    if value <= Decimal::ZERO {
        return Err(TrackerError::validation(field, "must be greater than 0"));
    }
    if value > MAX_INPUT_AMOUNT {
        return Err(TrackerError::validation(
            field,
            format!("must be at most {MAX_INPUT_AMOUNT}"),
        ));
    }
    if value.normalize().scale() > 2 {
        return Err(TrackerError::validation(
            field,
            "must have no more than 2 decimal places",
        ));
    }
    Ok(two_places(value))
}

pub fn validate_quantity(value: Decimal) -> TrackerResult<Decimal> {
    validate_amount("quantity_grams", value)
}

pub fn validate_weight(value: Decimal) -> TrackerResult<Decimal> {
    validate_amount("weight_kg", value)
}

pub fn validate_protein_per_100g(value: Decimal) -> TrackerResult<Decimal> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(TrackerError::validation(
            "protein_per_100g",
            "must be between 0 and 100",
        ));
    }
    if value.normalize().scale() > 2 {
        return Err(TrackerError::validation(
            "protein_per_100g",
            "must have no more than 2 decimal places",
        ));
    }
    Ok(two_places(value))
}

fn validate_text(field: &str, value: &str, max_len: usize) -> TrackerResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_len {
        return Err(TrackerError::validation(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_source_name(name: &str) -> TrackerResult<String> {
    validate_text("name", name, MAX_SOURCE_NAME_LEN)
}

pub fn validate_category(category: &str) -> TrackerResult<String> {
    validate_text("category", category, MAX_CATEGORY_LEN).map(|c| c.to_lowercase())
}

/// A loose shape check: one `@`, a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> TrackerResult<String> {
    let email = validate_text("email", email, MAX_EMAIL_LEN)?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(TrackerError::validation(
            "email",
            format!("'{email}' is not a valid email address"),
        ));
    }
    Ok(email)
}

pub fn validate_username(username: &str) -> TrackerResult<String> {
    let name = validate_text("username", username, MAX_USERNAME_LEN)?;
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(TrackerError::validation(
            "username",
            "may only contain letters, digits and @/./+/-/_",
        ));
    }
    Ok(name)
}
