use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    DATE_FORMAT, DailySummary, DailyTarget, IntakeFilter, IntakeRecord, NewIntake,
    NewProteinSource, NewUser, ProteinSource, UpdateIntake, UpdateProteinSource, User, two_places,
};
use crate::reconcile::SummaryStore;

const INTAKE_SELECT: &str = "SELECT ir.id, ir.uuid, ir.user_id, ir.source_id, ir.quantity_grams,
        ir.intake_date, ir.created_at, ir.updated_at, ps.name
     FROM intake_records ir
     JOIN protein_sources ps ON ir.source_id = ps.id";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        // Per-connection setting, not persisted in the file
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    weight_kg TEXT,
                    token_hash TEXT UNIQUE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS protein_sources (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    protein_per_100g TEXT NOT NULL,
                    category TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS intake_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    source_id INTEGER NOT NULL REFERENCES protein_sources(id) ON DELETE CASCADE,
                    quantity_grams TEXT NOT NULL,
                    intake_date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS daily_targets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    target_date TEXT NOT NULL,
                    target_grams TEXT NOT NULL,
                    calculation_method TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, target_date)
                );

                CREATE TABLE IF NOT EXISTS daily_summaries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    summary_date TEXT NOT NULL,
                    total_protein_grams TEXT NOT NULL,
                    target_protein_grams TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, summary_date)
                );

                CREATE INDEX IF NOT EXISTS idx_intake_records_user_date
                    ON intake_records(user_id, intake_date);
                CREATE INDEX IF NOT EXISTS idx_intake_records_source
                    ON intake_records(source_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "ALTER TABLE users ADD COLUMN email TEXT;
                CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email
                    ON users(email COLLATE NOCASE);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls back everything `f` wrote.
    pub fn in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| E::from(anyhow::Error::from(e)))?;
        let value = f(self)?;
        tx.commit().map_err(|e| E::from(anyhow::Error::from(e)))?;
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Row mapping helpers ---

    fn decimal_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
        let text: String = row.get(idx)?;
        Decimal::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn date_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
        let text: String = row.get(idx)?;
        NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let weight: Option<String> = row.get(3)?;
        let weight_kg = weight
            .map(|w| Decimal::from_str(&w))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        Ok(User {
            id: row.get(0)?,
            uuid: row.get(1)?,
            username: row.get(2)?,
            weight_kg,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            email: row.get(6)?,
        })
    }

    fn source_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProteinSource> {
        Ok(ProteinSource {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            protein_per_100g: Self::decimal_at(row, 3)?,
            category: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    // Expects the INTAKE_SELECT column order
    fn intake_from_row(row: &rusqlite::Row) -> rusqlite::Result<IntakeRecord> {
        Ok(IntakeRecord {
            id: row.get(0)?,
            uuid: row.get(1)?,
            user_id: row.get(2)?,
            source_id: row.get(3)?,
            quantity_grams: Self::decimal_at(row, 4)?,
            intake_date: Self::date_at(row, 5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            source_name: row.get(8)?,
        })
    }

    fn target_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyTarget> {
        Ok(DailyTarget {
            id: row.get(0)?,
            user_id: row.get(1)?,
            target_date: Self::date_at(row, 2)?,
            target_grams: Self::decimal_at(row, 3)?,
            calculation_method: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailySummary> {
        Ok(DailySummary {
            id: row.get(0)?,
            user_id: row.get(1)?,
            summary_date: Self::date_at(row, 2)?,
            total_protein_grams: Self::decimal_at(row, 3)?,
            target_protein_grams: Self::decimal_at(row, 4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn date_str(date: NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }

    fn decimal_str(value: Decimal) -> String {
        two_places(value).to_string()
    }

    // --- Users ---

    pub fn insert_user(&self, user: &NewUser) -> Result<User> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO users (uuid, username, email, weight_kg, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    uuid,
                    user.username,
                    user.email,
                    user.weight_kg.map(Self::decimal_str),
                    now,
                    now
                ],
            )
            .with_context(|| format!("Failed to create user '{}'", user.username))?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, username, weight_kg, created_at, updated_at, email
             FROM users WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, username, weight_kg, created_at, updated_at, email
             FROM users WHERE username = ?1",
        )?;
        let mut rows = stmt.query(params![username])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, username, weight_kg, created_at, updated_at, email
             FROM users WHERE email = ?1 COLLATE NOCASE",
        )?;
        let mut rows = stmt.query(params![email])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, username, weight_kg, created_at, updated_at, email
             FROM users WHERE token_hash = ?1",
        )?;
        let mut rows = stmt.query(params![token_hash])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, username, weight_kg, created_at, updated_at, email
             FROM users ORDER BY username",
        )?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn set_user_weight(&self, user_id: i64, weight_kg: Decimal) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE users SET weight_kg = ?1, updated_at = ?2 WHERE id = ?3",
            params![Self::decimal_str(weight_kg), now, user_id],
        )?;
        self.get_user(user_id)?.context("User not found")
    }

    pub fn set_user_email(&self, user_id: i64, email: &str) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
                params![email, now, user_id],
            )
            .with_context(|| format!("Failed to set email '{email}'"))?;
        self.get_user(user_id)?.context("User not found")
    }

    pub fn set_user_token_hash(&self, user_id: i64, token_hash: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE users SET token_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![token_hash, now, user_id],
        )?;
        anyhow::ensure!(rows > 0, "User not found");
        Ok(())
    }

    // --- Protein sources ---

    pub fn insert_source(&self, source: &NewProteinSource) -> Result<ProteinSource> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO protein_sources (uuid, name, protein_per_100g, category, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    uuid,
                    source.name,
                    Self::decimal_str(source.protein_per_100g),
                    source.category,
                    now,
                    now,
                ],
            )
            .with_context(|| format!("Failed to create source '{}'", source.name))?;
        let id = self.conn.last_insert_rowid();
        self.get_source(id)?.context("Source not found")
    }

    pub fn get_source(&self, id: i64) -> Result<Option<ProteinSource>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, protein_per_100g, category, created_at, updated_at
             FROM protein_sources WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::source_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn find_source_by_name(&self, name: &str) -> Result<Option<ProteinSource>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, protein_per_100g, category, created_at, updated_at
             FROM protein_sources WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name.trim()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::source_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_sources(&self, search: Option<&str>) -> Result<Vec<ProteinSource>> {
        let pattern = search.map(|query| {
            let escaped = query
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        });
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, name, protein_per_100g, category, created_at, updated_at
             FROM protein_sources
             WHERE ?1 IS NULL OR name LIKE ?1 ESCAPE '\\' OR category LIKE ?1 ESCAPE '\\'
             ORDER BY name",
        )?;
        let sources = stmt
            .query_map(params![pattern], Self::source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    pub fn update_source(&self, id: i64, update: &UpdateProteinSource) -> Result<ProteinSource> {
        self.get_source(id)?.context("Source not found")?;

        let now = Local::now().to_rfc3339();
        if let Some(ref name) = update.name {
            self.conn.execute(
                "UPDATE protein_sources SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now, id],
            )?;
        }
        if let Some(per_100g) = update.protein_per_100g {
            self.conn.execute(
                "UPDATE protein_sources SET protein_per_100g = ?1, updated_at = ?2 WHERE id = ?3",
                params![Self::decimal_str(per_100g), now, id],
            )?;
        }
        if let Some(ref category) = update.category {
            self.conn.execute(
                "UPDATE protein_sources SET category = ?1, updated_at = ?2 WHERE id = ?3",
                params![category, now, id],
            )?;
        }

        self.get_source(id)?.context("Source not found")
    }

    pub fn delete_source(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM protein_sources WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Every (user, date) with at least one intake of this source.
    pub fn affected_user_dates_for_source(&self, source_id: i64) -> Result<Vec<(i64, NaiveDate)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT user_id, intake_date FROM intake_records
             WHERE source_id = ?1
             ORDER BY user_id, intake_date",
        )?;
        let pairs = stmt
            .query_map(params![source_id], |row| {
                Ok((row.get(0)?, Self::date_at(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    // --- Intake records ---

    pub fn insert_intake(&self, user_id: i64, intake: &NewIntake) -> Result<IntakeRecord> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO intake_records (uuid, user_id, source_id, quantity_grams, intake_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid,
                user_id,
                intake.source_id,
                Self::decimal_str(intake.quantity_grams),
                Self::date_str(intake.intake_date),
                now,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_intake(id)?.context("Intake not found")
    }

    pub fn get_intake(&self, id: i64) -> Result<Option<IntakeRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{INTAKE_SELECT} WHERE ir.id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::intake_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn update_intake(&self, id: i64, update: &UpdateIntake) -> Result<IntakeRecord> {
        self.get_intake(id)?.context("Intake not found")?;

        let now = Local::now().to_rfc3339();
        if let Some(source_id) = update.source_id {
            self.conn.execute(
                "UPDATE intake_records SET source_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![source_id, now, id],
            )?;
        }
        if let Some(quantity) = update.quantity_grams {
            self.conn.execute(
                "UPDATE intake_records SET quantity_grams = ?1, updated_at = ?2 WHERE id = ?3",
                params![Self::decimal_str(quantity), now, id],
            )?;
        }
        if let Some(date) = update.intake_date {
            self.conn.execute(
                "UPDATE intake_records SET intake_date = ?1, updated_at = ?2 WHERE id = ?3",
                params![Self::date_str(date), now, id],
            )?;
        }

        self.get_intake(id)?.context("Intake not found")
    }

    pub fn delete_intake(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM intake_records WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn list_intakes(&self, user_id: i64, filter: &IntakeFilter) -> Result<Vec<IntakeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{INTAKE_SELECT}
             WHERE ir.user_id = ?1
               AND (?2 IS NULL OR ir.intake_date = ?2)
               AND (?3 IS NULL OR ir.intake_date >= ?3)
               AND (?4 IS NULL OR ir.intake_date <= ?4)
             ORDER BY ir.intake_date, ir.id"
        ))?;
        let intakes = stmt
            .query_map(
                params![
                    user_id,
                    filter.date.map(Self::date_str),
                    filter.start.map(Self::date_str),
                    filter.end.map(Self::date_str),
                ],
                Self::intake_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(intakes)
    }

    // --- Targets ---

    /// Store a target for (user, date), replacing any existing one wholesale.
    pub fn replace_target(
        &self,
        user_id: i64,
        date: NaiveDate,
        target_grams: Decimal,
        calculation_method: &str,
    ) -> Result<DailyTarget> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO daily_targets (user_id, target_date, target_grams, calculation_method, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                Self::date_str(date),
                Self::decimal_str(target_grams),
                calculation_method,
                now,
            ],
        )?;
        self.get_target(user_id, date)?.context("Target not found")
    }

    pub fn get_target(&self, user_id: i64, date: NaiveDate) -> Result<Option<DailyTarget>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, target_date, target_grams, calculation_method, created_at
             FROM daily_targets WHERE user_id = ?1 AND target_date = ?2",
        )?;
        let mut rows = stmt.query(params![user_id, Self::date_str(date)])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::target_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_targets(
        &self,
        user_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyTarget>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, target_date, target_grams, calculation_method, created_at
             FROM daily_targets
             WHERE user_id = ?1
               AND (?2 IS NULL OR target_date >= ?2)
               AND (?3 IS NULL OR target_date <= ?3)
             ORDER BY target_date",
        )?;
        let targets = stmt
            .query_map(
                params![user_id, start.map(Self::date_str), end.map(Self::date_str)],
                Self::target_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    /// Delete the target and the summary derived from it.
    pub fn delete_target(&self, user_id: i64, date: NaiveDate) -> Result<bool> {
        self.in_transaction(|db| {
            let date_str = Self::date_str(date);
            let rows = db.conn.execute(
                "DELETE FROM daily_targets WHERE user_id = ?1 AND target_date = ?2",
                params![user_id, date_str],
            )?;
            if rows > 0 {
                let summaries = db.conn.execute(
                    "DELETE FROM daily_summaries WHERE user_id = ?1 AND summary_date = ?2",
                    params![user_id, date_str],
                )?;
                debug!(user_id, %date, summaries, "target deleted");
            }
            Ok(rows > 0)
        })
    }

    // --- Summaries ---

    pub fn get_summary(&self, user_id: i64, date: NaiveDate) -> Result<Option<DailySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, summary_date, total_protein_grams, target_protein_grams, created_at, updated_at
             FROM daily_summaries WHERE user_id = ?1 AND summary_date = ?2",
        )?;
        let mut rows = stmt.query(params![user_id, Self::date_str(date)])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::summary_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Atomic insert-or-update. The row is left alone (including
    /// `updated_at`) when both values already match.
    pub fn upsert_summary(
        &self,
        user_id: i64,
        date: NaiveDate,
        total_grams: Decimal,
        target_grams: Decimal,
    ) -> Result<DailySummary> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO daily_summaries (user_id, summary_date, total_protein_grams, target_protein_grams, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (user_id, summary_date) DO UPDATE SET
                 total_protein_grams = excluded.total_protein_grams,
                 target_protein_grams = excluded.target_protein_grams,
                 updated_at = excluded.updated_at
             WHERE total_protein_grams != excluded.total_protein_grams
                OR target_protein_grams != excluded.target_protein_grams",
            params![
                user_id,
                Self::date_str(date),
                Self::decimal_str(total_grams),
                Self::decimal_str(target_grams),
                now,
            ],
        )?;
        self.get_summary(user_id, date)?.context("Summary not found")
    }

    pub fn list_summaries(
        &self,
        user_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, summary_date, total_protein_grams, target_protein_grams, created_at, updated_at
             FROM daily_summaries
             WHERE user_id = ?1
               AND (?2 IS NULL OR summary_date >= ?2)
               AND (?3 IS NULL OR summary_date <= ?3)
             ORDER BY summary_date",
        )?;
        let summaries = stmt
            .query_map(
                params![user_id, start.map(Self::date_str), end.map(Self::date_str)],
                Self::summary_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }
}

impl SummaryStore for Database {
    fn list_intakes(&self, user_id: i64, filter: &IntakeFilter) -> Result<Vec<IntakeRecord>> {
        Database::list_intakes(self, user_id, filter)
    }

    fn get_target(&self, user_id: i64, date: NaiveDate) -> Result<Option<DailyTarget>> {
        Database::get_target(self, user_id, date)
    }

    fn get_summary(&self, user_id: i64, date: NaiveDate) -> Result<Option<DailySummary>> {
        Database::get_summary(self, user_id, date)
    }

    fn upsert_summary(
        &self,
        user_id: i64,
        date: NaiveDate,
        total_grams: Decimal,
        target_grams: Decimal,
    ) -> Result<DailySummary> {
        Database::upsert_summary(self, user_id, date, total_grams, target_grams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn sample_user(db: &Database) -> User {
        db.insert_user(&NewUser {
            username: "u1".to_string(),
            email: None,
            weight_kg: Some(d("70")),
        })
        .unwrap()
    }

    fn sample_source(db: &Database) -> ProteinSource {
        db.insert_source(&NewProteinSource {
            name: "Chicken Breast".to_string(),
            protein_per_100g: d("31"),
            category: "poultry".to_string(),
        })
        .unwrap()
    }

    fn log(
        db: &Database,
        user: &User,
        source: &ProteinSource,
        on: &str,
        grams: &str,
    ) -> IntakeRecord {
        db.insert_intake(
            user.id,
            &NewIntake {
                source_id: source.id,
                quantity_grams: d(grams),
                intake_date: date(on),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_find_user() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        assert_eq!(user.username, "u1");
        assert_eq!(user.weight_kg.unwrap().to_string(), "70.00");
        assert!(!user.uuid.is_empty());

        let found = db.find_user_by_username("U1").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(db.find_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        sample_user(&db);
        let result = db.insert_user(&NewUser {
            username: "u1".to_string(),
            email: None,
            weight_kg: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_email_unique_ignoring_case() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .insert_user(&NewUser {
                username: "ana".to_string(),
                email: Some("ana@example.com".to_string()),
                weight_kg: None,
            })
            .unwrap();
        let found = db.find_user_by_email("ANA@example.com").unwrap().unwrap();
        assert_eq!(found.id, user.id);

        let dup = db.insert_user(&NewUser {
            username: "bo".to_string(),
            email: Some("Ana@Example.com".to_string()),
            weight_kg: None,
        });
        assert!(dup.is_err());

        // Any number of users may leave it unset
        sample_user(&db);
        let other = db
            .insert_user(&NewUser {
                username: "u2".to_string(),
                email: None,
                weight_kg: None,
            })
            .unwrap();
        assert!(other.email.is_none());
        assert!(db.set_user_email(other.id, "ana@EXAMPLE.com").is_err());
    }

    #[test]
    fn test_token_hash_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        assert!(db.find_user_by_token_hash("abc").unwrap().is_none());
        db.set_user_token_hash(user.id, "abc").unwrap();
        assert_eq!(db.find_user_by_token_hash("abc").unwrap().unwrap().id, user.id);
        assert!(db.set_user_token_hash(9999, "def").is_err());
    }

    #[test]
    fn test_set_user_weight() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        let updated = db.set_user_weight(user.id, d("81.5")).unwrap();
        assert_eq!(updated.weight_kg.unwrap().to_string(), "81.50");
    }

    #[test]
    fn test_source_name_is_case_insensitive_unique() {
        let db = Database::open_in_memory().unwrap();
        let source = sample_source(&db);
        assert_eq!(source.protein_per_100g.to_string(), "31.00");
        assert_eq!(
            db.find_source_by_name("chicken breast").unwrap().unwrap().id,
            source.id
        );
        let dup = db.insert_source(&NewProteinSource {
            name: "CHICKEN BREAST".to_string(),
            protein_per_100g: d("30"),
            category: "poultry".to_string(),
        });
        assert!(dup.is_err());
    }

    #[test]
    fn test_list_sources_search() {
        let db = Database::open_in_memory().unwrap();
        sample_source(&db);
        db.insert_source(&NewProteinSource {
            name: "Salmon".to_string(),
            protein_per_100g: d("20"),
            category: "fish".to_string(),
        })
        .unwrap();

        assert_eq!(db.list_sources(None).unwrap().len(), 2);
        let fish = db.list_sources(Some("fish")).unwrap();
        assert_eq!(fish.len(), 1);
        assert_eq!(fish[0].name, "Salmon");
        assert!(db.list_sources(Some("100%")).unwrap().is_empty());
    }

    #[test]
    fn test_update_source() {
        let db = Database::open_in_memory().unwrap();
        let source = sample_source(&db);
        let updated = db
            .update_source(
                source.id,
                &UpdateProteinSource {
                    protein_per_100g: Some(d("32")),
                    ..UpdateProteinSource::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Chicken Breast");
        assert_eq!(updated.protein_per_100g.to_string(), "32.00");
        assert!(db.update_source(9999, &UpdateProteinSource::default()).is_err());
    }

    #[test]
    fn test_intake_crud() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        let source = sample_source(&db);
        let intake = log(&db, &user, &source, "2026-02-20", "10");

        assert_eq!(intake.quantity_grams.to_string(), "10.00");
        assert_eq!(intake.intake_date, date("2026-02-20"));
        assert_eq!(intake.source_name.as_deref(), Some("Chicken Breast"));

        let updated = db
            .update_intake(
                intake.id,
                &UpdateIntake {
                    quantity_grams: Some(d("12.5")),
                    intake_date: Some(date("2026-02-21")),
                    ..UpdateIntake::default()
                },
            )
            .unwrap();
        assert_eq!(updated.quantity_grams.to_string(), "12.50");
        assert_eq!(updated.intake_date, date("2026-02-21"));

        assert!(db.delete_intake(intake.id).unwrap());
        assert!(!db.delete_intake(intake.id).unwrap());
        assert!(db.get_intake(intake.id).unwrap().is_none());
    }

    #[test]
    fn test_list_intakes_filters() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        let other = db
            .insert_user(&NewUser {
                username: "u2".to_string(),
                email: None,
                weight_kg: None,
            })
            .unwrap();
        let source = sample_source(&db);
        log(&db, &user, &source, "2026-02-19", "1");
        log(&db, &user, &source, "2026-02-20", "2");
        log(&db, &user, &source, "2026-02-21", "3");
        log(&db, &other, &source, "2026-02-20", "4");

        assert_eq!(db.list_intakes(user.id, &IntakeFilter::all()).unwrap().len(), 3);
        let on = db
            .list_intakes(user.id, &IntakeFilter::on(date("2026-02-20")))
            .unwrap();
        assert_eq!(on.len(), 1);
        assert_eq!(on[0].quantity_grams.to_string(), "2.00");

        let from = IntakeFilter {
            start: Some(date("2026-02-20")),
            ..IntakeFilter::default()
        };
        assert_eq!(db.list_intakes(user.id, &from).unwrap().len(), 2);

        let range = IntakeFilter::between(date("2026-02-19"), date("2026-02-20"));
        let listed = db.list_intakes(user.id, &range).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].intake_date <= listed[1].intake_date);
    }

    #[test]
    fn test_source_delete_cascades_to_intakes() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        let source = sample_source(&db);
        log(&db, &user, &source, "2026-02-20", "10");
        log(&db, &user, &source, "2026-02-20", "5");
        log(&db, &user, &source, "2026-02-22", "5");

        let affected = db.affected_user_dates_for_source(source.id).unwrap();
        assert_eq!(
            affected,
            vec![(user.id, date("2026-02-20")), (user.id, date("2026-02-22"))]
        );

        assert!(db.delete_source(source.id).unwrap());
        assert!(db.list_intakes(user.id, &IntakeFilter::all()).unwrap().is_empty());
    }

    #[test]
    fn test_replace_target() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        db.replace_target(user.id, date("2026-02-20"), d("56"), "weight * 0.8")
            .unwrap();
        let replaced = db
            .replace_target(user.id, date("2026-02-20"), d("60"), "weight * 0.8")
            .unwrap();
        assert_eq!(replaced.target_grams.to_string(), "60.00");
        assert_eq!(db.list_targets(user.id, None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_target_removes_summary() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        db.replace_target(user.id, date("2026-02-20"), d("56"), "weight * 0.8")
            .unwrap();
        db.upsert_summary(user.id, date("2026-02-20"), d("10"), d("56"))
            .unwrap();

        assert!(db.delete_target(user.id, date("2026-02-20")).unwrap());
        assert!(db.get_target(user.id, date("2026-02-20")).unwrap().is_none());
        assert!(db.get_summary(user.id, date("2026-02-20")).unwrap().is_none());
        assert!(!db.delete_target(user.id, date("2026-02-20")).unwrap());
    }

    #[test]
    fn test_upsert_summary_keeps_timestamp_when_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        let first = db
            .upsert_summary(user.id, date("2026-02-20"), d("10"), d("56"))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let again = db
            .upsert_summary(user.id, date("2026-02-20"), d("10.00"), d("56.0"))
            .unwrap();
        assert_eq!(first, again);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let changed = db
            .upsert_summary(user.id, date("2026-02-20"), d("15"), d("56"))
            .unwrap();
        assert_eq!(changed.id, first.id);
        assert_eq!(changed.total_protein_grams.to_string(), "15.00");
        assert_ne!(changed.updated_at, first.updated_at);
        assert_eq!(changed.created_at, first.created_at);
    }

    #[test]
    fn test_list_summaries_range() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(&db);
        for day in ["2026-02-19", "2026-02-20", "2026-02-21"] {
            db.upsert_summary(user.id, date(day), d("1"), d("56")).unwrap();
        }
        let listed = db
            .list_summaries(user.id, Some(date("2026-02-20")), None)
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].summary_date, date("2026-02-20"));
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.in_transaction(|db| {
            sample_user(db);
            anyhow::bail!("boom")
        });
        assert!(result.is_err());
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whey.db");
        {
            let db = Database::open(&path).unwrap();
            sample_user(&db);
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 1);
    }
}
