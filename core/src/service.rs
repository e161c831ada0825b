use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use crate::dashboard::build_dashboard;
use crate::db::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::import::{self, ImportSummary};
use crate::models::{
    Dashboard, DailySummary, DailyTarget, IntakeFilter, IntakeRecord, MAX_RANGE_DAYS, NewIntake,
    NewProteinSource, NewUser, ProteinSource, RangeReport, UpdateIntake, UpdateProteinSource, User,
    validate_category, validate_email, validate_protein_per_100g, validate_quantity,
    validate_range, validate_source_name, validate_username, validate_weight,
};
use crate::reconcile::SummaryReconciler;
use crate::target::TargetCalculator;

/// Entry point for every operation. Intake mutations reconcile the affected
/// summaries in the same transaction.
pub struct TrackerService {
    db: Database,
    calculator: TargetCalculator,
}

impl TrackerService {
    pub fn new(db_path: &Path) -> TrackerResult<Self> {
        Ok(Self::with_database(Database::open(db_path)?))
    }

    pub fn new_in_memory() -> TrackerResult<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self {
            db,
            calculator: TargetCalculator::default(),
        }
    }

    // --- Users ---

    pub fn create_user(&self, username: &str, weight_kg: Option<Decimal>) -> TrackerResult<User> {
        self.register_user(&NewUser {
            username: username.to_string(),
            email: None,
            weight_kg,
        })
    }

    /// Create a user. Username and email are unique, ignoring ASCII case.
    pub fn register_user(&self, user: &NewUser) -> TrackerResult<User> {
        let username = validate_username(&user.username)?;
        let email = user.email.as_deref().map(validate_email).transpose()?;
        let weight_kg = user.weight_kg.map(validate_weight).transpose()?;
        if self.db.find_user_by_username(&username)?.is_some() {
            return Err(TrackerError::validation(
                "username",
                format!("'{username}' is already taken"),
            ));
        }
        if let Some(ref email) = email {
            self.ensure_email_free(email, None)?;
        }
        let user = self.db.insert_user(&NewUser {
            username,
            email,
            weight_kg,
        })?;
        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub fn get_user(&self, username: &str) -> TrackerResult<User> {
        self.db
            .find_user_by_username(username.trim())?
            .ok_or_else(|| TrackerError::not_found(format!("User '{username}' not found")))
    }

    pub fn list_users(&self) -> TrackerResult<Vec<User>> {
        Ok(self.db.list_users()?)
    }

    /// The named user, or the only user when no name is given.
    pub fn resolve_user(&self, username: Option<&str>) -> TrackerResult<User> {
        if let Some(name) = username {
            return self.get_user(name);
        }
        let mut users = self.db.list_users()?;
        match users.len() {
            0 => Err(TrackerError::Precondition(
                "No users yet. Create one with `whey user add <name>`".to_string(),
            )),
            1 => Ok(users.remove(0)),
            _ => Err(TrackerError::validation(
                "user",
                "several users exist; pass --user or set WHEY_USER",
            )),
        }
    }

    pub fn set_weight(&self, user: &User, weight_kg: Decimal) -> TrackerResult<User> {
        let weight_kg = validate_weight(weight_kg)?;
        Ok(self.db.set_user_weight(user.id, weight_kg)?)
    }

    pub fn set_email(&self, user: &User, email: &str) -> TrackerResult<User> {
        let email = validate_email(email)?;
        self.ensure_email_free(&email, Some(user.id))?;
        Ok(self.db.set_user_email(user.id, &email)?)
    }

    fn ensure_email_free(&self, email: &str, except_id: Option<i64>) -> TrackerResult<()> {
        match self.db.find_user_by_email(email)? {
            Some(found) if Some(found.id) != except_id => Err(TrackerError::validation(
                "email",
                format!("'{email}' is already registered"),
            )),
            _ => Ok(()),
        }
    }

    pub fn set_token_hash(&self, user: &User, token_hash: &str) -> TrackerResult<()> {
        Ok(self.db.set_user_token_hash(user.id, token_hash)?)
    }

    pub fn user_for_token_hash(&self, token_hash: &str) -> TrackerResult<Option<User>> {
        Ok(self.db.find_user_by_token_hash(token_hash)?)
    }

    // --- Protein sources ---

    pub fn create_source(&self, source: &NewProteinSource) -> TrackerResult<ProteinSource> {
        let source = NewProteinSource {
            name: validate_source_name(&source.name)?,
            protein_per_100g: validate_protein_per_100g(source.protein_per_100g)?,
            category: validate_category(&source.category)?,
        };
        self.ensure_source_name_free(&source.name, None)?;
        Ok(self.db.insert_source(&source)?)
    }

    pub fn get_source(&self, id: i64) -> TrackerResult<ProteinSource> {
        self.db
            .get_source(id)?
            .ok_or_else(|| TrackerError::not_found(format!("Source {id} not found")))
    }

    pub fn find_source(&self, name: &str) -> TrackerResult<ProteinSource> {
        self.db
            .find_source_by_name(name)?
            .ok_or_else(|| TrackerError::not_found(format!("Source '{name}' not found")))
    }

    pub fn list_sources(&self, search: Option<&str>) -> TrackerResult<Vec<ProteinSource>> {
        Ok(self.db.list_sources(search)?)
    }

    pub fn update_source(
        &self,
        id: i64,
        update: &UpdateProteinSource,
    ) -> TrackerResult<ProteinSource> {
        let existing = self.get_source(id)?;
        let update = UpdateProteinSource {
            name: update.name.as_deref().map(validate_source_name).transpose()?,
            protein_per_100g: update
                .protein_per_100g
                .map(validate_protein_per_100g)
                .transpose()?,
            category: update.category.as_deref().map(validate_category).transpose()?,
        };
        if let Some(ref name) = update.name {
            self.ensure_source_name_free(name, Some(existing.id))?;
        }
        Ok(self.db.update_source(id, &update)?)
    }

    /// Deletes the source and its intakes, then reconciles every (user, date)
    /// those intakes touched.
    pub fn delete_source(&self, id: i64) -> TrackerResult<()> {
        self.get_source(id)?;
        self.db.in_transaction(|db| -> TrackerResult<()> {
            let affected = db.affected_user_dates_for_source(id)?;
            db.delete_source(id)?;
            let reconciler = SummaryReconciler::new(db);
            for (user_id, date) in &affected {
                reconciler.reconcile(*user_id, *date)?;
            }
            info!(source_id = id, reconciled = affected.len(), "source deleted");
            Ok(())
        })
    }

    fn ensure_source_name_free(&self, name: &str, except_id: Option<i64>) -> TrackerResult<()> {
        match self.db.find_source_by_name(name)? {
            Some(found) if Some(found.id) != except_id => Err(TrackerError::validation(
                "name",
                format!("a source named '{}' already exists", found.name),
            )),
            _ => Ok(()),
        }
    }

    // --- Intakes ---

    pub fn log_intake(&self, user: &User, intake: &NewIntake) -> TrackerResult<IntakeRecord> {
        let intake = NewIntake {
            quantity_grams: validate_quantity(intake.quantity_grams)?,
            ..intake.clone()
        };
        self.ensure_source_exists(intake.source_id)?;
        self.db.in_transaction(|db| -> TrackerResult<_> {
            let record = db.insert_intake(user.id, &intake)?;
            SummaryReconciler::new(db).reconcile(user.id, record.intake_date)?;
            Ok(record)
        })
    }

    /// An intake owned by `user`. Other users' intakes read as not found.
    pub fn get_intake(&self, user: &User, id: i64) -> TrackerResult<IntakeRecord> {
        self.db
            .get_intake(id)?
            .filter(|i| i.user_id == user.id)
            .ok_or_else(|| TrackerError::not_found(format!("Intake {id} not found")))
    }

    pub fn list_intakes(
        &self,
        user: &User,
        filter: &IntakeFilter,
    ) -> TrackerResult<Vec<IntakeRecord>> {
        filter.validate()?;
        Ok(self.db.list_intakes(user.id, filter)?)
    }

    /// Reconciles both the old and the new date when the date moves.
    pub fn update_intake(
        &self,
        user: &User,
        id: i64,
        update: &UpdateIntake,
    ) -> TrackerResult<IntakeRecord> {
        let existing = self.get_intake(user, id)?;
        let update = UpdateIntake {
            quantity_grams: update.quantity_grams.map(validate_quantity).transpose()?,
            ..update.clone()
        };
        if let Some(source_id) = update.source_id {
            self.ensure_source_exists(source_id)?;
        }
        if update.is_empty() {
            return Ok(existing);
        }
        self.db.in_transaction(|db| -> TrackerResult<_> {
            let record = db.update_intake(id, &update)?;
            SummaryReconciler::new(db)
                .reconcile_dates(user.id, [existing.intake_date, record.intake_date])?;
            Ok(record)
        })
    }

    pub fn delete_intake(&self, user: &User, id: i64) -> TrackerResult<()> {
        let existing = self.get_intake(user, id)?;
        self.db.in_transaction(|db| -> TrackerResult<()> {
            db.delete_intake(id)?;
            SummaryReconciler::new(db).reconcile(user.id, existing.intake_date)?;
            Ok(())
        })
    }

    fn ensure_source_exists(&self, source_id: i64) -> TrackerResult<()> {
        if self.db.get_source(source_id)?.is_none() {
            return Err(TrackerError::validation(
                "source_id",
                format!("unknown source {source_id}"),
            ));
        }
        Ok(())
    }

    // --- Targets ---

    /// Compute a target from the user's current weight, replacing any
    /// existing target for that date, and refresh the date's summary.
    pub fn set_target(&self, user: &User, date: NaiveDate) -> TrackerResult<DailyTarget> {
        // Re-read so a weight set since `user` was loaded is honored
        let current = self
            .db
            .get_user(user.id)?
            .ok_or_else(|| TrackerError::not_found(format!("User '{}' not found", user.username)))?;
        let grams = self.calculator.compute(current.weight_kg)?;
        let method = self.calculator.formula().label();
        let target = self.db.in_transaction(|db| -> TrackerResult<_> {
            let target = db.replace_target(user.id, date, grams, method)?;
            SummaryReconciler::new(db).reconcile(user.id, date)?;
            Ok(target)
        })?;
        info!(user_id = user.id, %date, grams = %target.target_grams, "target set");
        Ok(target)
    }

    pub fn get_target(&self, user: &User, date: NaiveDate) -> TrackerResult<DailyTarget> {
        self.db
            .get_target(user.id, date)?
            .ok_or_else(|| TrackerError::not_found(format!("No target for {date}")))
    }

    pub fn list_targets(
        &self,
        user: &User,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> TrackerResult<Vec<DailyTarget>> {
        validate_range(start, end)?;
        Ok(self.db.list_targets(user.id, start, end)?)
    }

    /// Deletes the target and the summary derived from it.
    pub fn delete_target(&self, user: &User, date: NaiveDate) -> TrackerResult<()> {
        if !self.db.delete_target(user.id, date)? {
            return Err(TrackerError::not_found(format!("No target for {date}")));
        }
        Ok(())
    }

    // --- Summaries ---

    pub fn generate_summary(&self, user: &User, date: NaiveDate) -> TrackerResult<DailySummary> {
        SummaryReconciler::new(&self.db)
            .reconcile(user.id, date)?
            .ok_or_else(|| TrackerError::not_found(format!("No target for {date}")))
    }

    pub fn generate_range(
        &self,
        user: &User,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TrackerResult<RangeReport> {
        validate_range(Some(start), Some(end))?;
        if (end - start).num_days() >= MAX_RANGE_DAYS {
            return Err(TrackerError::validation(
                "end",
                format!("range may span at most {MAX_RANGE_DAYS} days"),
            ));
        }
        SummaryReconciler::new(&self.db).reconcile_range(user.id, start, end)
    }

    pub fn list_summaries(
        &self,
        user: &User,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> TrackerResult<Vec<DailySummary>> {
        validate_range(start, end)?;
        Ok(self.db.list_summaries(user.id, start, end)?)
    }

    pub fn dashboard(&self, user: &User, date: NaiveDate) -> TrackerResult<Dashboard> {
        build_dashboard(&self.db, user.id, date)
    }

    // --- Import ---

    pub fn import_intakes_csv(
        &self,
        user: &User,
        csv_data: &str,
        dry_run: bool,
    ) -> TrackerResult<ImportSummary> {
        let rows = import::parse_intake_csv(csv_data.as_bytes())?;
        import::import_intakes(&self.db, user, &rows, dry_run)
    }
}
