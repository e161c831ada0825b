//! Keeps `daily_summaries` consistent with intakes and targets.
//!
//! A summary row for (user, date) exists only if a target existed at the
//! time of the last reconcile. Reconciling never creates a target and never
//! touches a summary row for a day without one.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::TrackerResult;
use crate::models::{
    DailySummary, DailyTarget, IntakeFilter, IntakeRecord, RangeReport, two_places, validate_range,
};

/// Storage the reconciler reads from and writes to.
pub trait SummaryStore {
    fn list_intakes(
        &self,
        user_id: i64,
        filter: &IntakeFilter,
    ) -> anyhow::Result<Vec<IntakeRecord>>;

    fn get_target(&self, user_id: i64, date: NaiveDate) -> anyhow::Result<Option<DailyTarget>>;

    fn get_summary(&self, user_id: i64, date: NaiveDate) -> anyhow::Result<Option<DailySummary>>;

    /// Insert or update the (user, date) summary. Implementations must leave
    /// the row (including `updated_at`) untouched when both values match.
    fn upsert_summary(
        &self,
        user_id: i64,
        date: NaiveDate,
        total_grams: Decimal,
        target_grams: Decimal,
    ) -> anyhow::Result<DailySummary>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created(DailySummary),
    Updated(DailySummary),
    Unchanged(DailySummary),
    NoTarget,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
            Self::NoTarget => "no_target",
        }
    }

    #[must_use]
    pub fn into_summary(self) -> Option<DailySummary> {
        match self {
            Self::Created(s) | Self::Updated(s) | Self::Unchanged(s) => Some(s),
            Self::NoTarget => None,
        }
    }
}

pub struct SummaryReconciler<'a, S: SummaryStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SummaryStore + ?Sized> SummaryReconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Sum of the user's intake quantities on `date`, 0.00 when there are none.
    pub fn total_for(&self, user_id: i64, date: NaiveDate) -> TrackerResult<Decimal> {
        let intakes = self.store.list_intakes(user_id, &IntakeFilter::on(date))?;
        Ok(two_places(
            intakes.iter().map(|i| i.quantity_grams).sum::<Decimal>(),
        ))
    }

    pub fn reconcile(&self, user_id: i64, date: NaiveDate) -> TrackerResult<Option<DailySummary>> {
        Ok(self.reconcile_with_outcome(user_id, date)?.into_summary())
    }

    pub fn reconcile_with_outcome(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> TrackerResult<ReconcileOutcome> {
        let total = self.total_for(user_id, date)?;

        let Some(target) = self.store.get_target(user_id, date)? else {
            debug!(user_id, %date, %total, "no target, summary left untouched");
            return Ok(ReconcileOutcome::NoTarget);
        };

        let previous = self.store.get_summary(user_id, date)?;
        let summary = self
            .store
            .upsert_summary(user_id, date, total, target.target_grams)?;

        let outcome = match previous {
            None => ReconcileOutcome::Created(summary),
            Some(prev)
                if prev.total_protein_grams == total
                    && prev.target_protein_grams == target.target_grams =>
            {
                ReconcileOutcome::Unchanged(summary)
            }
            Some(_) => ReconcileOutcome::Updated(summary),
        };
        debug!(
            user_id,
            %date,
            %total,
            target = %target.target_grams,
            outcome = outcome.label(),
            "summary reconciled"
        );
        Ok(outcome)
    }

    /// Reconcile each distinct date once, in ascending order.
    pub fn reconcile_dates<I>(&self, user_id: i64, dates: I) -> TrackerResult<()>
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        for date in unique {
            self.reconcile(user_id, date)?;
        }
        Ok(())
    }

    /// Reconcile every day in `start..=end`. Days already written stay
    /// written if a later day fails.
    pub fn reconcile_range(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TrackerResult<RangeReport> {
        validate_range(Some(start), Some(end))?;

        let mut report = RangeReport::default();
        for date in start.iter_days().take_while(|d| *d <= end) {
            match self.reconcile_with_outcome(user_id, date)? {
                ReconcileOutcome::NoTarget => report.skipped_no_target += 1,
                _ => report.updated += 1,
            }
        }
        info!(
            user_id,
            %start,
            %end,
            updated = report.updated,
            skipped_no_target = report.skipped_no_target,
            "range reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};
    use std::str::FromStr;

    use super::*;
    use crate::error::TrackerError;

    /// In-memory store with a logical clock for timestamps.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub intakes: RefCell<Vec<IntakeRecord>>,
        pub targets: RefCell<Vec<DailyTarget>>,
        pub summaries: RefCell<Vec<DailySummary>>,
        clock: Cell<u32>,
        pub fail_target_on: Cell<Option<NaiveDate>>,
    }

    impl MemoryStore {
        fn tick(&self) -> String {
            self.clock.set(self.clock.get() + 1);
            format!("t{}", self.clock.get())
        }

        pub fn add_intake(&self, user_id: i64, date: NaiveDate, grams: &str) -> i64 {
            let mut intakes = self.intakes.borrow_mut();
            let id = intakes.len() as i64 + 1;
            intakes.push(IntakeRecord {
                id,
                uuid: format!("intake-{id}"),
                user_id,
                source_id: 1,
                quantity_grams: d(grams),
                intake_date: date,
                created_at: String::new(),
                updated_at: String::new(),
                source_name: None,
            });
            id
        }

        pub fn add_target(&self, user_id: i64, date: NaiveDate, grams: &str) {
            let mut targets = self.targets.borrow_mut();
            let id = targets.len() as i64 + 1;
            targets.push(DailyTarget {
                id,
                user_id,
                target_date: date,
                target_grams: d(grams),
                calculation_method: "weight * 0.8".to_string(),
                created_at: String::new(),
            });
        }

        pub fn summary(&self, user_id: i64, date: NaiveDate) -> Option<DailySummary> {
            self.get_summary(user_id, date).unwrap()
        }
    }

    impl SummaryStore for MemoryStore {
        fn list_intakes(
            &self,
            user_id: i64,
            filter: &IntakeFilter,
        ) -> anyhow::Result<Vec<IntakeRecord>> {
            Ok(self
                .intakes
                .borrow()
                .iter()
                .filter(|i| i.user_id == user_id && filter.matches(i.intake_date))
                .cloned()
                .collect())
        }

        fn get_target(&self, user_id: i64, date: NaiveDate) -> anyhow::Result<Option<DailyTarget>> {
            if self.fail_target_on.get() == Some(date) {
                anyhow::bail!("target lookup failed");
            }
            Ok(self
                .targets
                .borrow()
                .iter()
                .find(|t| t.user_id == user_id && t.target_date == date)
                .cloned())
        }

        fn get_summary(
            &self,
            user_id: i64,
            date: NaiveDate,
        ) -> anyhow::Result<Option<DailySummary>> {
            Ok(self
                .summaries
                .borrow()
                .iter()
                .find(|s| s.user_id == user_id && s.summary_date == date)
                .cloned())
        }

        fn upsert_summary(
            &self,
            user_id: i64,
            date: NaiveDate,
            total_grams: Decimal,
            target_grams: Decimal,
        ) -> anyhow::Result<DailySummary> {
            let now = self.tick();
            let mut summaries = self.summaries.borrow_mut();
            if let Some(existing) = summaries
                .iter_mut()
                .find(|s| s.user_id == user_id && s.summary_date == date)
            {
                if existing.total_protein_grams != total_grams
                    || existing.target_protein_grams != target_grams
                {
                    existing.total_protein_grams = total_grams;
                    existing.target_protein_grams = target_grams;
                    existing.updated_at = now;
                }
                return Ok(existing.clone());
            }
            let summary = DailySummary {
                id: summaries.len() as i64 + 1,
                user_id,
                summary_date: date,
                total_protein_grams: total_grams,
                target_protein_grams: target_grams,
                created_at: now.clone(),
                updated_at: now,
            };
            summaries.push(summary.clone());
            Ok(summary)
        }
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_reconcile_without_target_is_absent() {
        let store = MemoryStore::default();
        store.add_intake(1, date("2026-02-20"), "10");

        let result = SummaryReconciler::new(&store)
            .reconcile(1, date("2026-02-20"))
            .unwrap();
        assert!(result.is_none());
        assert!(store.summaries.borrow().is_empty());
    }

    #[test]
    fn test_reconcile_sums_only_that_user_and_day() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10.25");
        store.add_intake(1, date("2026-02-20"), "4.75");
        store.add_intake(1, date("2026-02-21"), "99");
        store.add_intake(2, date("2026-02-20"), "50");

        let summary = SummaryReconciler::new(&store)
            .reconcile(1, date("2026-02-20"))
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_protein_grams.to_string(), "15.00");
        assert_eq!(summary.target_protein_grams.to_string(), "56.00");
    }

    #[test]
    fn test_reconcile_with_no_intakes_writes_zero() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");

        let summary = SummaryReconciler::new(&store)
            .reconcile(1, date("2026-02-20"))
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_protein_grams.to_string(), "0.00");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10");
        let reconciler = SummaryReconciler::new(&store);

        let first = reconciler
            .reconcile_with_outcome(1, date("2026-02-20"))
            .unwrap();
        assert_eq!(first.label(), "created");
        let second = reconciler
            .reconcile_with_outcome(1, date("2026-02-20"))
            .unwrap();
        assert_eq!(second.label(), "unchanged");

        assert_eq!(first.into_summary(), second.into_summary());
        assert_eq!(store.summaries.borrow().len(), 1);
    }

    #[test]
    fn test_reconcile_updates_when_total_changes() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10");
        let reconciler = SummaryReconciler::new(&store);
        let before = reconciler.reconcile(1, date("2026-02-20")).unwrap().unwrap();

        store.add_intake(1, date("2026-02-20"), "5");
        let outcome = reconciler
            .reconcile_with_outcome(1, date("2026-02-20"))
            .unwrap();
        assert_eq!(outcome.label(), "updated");
        let after = outcome.into_summary().unwrap();
        assert_eq!(after.total_protein_grams.to_string(), "15.00");
        assert_eq!(after.created_at, before.created_at);
        assert_ne!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_reconcile_dates_dedupes() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        let reconciler = SummaryReconciler::new(&store);
        reconciler
            .reconcile_dates(1, [date("2026-02-20"), date("2026-02-20"), date("2026-02-19")])
            .unwrap();
        assert_eq!(store.summaries.borrow().len(), 1);
        // One write, one clock tick
        assert_eq!(store.summary(1, date("2026-02-20")).unwrap().updated_at, "t1");
    }

    #[test]
    fn test_range_rejects_start_after_end() {
        let store = MemoryStore::default();
        let err = SummaryReconciler::new(&store)
            .reconcile_range(1, date("2026-02-21"), date("2026-02-20"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation { .. }));
        assert_eq!(err.field(), Some("start"));
    }

    #[test]
    fn test_range_tallies_updated_and_skipped() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-02"), "56.00");
        store.add_target(1, date("2026-02-04"), "56.00");
        store.add_intake(1, date("2026-02-02"), "12");

        let report = SummaryReconciler::new(&store)
            .reconcile_range(1, date("2026-02-01"), date("2026-02-05"))
            .unwrap();
        assert_eq!(
            report,
            RangeReport {
                updated: 2,
                skipped_no_target: 3,
            }
        );
    }

    #[test]
    fn test_single_day_range_matches_reconcile() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10");
        let reconciler = SummaryReconciler::new(&store);

        let report = reconciler
            .reconcile_range(1, date("2026-02-20"), date("2026-02-20"))
            .unwrap();
        assert_eq!(report.updated, 1);
        let via_range = store.summary(1, date("2026-02-20")).unwrap();
        let via_single = reconciler.reconcile(1, date("2026-02-20")).unwrap().unwrap();
        assert_eq!(via_range, via_single);
    }

    #[test]
    fn test_range_keeps_earlier_days_on_failure() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-01"), "56.00");
        store.add_target(1, date("2026-02-03"), "56.00");
        store.fail_target_on.set(Some(date("2026-02-02")));

        let result = SummaryReconciler::new(&store).reconcile_range(
            1,
            date("2026-02-01"),
            date("2026-02-03"),
        );
        assert!(matches!(result, Err(TrackerError::Storage(_))));
        assert!(store.summary(1, date("2026-02-01")).is_some());
        assert!(store.summary(1, date("2026-02-03")).is_none());
    }
}
