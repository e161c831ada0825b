use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::TrackerResult;
use crate::models::{Dashboard, IntakeFilter, two_places};
use crate::reconcile::SummaryStore;

/// Day view for one user. The total comes from the persisted summary when
/// there is one and is summed on the fly otherwise; the target is always live.
pub fn build_dashboard<S: SummaryStore + ?Sized>(
    store: &S,
    user_id: i64,
    date: NaiveDate,
) -> TrackerResult<Dashboard> {
    let intakes = store.list_intakes(user_id, &IntakeFilter::on(date))?;

    let total = match store.get_summary(user_id, date)? {
        Some(summary) => summary.total_protein_grams,
        None => two_places(intakes.iter().map(|i| i.quantity_grams).sum::<Decimal>()),
    };
    let target_grams = store.get_target(user_id, date)?.map(|t| t.target_grams);
    let remaining_grams = target_grams.map(|t| two_places(t - total));

    Ok(Dashboard {
        date,
        target_grams,
        total_protein_grams: total,
        remaining_grams,
        intakes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::SummaryReconciler;
    use crate::reconcile::tests::MemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_dashboard_without_target() {
        let store = MemoryStore::default();
        store.add_intake(1, date("2026-02-20"), "10");
        store.add_intake(1, date("2026-02-20"), "2.5");

        let dash = build_dashboard(&store, 1, date("2026-02-20")).unwrap();
        assert_eq!(dash.total_protein_grams.to_string(), "12.50");
        assert!(dash.target_grams.is_none());
        assert!(dash.remaining_grams.is_none());
        assert_eq!(dash.intakes.len(), 2);

        let json = serde_json::to_value(&dash).unwrap();
        assert!(json["target_grams"].is_null());
        assert!(json["remaining_grams"].is_null());
        assert_eq!(json["date"], "2026-02-20");
    }

    #[test]
    fn test_dashboard_with_target_and_summary() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10");
        SummaryReconciler::new(&store)
            .reconcile(1, date("2026-02-20"))
            .unwrap();

        let dash = build_dashboard(&store, 1, date("2026-02-20")).unwrap();
        let json = serde_json::to_value(&dash).unwrap();
        assert_eq!(json["target_grams"], "56.00");
        assert_eq!(json["total_protein_grams"], "10.00");
        assert_eq!(json["remaining_grams"], "46.00");
    }

    #[test]
    fn test_dashboard_prefers_persisted_total() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "10");
        SummaryReconciler::new(&store)
            .reconcile(1, date("2026-02-20"))
            .unwrap();
        // Intake added behind the reconciler's back
        store.add_intake(1, date("2026-02-20"), "5");

        let dash = build_dashboard(&store, 1, date("2026-02-20")).unwrap();
        assert_eq!(dash.total_protein_grams.to_string(), "10.00");
        assert_eq!(dash.intakes.len(), 2);
    }

    #[test]
    fn test_remaining_goes_negative_when_over_target() {
        let store = MemoryStore::default();
        store.add_target(1, date("2026-02-20"), "56.00");
        store.add_intake(1, date("2026-02-20"), "60");

        let dash = build_dashboard(&store, 1, date("2026-02-20")).unwrap();
        assert_eq!(dash.remaining_grams.unwrap().to_string(), "-4.00");
    }
}
