use std::sync::{Arc, Mutex};

use super::common::*;

use crate::rewards::domain::{
    ActiveRuleSelection, CardId, RewardRule, RewardStructure, SelectionSource, TransactionContext,
};
use crate::rewards::memory::{InMemoryCardCatalog, InMemorySelectionStore};
use crate::rewards::optimizer::SelectionState;
use crate::rewards::period::{PeriodCursor, PeriodKey, PeriodKind};
use crate::rewards::repository::{RepositoryError, SelectionStore};
use crate::rewards::service::{RewardService, RewardServiceError};

#[test]
fn ranking_reflects_optimized_selection() {
    let (service, _) = build_service(vec![dynamic_card(), dining_card()]);
    let today = date(2025, 6, 10);
    let groceries = TransactionContext::new().category("Groceries");

    let before = service
        .rank_cards_for_transaction(&groceries, today)
        .expect("ranking succeeds");
    assert!(before.results.iter().all(|result| result.rate == 1.0));

    let outcome = service.optimize_dynamic_rewards(&card_id("dynamic"), today);
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.period.as_deref(), Some("2025-M06"));
    assert_eq!(outcome.active_rules.len(), 2);

    let after = service
        .rank_cards_for_transaction(&groceries, today)
        .expect("ranking succeeds");
    assert_eq!(after.results[0].card.id, card_id("dynamic"));
    assert_eq!(after.results[0].rate, 5.0);
}

#[test]
fn unknown_card_reports_failure() {
    let (service, selections) = build_service(vec![dynamic_card()]);
    let missing = card_id("missing");

    let outcome = service.optimize_dynamic_rewards(&missing, date(2025, 6, 1));
    assert!(!outcome.success);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("unknown card")));

    let manual = service.set_active_rules(&missing, Vec::new(), date(2025, 6, 1));
    assert!(!manual.success);
    assert!(selections
        .latest_selection(&missing)
        .expect("store readable")
        .is_none());
}

#[test]
fn static_cards_cannot_be_optimized() {
    let (service, _) = build_service(vec![dining_card()]);

    let err = service
        .try_optimize(&card_id("dining"), date(2025, 6, 1))
        .expect_err("static card rejected");
    assert!(matches!(err, RewardServiceError::NotDynamic(_)));
}

#[test]
fn manual_override_replaces_selection() {
    let (service, selections) = build_service(vec![dynamic_card(), dining_card()]);
    let today = date(2025, 6, 10);
    let id = card_id("dynamic");

    assert!(service.optimize_dynamic_rewards(&id, today).success);

    let outcome = service.set_active_rules(
        &id,
        vec![active(
            "top",
            RewardRule::unconditional(5.0).with_categories(["Dining"]),
        )],
        today,
    );
    assert!(outcome.success, "{outcome:?}");

    let stored = selections
        .active_selection(&id, &PeriodCursor::for_date(today).key(PeriodKind::Monthly))
        .expect("store readable")
        .expect("selection saved");
    assert_eq!(stored.source, SelectionSource::Manual);
    assert_eq!(stored.rules.len(), 1);

    let dining = service
        .rank_cards_for_transaction(&TransactionContext::new().category("Dining"), today)
        .expect("ranking succeeds");
    assert_eq!(dining.results[0].card.id, id);
    assert_eq!(dining.results[0].rate, 5.0);
}

#[test]
fn manual_override_validates_tiers_and_rates() {
    let (service, _) = build_service(vec![dynamic_card()]);
    let id = card_id("dynamic");
    let today = date(2025, 6, 10);

    let err = service
        .try_set_active_rules(
            &id,
            vec![active("bonus", RewardRule::unconditional(5.0))],
            today,
        )
        .expect_err("unknown tier rejected");
    assert!(matches!(err, RewardServiceError::UnknownTier { .. }));

    let mut negative = active("top", RewardRule::unconditional(5.0));
    negative.rate = -1.0;
    let err = service
        .try_set_active_rules(&id, vec![negative], today)
        .expect_err("negative rate rejected");
    assert!(matches!(err, RewardServiceError::InvalidRate { .. }));
}

#[test]
fn manual_override_respects_tier_capacity() {
    let (service, selections) = build_service(vec![dynamic_card()]);
    let id = card_id("dynamic");
    let rules = ["Dining", "Groceries", "Travel"]
        .into_iter()
        .map(|category| active("top", RewardRule::unconditional(5.0).with_categories([category])))
        .collect();

    let outcome = service.set_active_rules(&id, rules, date(2025, 6, 10));
    assert!(!outcome.success);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("at most 2")));
    assert!(selections.latest_selection(&id).expect("store readable").is_none());
}

#[test]
fn manual_override_only_activates_eligible_rules_at_tier_rate() {
    let (service, selections) = build_service(vec![dynamic_card(), dining_card()]);
    let id = card_id("dynamic");
    let today = date(2025, 6, 10);

    let err = service
        .try_set_active_rules(
            &id,
            vec![active("top", RewardRule::unconditional(5.0).with_categories(["Gas"]))],
            today,
        )
        .expect_err("gas is not offered by the tier");
    assert!(matches!(err, RewardServiceError::IneligibleRule { .. }));

    let err = service
        .try_set_active_rules(&id, vec![active("top", RewardRule::unconditional(5.0))], today)
        .expect_err("catch-all rule is not offered by the tier");
    assert!(matches!(err, RewardServiceError::IneligibleRule { .. }));

    let mut inflated = active("top", RewardRule::unconditional(5.0).with_categories(["Dining"]));
    inflated.rate = 50.0;
    let err = service
        .try_set_active_rules(&id, vec![inflated], today)
        .expect_err("rate must match the tier");
    assert!(matches!(
        err,
        RewardServiceError::RateMismatch { tier_rate, .. } if tier_rate == 5.0
    ));

    assert!(selections.latest_selection(&id).expect("store readable").is_none());

    let mut reordered = dynamic_card();
    if let RewardStructure::Dynamic { tiers, .. } = &mut reordered.structure {
        tiers[0].eligible_rules[0] =
            RewardRule::unconditional(5.0).with_categories(["Dining", "Takeout"]);
    }
    let (other, _) = build_service(vec![reordered]);
    let takeout_first = RewardRule::unconditional(5.0).with_categories(["Takeout", "Dining"]);
    assert!(other
        .set_active_rules(&id, vec![active("top", takeout_first)], today)
        .success);

    let gas = service
        .rank_cards_for_transaction(&TransactionContext::new().category("Gas"), today)
        .expect("ranking succeeds");
    assert!(gas.results.iter().all(|result| result.rate == 1.0));
}

#[test]
fn refresh_only_touches_pending_and_stale_cards() {
    let (service, _) = build_service(vec![dynamic_card(), dining_card()]);
    let june = date(2025, 6, 3);

    let first = service.refresh_stale_selections(june).expect("refresh runs");
    assert_eq!(first.len(), 1);
    assert!(first[0].success);
    assert_eq!(
        service
            .selection_state(&card_id("dynamic"), june)
            .expect("state available"),
        Some(SelectionState::Optimized {
            period: PeriodCursor::for_date(june).key(PeriodKind::Monthly)
        })
    );

    let again = service.refresh_stale_selections(june).expect("refresh runs");
    assert!(again.is_empty());

    let july = date(2025, 7, 1);
    assert!(matches!(
        service.selection_state(&card_id("dynamic"), july),
        Ok(Some(SelectionState::Stale { .. }))
    ));
    let rolled = service.refresh_stale_selections(july).expect("refresh runs");
    assert_eq!(rolled.len(), 1);
    assert_eq!(rolled[0].period.as_deref(), Some("2025-M07"));
}

#[test]
fn refresh_keeps_current_manual_selection() {
    let (service, selections) = build_service(vec![dynamic_card()]);
    let id = card_id("dynamic");
    let today = date(2025, 6, 3);

    assert!(service.set_active_rules(&id, Vec::new(), today).success);
    let outcomes = service.refresh_stale_selections(today).expect("refresh runs");

    assert!(outcomes.is_empty());
    let latest = selections
        .latest_selection(&id)
        .expect("store readable")
        .expect("selection saved");
    assert_eq!(latest.source, SelectionSource::Manual);
}

#[test]
fn concurrent_optimizations_leave_one_selection() {
    let (service, selections) = build_service(vec![dynamic_card(), dining_card()]);
    let id = card_id("dynamic");
    let today = date(2025, 6, 10);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let outcome = service.optimize_dynamic_rewards(&id, today);
                assert!(outcome.success);
            });
        }
    });

    let stored = selections
        .latest_selection(&id)
        .expect("store readable")
        .expect("selection saved");
    assert_eq!(stored.rules.len(), 2);
    assert_eq!(stored.source, SelectionSource::Optimized);
}

#[test]
fn store_failures_surface_as_unsuccessful_outcomes() {
    let service = RewardService::new(
        Arc::new(InMemoryCardCatalog::new(vec![dynamic_card()])),
        Arc::new(ReadOnlySelections),
    );

    let outcome = service.optimize_dynamic_rewards(&card_id("dynamic"), date(2025, 6, 1));
    assert!(!outcome.success);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("read only")));
}

#[test]
fn catalog_failures_propagate_from_reads() {
    let service = unavailable_service();

    let err = service
        .rank_cards_for_transaction(&TransactionContext::new(), date(2025, 6, 1))
        .expect_err("catalog offline");
    assert!(matches!(err, RewardServiceError::Repository(_)));
    assert!(service.enumerate_all_scenarios(date(2025, 6, 1)).is_err());
}

#[test]
fn card_summary_describes_current_period() {
    let (service, _) = build_service(vec![quarterly_gas_card(), dynamic_card()]);
    let february = date(2025, 2, 14);

    let rotating = service
        .card_summary(&card_id("rotating"), february)
        .expect("summary available");
    assert_eq!(rotating.structure, "Rotating");
    assert_eq!(rotating.period.as_deref(), Some("2025-Q1"));
    assert!(rotating
        .period_status
        .as_ref()
        .is_some_and(|status| status.updated && !status.activated));
    assert_eq!(rotating.scenarios.len(), 2);
    assert!(rotating.selection_state.is_none());

    let dynamic = service
        .card_summary(&card_id("dynamic"), february)
        .expect("summary available");
    assert_eq!(dynamic.selection_state, Some(SelectionState::PendingActivation));
    assert_eq!(dynamic.reward_system.label(), "Points");

    assert!(matches!(
        service.card_summary(&card_id("missing"), february),
        Err(RewardServiceError::UnknownCard(_))
    ));
}

#[test]
fn scenarios_include_activated_rules() {
    let (service, _) = build_service(vec![dynamic_card()]);
    let today = date(2025, 6, 10);

    let before = service.enumerate_all_scenarios(today).expect("scenarios");
    assert_eq!(before.len(), 1);

    assert!(service
        .optimize_dynamic_rewards(&card_id("dynamic"), today)
        .success);
    let after = service.enumerate_all_scenarios(today).expect("scenarios");
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].rate, 5.0);
}

#[test]
fn shared_selection_store_is_visible_across_services() {
    let catalog = Arc::new(InMemoryCardCatalog::new(vec![dynamic_card()]));
    let store = Arc::new(InMemorySelectionStore::default());
    let writer = RewardService::new(catalog.clone(), store.clone());
    let reader = RewardService::new(catalog, store);
    let today = date(2025, 6, 10);

    assert!(writer.optimize_dynamic_rewards(&card_id("dynamic"), today).success);
    let ranked = reader
        .rank_cards_for_transaction(&TransactionContext::new().category("Dining"), today)
        .expect("ranking succeeds");
    assert_eq!(ranked.results[0].rate, 5.0);
}

/// Store that lets another writer save a manual selection right after the first
/// `latest_selection` read, while still answering that read with the earlier state.
struct InterleavedManualWrite {
    inner: InMemorySelectionStore,
    pending: Mutex<Option<(CardId, ActiveRuleSelection)>>,
}

impl SelectionStore for InterleavedManualWrite {
    fn active_selection(
        &self,
        card_id: &CardId,
        period: &PeriodKey,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        self.inner.active_selection(card_id, period)
    }

    fn latest_selection(
        &self,
        card_id: &CardId,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        let observed = self.inner.latest_selection(card_id)?;
        if let Some((id, selection)) = self.pending.lock().expect("pending write").take() {
            self.inner.save_selection(&id, selection)?;
        }
        Ok(observed)
    }

    fn save_selection(
        &self,
        card_id: &CardId,
        selection: ActiveRuleSelection,
    ) -> Result<(), RepositoryError> {
        self.inner.save_selection(card_id, selection)
    }
}

#[test]
fn refresh_rechecks_state_before_overwriting() {
    let today = date(2025, 6, 3);
    let id = card_id("dynamic");
    let manual = manual_selection(
        &PeriodCursor::for_date(today),
        PeriodKind::Monthly,
        vec![active("top", RewardRule::unconditional(5.0).with_categories(["Travel"]))],
    );
    let store = Arc::new(InterleavedManualWrite {
        inner: InMemorySelectionStore::default(),
        pending: Mutex::new(Some((id.clone(), manual))),
    });
    let service = RewardService::new(
        Arc::new(InMemoryCardCatalog::new(vec![dynamic_card()])),
        store.clone(),
    );

    let outcomes = service.refresh_stale_selections(today).expect("refresh runs");

    assert!(outcomes.is_empty());
    let latest = store
        .latest_selection(&id)
        .expect("store readable")
        .expect("selection saved");
    assert_eq!(latest.source, SelectionSource::Manual);
    assert_eq!(latest.rules[0].rule.category.keys(), ["Travel".to_string()]);
}

#[test]
fn unknown_cards_do_not_accumulate_locks() {
    let (service, _) = build_service(Vec::new());
    let today = date(2025, 6, 1);

    for n in 0..100 {
        let id = card_id(&format!("nope-{n}"));
        assert!(!service.optimize_dynamic_rewards(&id, today).success);
        assert!(!service.set_active_rules(&id, Vec::new(), today).success);
    }
    assert_eq!(service.tracked_locks(), 0);

    let (service, _) = build_service(vec![dynamic_card(), dining_card()]);
    assert!(service.optimize_dynamic_rewards(&card_id("dynamic"), today).success);
    assert!(!service.optimize_dynamic_rewards(&card_id("dining"), today).success);
    assert_eq!(service.tracked_locks(), 1);
}
