use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    ActiveRule, ActiveRuleSelection, CardId, CardSummary, CreditCard, PeriodStatus,
    RankingResponse, RewardRule, RewardStructure, RewardSystem, ScenarioResult, SelectionSource,
    TierId, TransactionContext,
};
use super::evaluation::{base_rate, usable_rate, ActiveSelections};
use super::optimizer::{selection_state, DynamicTierOptimizer, OptimizationPlan, SelectionState};
use super::period::{PeriodCursor, PeriodKind};
use super::ranking::{card_scenarios, enumerate_all_scenarios, rank_cards_for_transaction};
use super::repository::{CardCatalog, RepositoryError, SelectionStore};

/// Per-card mutexes so at most one optimization or override writes a card's selection at a
/// time. Later callers wait for the lock. Only ids resolved against the catalog get an entry.
#[derive(Default)]
struct CardLocks {
    locks: Mutex<HashMap<CardId, Arc<Mutex<()>>>>,
}

impl CardLocks {
    fn for_card(&self, card_id: &CardId) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(card_id.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Result of an activation write, reported as a success flag rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationOutcome {
    pub success: bool,
    pub card_id: CardId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub active_rules: Vec<ActiveRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationOutcome {
    pub fn applied(card_id: &CardId, selection: &ActiveRuleSelection) -> Self {
        Self {
            success: true,
            card_id: card_id.clone(),
            period: Some(selection.period.to_string()),
            active_rules: selection.rules.clone(),
            error: None,
        }
    }

    pub fn failed(card_id: &CardId, error: &RewardServiceError) -> Self {
        Self {
            success: false,
            card_id: card_id.clone(),
            period: None,
            active_rules: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Reward configuration of one card as it stands today.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardRewardSummary {
    pub card: CardSummary,
    pub structure: &'static str,
    pub reward_system: RewardSystem,
    pub base_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_status: Option<PeriodStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_state: Option<SelectionState>,
    pub scenarios: Vec<ScenarioResult>,
}

/// Service exposing the reward engine over a card catalog and a selection store.
pub struct RewardService<C, S> {
    catalog: Arc<C>,
    selections: Arc<S>,
    locks: CardLocks,
}

impl<C, S> RewardService<C, S>
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    pub fn new(catalog: Arc<C>, selections: Arc<S>) -> Self {
        Self {
            catalog,
            selections,
            locks: CardLocks::default(),
        }
    }

    /// Current-period selections for every dynamic card in the snapshot.
    fn current_selections(
        &self,
        cards: &[CreditCard],
        cursor: &PeriodCursor,
    ) -> Result<ActiveSelections, RewardServiceError> {
        let mut selections = ActiveSelections::new();
        for card in cards {
            if let RewardStructure::Dynamic {
                activation_period, ..
            } = &card.structure
            {
                let period = cursor.key(*activation_period);
                if let Some(selection) = self.selections.active_selection(&card.id, &period)? {
                    selections.insert(card.id.clone(), selection);
                }
            }
        }
        Ok(selections)
    }

    fn snapshot(
        &self,
        cursor: &PeriodCursor,
    ) -> Result<(Vec<CreditCard>, ActiveSelections), RewardServiceError> {
        let cards = self.catalog.list_cards()?;
        let selections = self.current_selections(&cards, cursor)?;
        Ok((cards, selections))
    }

    fn dynamic_card(&self, card_id: &CardId) -> Result<(CreditCard, PeriodKind), RewardServiceError> {
        let card = self
            .catalog
            .fetch_card(card_id)?
            .ok_or_else(|| RewardServiceError::UnknownCard(card_id.clone()))?;
        match &card.structure {
            RewardStructure::Dynamic {
                activation_period, ..
            } => {
                let period = *activation_period;
                Ok((card, period))
            }
            _ => Err(RewardServiceError::NotDynamic(card_id.clone())),
        }
    }

    /// Every card's effective rate for the transaction, best first.
    pub fn rank_cards_for_transaction(
        &self,
        context: &TransactionContext,
        today: NaiveDate,
    ) -> Result<RankingResponse, RewardServiceError> {
        let cursor = PeriodCursor::for_date(today);
        let (cards, selections) = self.snapshot(&cursor)?;
        let results = rank_cards_for_transaction(&cards, &selections, cursor, context);
        Ok(RankingResponse { results })
    }

    /// Every reachable reward scenario across all cards, best first.
    pub fn enumerate_all_scenarios(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<ScenarioResult>, RewardServiceError> {
        let cursor = PeriodCursor::for_date(today);
        let (cards, selections) = self.snapshot(&cursor)?;
        Ok(enumerate_all_scenarios(&cards, &selections, cursor))
    }

    /// Recompute and persist the activation selection of one dynamic card.
    pub fn try_optimize(
        &self,
        card_id: &CardId,
        today: NaiveDate,
    ) -> Result<OptimizationPlan, RewardServiceError> {
        let (card, _) = self.dynamic_card(card_id)?;
        let lock = self.locks.for_card(card_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.optimize_locked(&card, today)
    }

    /// Caller holds the card's lock.
    fn optimize_locked(
        &self,
        card: &CreditCard,
        today: NaiveDate,
    ) -> Result<OptimizationPlan, RewardServiceError> {
        let cursor = PeriodCursor::for_date(today);
        let (cards, selections) = self.snapshot(&cursor)?;

        let plan = DynamicTierOptimizer::new(&cards, &selections, cursor)
            .optimize(card)
            .ok_or_else(|| RewardServiceError::NotDynamic(card.id.clone()))?;
        let selection = plan.to_selection();
        self.selections.save_selection(&card.id, selection.clone())?;

        info!(
            card = %card.id,
            period = %plan.period,
            active = selection.rules.len(),
            "optimized dynamic reward activation"
        );
        Ok(plan)
    }

    fn optimization_outcome(
        card_id: &CardId,
        result: Result<OptimizationPlan, RewardServiceError>,
    ) -> ActivationOutcome {
        match result {
            Ok(plan) => ActivationOutcome::applied(card_id, &plan.to_selection()),
            Err(err) => {
                warn!(card = %card_id, error = %err, "dynamic reward optimization failed");
                ActivationOutcome::failed(card_id, &err)
            }
        }
    }

    pub fn optimize_dynamic_rewards(&self, card_id: &CardId, today: NaiveDate) -> ActivationOutcome {
        Self::optimization_outcome(card_id, self.try_optimize(card_id, today))
    }

    /// Replace the card's current-period selection without scoring. Every rule must be one of
    /// its tier's eligible rules at the tier rate, within the tier's capacity.
    pub fn try_set_active_rules(
        &self,
        card_id: &CardId,
        rules: Vec<ActiveRule>,
        today: NaiveDate,
    ) -> Result<ActiveRuleSelection, RewardServiceError> {
        let (card, activation_period) = self.dynamic_card(card_id)?;
        validate_manual_rules(&card, &rules)?;

        let lock = self.locks.for_card(card_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let selection = ActiveRuleSelection {
            period: PeriodCursor::for_date(today).key(activation_period),
            source: SelectionSource::Manual,
            rules,
        };
        self.selections.save_selection(card_id, selection.clone())?;

        info!(
            card = %card_id,
            period = %selection.period,
            active = selection.rules.len(),
            "applied manual reward activation"
        );
        Ok(selection)
    }

    pub fn set_active_rules(
        &self,
        card_id: &CardId,
        rules: Vec<ActiveRule>,
        today: NaiveDate,
    ) -> ActivationOutcome {
        match self.try_set_active_rules(card_id, rules, today) {
            Ok(selection) => ActivationOutcome::applied(card_id, &selection),
            Err(err) => {
                warn!(card = %card_id, error = %err, "manual reward activation rejected");
                ActivationOutcome::failed(card_id, &err)
            }
        }
    }

    pub fn selection_state(
        &self,
        card_id: &CardId,
        today: NaiveDate,
    ) -> Result<Option<SelectionState>, RewardServiceError> {
        let card = self
            .catalog
            .fetch_card(card_id)?
            .ok_or_else(|| RewardServiceError::UnknownCard(card_id.clone()))?;
        let latest = self.selections.latest_selection(card_id)?;
        Ok(selection_state(
            &card,
            latest.as_ref(),
            &PeriodCursor::for_date(today),
        ))
    }

    /// Optimize every dynamic card whose selection is pending or from an earlier period.
    /// Cards already holding a current selection, manual or optimized, are left alone.
    pub fn refresh_stale_selections(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<ActivationOutcome>, RewardServiceError> {
        let cursor = PeriodCursor::for_date(today);
        let mut outcomes = Vec::new();

        for card in self.catalog.list_cards()? {
            if !self.needs_refresh(&card, &cursor)? {
                continue;
            }

            let lock = self.locks.for_card(&card.id);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            // A write may have landed since the unlocked check.
            if !self.needs_refresh(&card, &cursor)? {
                continue;
            }
            let result = self.optimize_locked(&card, today);
            outcomes.push(Self::optimization_outcome(&card.id, result));
        }

        if !outcomes.is_empty() {
            info!(refreshed = outcomes.len(), "refreshed stale dynamic selections");
        }
        Ok(outcomes)
    }

    fn needs_refresh(
        &self,
        card: &CreditCard,
        cursor: &PeriodCursor,
    ) -> Result<bool, RewardServiceError> {
        if !matches!(card.structure, RewardStructure::Dynamic { .. }) {
            return Ok(false);
        }
        let latest = self.selections.latest_selection(&card.id)?;
        Ok(selection_state(card, latest.as_ref(), cursor)
            .is_some_and(|state| state.needs_refresh()))
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.tracked()
    }

    pub fn card_summary(
        &self,
        card_id: &CardId,
        today: NaiveDate,
    ) -> Result<CardRewardSummary, RewardServiceError> {
        let card = self
            .catalog
            .fetch_card(card_id)?
            .ok_or_else(|| RewardServiceError::UnknownCard(card_id.clone()))?;
        let cursor = PeriodCursor::for_date(today);
        let selections = self.current_selections(std::slice::from_ref(&card), &cursor)?;

        let (period, period_status) = match &card.structure {
            RewardStructure::Static { .. } => (None, None),
            RewardStructure::Rotating {
                period,
                period_status,
                ..
            } => {
                let key = cursor.key(*period).to_string();
                let status = period_status
                    .iter()
                    .find(|status| status.period.trim().eq_ignore_ascii_case(&key))
                    .cloned();
                (Some(key), status)
            }
            RewardStructure::Dynamic {
                activation_period, ..
            } => (Some(cursor.key(*activation_period).to_string()), None),
        };

        let latest = self.selections.latest_selection(card_id)?;
        Ok(CardRewardSummary {
            card: card.summary(),
            structure: card.structure.label(),
            reward_system: card.reward_system.clone(),
            base_rate: base_rate(&card),
            period,
            period_status,
            selection_state: selection_state(&card, latest.as_ref(), &cursor),
            scenarios: card_scenarios(&card, &selections, &cursor),
        })
    }
}

fn same_rule(left: &RewardRule, right: &RewardRule) -> bool {
    left.rate == right.rate
        && left.category.same_keys(&right.category)
        && left.payee.same_keys(&right.payee)
        && left.payment_method.same_keys(&right.payment_method)
}

fn validate_manual_rules(card: &CreditCard, rules: &[ActiveRule]) -> Result<(), RewardServiceError> {
    let mut per_tier: HashMap<&TierId, usize> = HashMap::new();
    for active in rules {
        let tier = card
            .tier(&active.tier_id)
            .ok_or_else(|| RewardServiceError::UnknownTier {
                card_id: card.id.clone(),
                tier_id: active.tier_id.0.clone(),
            })?;
        if !usable_rate(active.rate) {
            return Err(RewardServiceError::InvalidRate {
                card_id: card.id.clone(),
                rate: active.rate,
            });
        }
        if active.rate != tier.rate {
            return Err(RewardServiceError::RateMismatch {
                card_id: card.id.clone(),
                tier_id: tier.id.0.clone(),
                rate: active.rate,
                tier_rate: tier.rate,
            });
        }
        if !tier
            .eligible_rules
            .iter()
            .any(|eligible| same_rule(eligible, &active.rule))
        {
            return Err(RewardServiceError::IneligibleRule {
                card_id: card.id.clone(),
                tier_id: tier.id.0.clone(),
            });
        }

        let count = per_tier.entry(&tier.id).or_default();
        *count += 1;
        if *count > tier.max_active {
            return Err(RewardServiceError::TierCapacityExceeded {
                card_id: card.id.clone(),
                tier_id: tier.id.0.clone(),
                max_active: tier.max_active,
            });
        }
    }
    Ok(())
}

/// Error raised by the reward service.
#[derive(Debug, thiserror::Error)]
pub enum RewardServiceError {
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    #[error("card {0} does not use dynamic reward tiers")]
    NotDynamic(CardId),
    #[error("card {card_id} has no tier {tier_id}")]
    UnknownTier { card_id: CardId, tier_id: String },
    #[error("card {card_id}: invalid activation rate {rate}")]
    InvalidRate { card_id: CardId, rate: f64 },
    #[error("card {card_id}: tier {tier_id} pays {tier_rate}, not {rate}")]
    RateMismatch {
        card_id: CardId,
        tier_id: String,
        rate: f64,
        tier_rate: f64,
    },
    #[error("card {card_id}: rule is not eligible in tier {tier_id}")]
    IneligibleRule { card_id: CardId, tier_id: String },
    #[error("card {card_id}: tier {tier_id} allows at most {max_active} active rules")]
    TierCapacityExceeded {
        card_id: CardId,
        tier_id: String,
        max_active: usize,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
