//! Chooses which eligible rules of each dynamic tier should be activated for a period.
//!
//! A candidate's score is `tier rate - best competing rate`, where the competing rate is the
//! best any other card currently pays for the transactions the candidate covers. Each tier
//! keeps its `max_active` highest-scoring candidates; equal scores keep listing order.

use serde::Serialize;
use tracing::debug;

use super::domain::{
    ActiveRule, ActiveRuleSelection, CardId, CreditCard, DynamicTier, RewardRule,
    RewardStructure, SelectionSource, TierId, TransactionContext,
};
use super::evaluation::{usable_rate, ActiveSelections, CardRateEvaluator};
use super::period::{PeriodCursor, PeriodKey};

/// Candidate rule with the numbers behind its ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRule {
    pub position: usize,
    pub rule: RewardRule,
    pub tier_rate: f64,
    pub best_competing_rate: f64,
    pub score: f64,
}

/// Outcome for a single tier: what gets activated and what is left out this period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierPlan {
    pub tier_id: TierId,
    pub tier_name: String,
    pub max_active: usize,
    pub selected: Vec<ScoredRule>,
    pub discarded: Vec<ScoredRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationPlan {
    pub card_id: CardId,
    pub period: PeriodKey,
    pub tiers: Vec<TierPlan>,
}

impl OptimizationPlan {
    pub fn active_rules(&self) -> Vec<ActiveRule> {
        self.tiers
            .iter()
            .flat_map(|tier| {
                tier.selected.iter().map(|scored| ActiveRule {
                    tier_id: tier.tier_id.clone(),
                    rule: scored.rule.clone(),
                    rate: scored.tier_rate,
                })
            })
            .collect()
    }

    pub fn to_selection(&self) -> ActiveRuleSelection {
        ActiveRuleSelection {
            period: self.period,
            source: SelectionSource::Optimized,
            rules: self.active_rules(),
        }
    }
}

/// Lifecycle of a dynamic card's activation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SelectionState {
    PendingActivation,
    Optimized { period: PeriodKey },
    Stale { last_period: PeriodKey },
}

impl SelectionState {
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, SelectionState::Optimized { .. })
    }
}

/// Where the card stands relative to the current activation period. `None` for cards that are
/// not dynamic.
pub fn selection_state(
    card: &CreditCard,
    latest: Option<&ActiveRuleSelection>,
    cursor: &PeriodCursor,
) -> Option<SelectionState> {
    let RewardStructure::Dynamic {
        activation_period, ..
    } = &card.structure
    else {
        return None;
    };

    let current = cursor.key(*activation_period);
    Some(match latest {
        None => SelectionState::PendingActivation,
        Some(selection) if selection.period == current => {
            SelectionState::Optimized { period: current }
        }
        Some(selection) => SelectionState::Stale {
            last_period: selection.period,
        },
    })
}

/// Concrete transaction contexts covered by a rule: one per combination of its condition
/// keys, with an absent value standing in for an unrestricted dimension.
fn covered_contexts(rule: &RewardRule) -> Vec<TransactionContext> {
    fn options(keys: &[String]) -> Vec<Option<String>> {
        if keys.is_empty() {
            vec![None]
        } else {
            keys.iter().cloned().map(Some).collect()
        }
    }

    let categories = options(rule.category.keys());
    let payees = options(rule.payee.keys());
    let methods = options(rule.payment_method.keys());

    let mut contexts = Vec::with_capacity(categories.len() * payees.len() * methods.len());
    for category in &categories {
        for payee in &payees {
            for method in &methods {
                contexts.push(TransactionContext {
                    category_id: category.clone(),
                    payee_id: payee.clone(),
                    payment_method_id: method.clone(),
                    amount_milliunits: 0,
                });
            }
        }
    }
    contexts
}

pub struct DynamicTierOptimizer<'a> {
    cards: &'a [CreditCard],
    selections: &'a ActiveSelections,
    evaluator: CardRateEvaluator,
}

impl<'a> DynamicTierOptimizer<'a> {
    /// `cards` is the full catalog snapshot; `selections` holds current-period selections used
    /// when competing cards are themselves dynamic.
    pub fn new(
        cards: &'a [CreditCard],
        selections: &'a ActiveSelections,
        cursor: PeriodCursor,
    ) -> Self {
        Self {
            cards,
            selections,
            evaluator: CardRateEvaluator::new(cursor),
        }
    }

    /// Best rate any card other than `card_id` pays across the contexts the rule covers.
    pub fn best_competing_rate(&self, card_id: &CardId, rule: &RewardRule) -> f64 {
        let contexts = covered_contexts(rule);
        self.cards
            .iter()
            .filter(|other| &other.id != card_id)
            .flat_map(|other| {
                let selection = self.selections.get(&other.id);
                contexts
                    .iter()
                    .map(move |context| self.evaluator.evaluate(other, selection, context).rate)
            })
            .fold(0.0, f64::max)
    }

    fn plan_tier(&self, card_id: &CardId, tier: &DynamicTier) -> TierPlan {
        let mut scored: Vec<ScoredRule> = tier
            .eligible_rules
            .iter()
            .enumerate()
            .map(|(position, rule)| {
                let best_competing_rate = self.best_competing_rate(card_id, rule);
                ScoredRule {
                    position,
                    rule: rule.clone(),
                    tier_rate: tier.rate,
                    best_competing_rate,
                    score: tier.rate - best_competing_rate,
                }
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        let cut = tier.max_active.min(scored.len());
        let discarded = scored.split_off(cut);

        debug!(
            card = %card_id,
            tier = %tier.id,
            selected = scored.len(),
            discarded = discarded.len(),
            "planned dynamic tier activation"
        );

        TierPlan {
            tier_id: tier.id.clone(),
            tier_name: tier.name.clone(),
            max_active: tier.max_active,
            selected: scored,
            discarded,
        }
    }

    /// Plan for one dynamic card. Returns `None` when the card is not dynamic. Tiers with an
    /// unusable rate or zero capacity contribute nothing.
    pub fn optimize(&self, card: &CreditCard) -> Option<OptimizationPlan> {
        let RewardStructure::Dynamic {
            tiers,
            activation_period,
            ..
        } = &card.structure
        else {
            return None;
        };

        let period = self.evaluator.cursor().key(*activation_period);
        let tiers = tiers
            .iter()
            .filter(|tier| usable_rate(tier.rate) && tier.max_active > 0)
            .map(|tier| self.plan_tier(&card.id, tier))
            .collect();

        Some(OptimizationPlan {
            card_id: card.id.clone(),
            period,
            tiers,
        })
    }
}
