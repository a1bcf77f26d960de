use std::collections::HashMap;

use tracing::{debug, warn};

use super::domain::{
    ActiveRuleSelection, CardId, CreditCard, RewardRule, RewardStructure, ScenarioResult, TierId,
    TransactionContext,
};
use super::matcher::rule_matches;
use super::period::{is_rotating_rule_active, PeriodCursor};

/// Current-period activation selections keyed by card.
pub type ActiveSelections = HashMap<CardId, ActiveRuleSelection>;

/// Where a candidate rule came from on its card.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOrigin {
    Static,
    Rotating,
    Tier(TierId),
}

/// A rule eligible to apply to a card right now, with the rate it would pay.
#[derive(Debug, Clone)]
pub struct CandidateRule<'a> {
    pub rule: &'a RewardRule,
    pub rate: f64,
    pub origin: RuleOrigin,
}

pub(crate) fn usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}

/// Base rate of the card, or zero when the stored value is unusable.
pub fn base_rate(card: &CreditCard) -> f64 {
    if usable_rate(card.base_rate) {
        card.base_rate
    } else {
        warn!(card = %card.id, base_rate = card.base_rate, "ignoring unusable base rate");
        0.0
    }
}

/// Rules currently in effect for the card. Rotating rules are gated by the period resolver;
/// dynamic cards contribute only their activation selection for the current period.
pub fn candidate_rules<'a>(
    card: &'a CreditCard,
    cursor: &PeriodCursor,
    selection: Option<&'a ActiveRuleSelection>,
) -> Vec<CandidateRule<'a>> {
    let candidates: Vec<CandidateRule<'a>> = match &card.structure {
        RewardStructure::Static { rules } => rules
            .iter()
            .map(|rule| CandidateRule {
                rule,
                rate: rule.rate,
                origin: RuleOrigin::Static,
            })
            .collect(),
        RewardStructure::Rotating { rules, period, .. } => rules
            .iter()
            .filter(|rotating| is_rotating_rule_active(rotating, *period, cursor))
            .map(|rotating| CandidateRule {
                rule: &rotating.rule,
                rate: rotating.rule.rate,
                origin: RuleOrigin::Rotating,
            })
            .collect(),
        RewardStructure::Dynamic {
            activation_period, ..
        } => {
            let current = cursor.key(*activation_period);
            match selection {
                Some(selection) if selection.period == current => selection
                    .rules
                    .iter()
                    .map(|active| CandidateRule {
                        rule: &active.rule,
                        rate: active.rate,
                        origin: RuleOrigin::Tier(active.tier_id.clone()),
                    })
                    .collect(),
                Some(selection) => {
                    debug!(
                        card = %card.id,
                        stored = %selection.period,
                        %current,
                        "activation selection belongs to a previous period"
                    );
                    Vec::new()
                }
                None => Vec::new(),
            }
        }
    };

    candidates
        .into_iter()
        .filter(|candidate| {
            let usable = usable_rate(candidate.rate);
            if !usable {
                warn!(
                    card = %card.id,
                    rate = candidate.rate,
                    origin = ?candidate.origin,
                    "skipping reward rule with unusable rate"
                );
            }
            usable
        })
        .collect()
}

/// Effective rate for one card and the rule that produced it, if a rule beat the base rate.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRate<'a> {
    pub rate: f64,
    pub rule: Option<&'a RewardRule>,
}

/// Computes the best applicable rate of a card for a transaction context.
#[derive(Debug, Clone, Copy)]
pub struct CardRateEvaluator {
    cursor: PeriodCursor,
}

impl CardRateEvaluator {
    pub fn new(cursor: PeriodCursor) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> &PeriodCursor {
        &self.cursor
    }

    pub fn evaluate<'a>(
        &self,
        card: &'a CreditCard,
        selection: Option<&'a ActiveRuleSelection>,
        context: &TransactionContext,
    ) -> CardRate<'a> {
        let base = base_rate(card);

        let mut best: Option<(f64, &'a RewardRule)> = None;
        for candidate in candidate_rules(card, &self.cursor, selection) {
            if !rule_matches(candidate.rule, context) {
                continue;
            }
            match best {
                Some((rate, _)) if candidate.rate <= rate => {}
                _ => best = Some((candidate.rate, candidate.rule)),
            }
        }

        match best {
            Some((rate, rule)) if rate > base => CardRate {
                rate,
                rule: Some(rule),
            },
            _ => CardRate {
                rate: base,
                rule: None,
            },
        }
    }

    pub fn scenario(
        &self,
        card: &CreditCard,
        selection: Option<&ActiveRuleSelection>,
        context: &TransactionContext,
    ) -> ScenarioResult {
        let outcome = self.evaluate(card, selection, context);
        match outcome.rule {
            Some(rule) => ScenarioResult::for_rule(card, outcome.rate, rule),
            None => ScenarioResult::base(card, outcome.rate),
        }
    }
}
