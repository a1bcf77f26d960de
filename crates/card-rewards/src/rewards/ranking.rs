use tracing::debug;

use super::domain::{CreditCard, ScenarioResult, TransactionContext};
use super::evaluation::{base_rate, candidate_rules, ActiveSelections, CardRateEvaluator};
use super::period::PeriodCursor;

/// Stable sort, highest rate first. Equal rates keep generation order.
pub(crate) fn sort_by_rate_desc(scenarios: &mut [ScenarioResult]) {
    scenarios.sort_by(|left, right| right.rate.total_cmp(&left.rate));
}

/// One row per card with its effective rate for the context, best card first.
pub fn rank_cards_for_transaction(
    cards: &[CreditCard],
    selections: &ActiveSelections,
    cursor: PeriodCursor,
    context: &TransactionContext,
) -> Vec<ScenarioResult> {
    let evaluator = CardRateEvaluator::new(cursor);
    let mut results: Vec<ScenarioResult> = cards
        .iter()
        .map(|card| evaluator.scenario(card, selections.get(&card.id), context))
        .collect();

    sort_by_rate_desc(&mut results);
    debug!(
        cards = results.len(),
        category = ?context.category_id,
        payee = ?context.payee_id,
        payment_method = ?context.payment_method_id,
        "ranked cards for transaction"
    );
    results
}

/// Scenarios reachable on one card right now, in generation order: the base rate first (when
/// positive), then each relevant rule with a positive rate. Unconditional rules that merely
/// repeat the base rate are left out.
pub fn card_scenarios(
    card: &CreditCard,
    selections: &ActiveSelections,
    cursor: &PeriodCursor,
) -> Vec<ScenarioResult> {
    let base = base_rate(card);
    let mut scenarios = Vec::new();

    if base > 0.0 {
        scenarios.push(ScenarioResult::base(card, base));
    }

    for candidate in candidate_rules(card, cursor, selections.get(&card.id)) {
        if candidate.rate <= 0.0 {
            continue;
        }
        if candidate.rule.is_unconditional() && candidate.rate == base {
            continue;
        }
        scenarios.push(ScenarioResult::for_rule(card, candidate.rate, candidate.rule));
    }

    scenarios
}

/// Every reachable reward outcome across all cards, best rate first.
pub fn enumerate_all_scenarios(
    cards: &[CreditCard],
    selections: &ActiveSelections,
    cursor: PeriodCursor,
) -> Vec<ScenarioResult> {
    let mut scenarios: Vec<ScenarioResult> = cards
        .iter()
        .flat_map(|card| card_scenarios(card, selections, &cursor))
        .collect();

    sort_by_rate_desc(&mut scenarios);
    scenarios
}
