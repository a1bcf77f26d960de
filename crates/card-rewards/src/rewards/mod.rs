//! Reward-rate evaluation for credit cards.
//!
//! Cards come in three shapes: static rule lists, rules that rotate by month or quarter, and
//! dynamic tiers whose rules only count once activated. The engine ranks cards for a single
//! transaction, enumerates every reachable scenario, and chooses which dynamic-tier rules to
//! activate each period. Evaluation is a pure read over a catalog snapshot; the only write is
//! the per-card activation selection, serialized by the service.

pub mod domain;
pub mod evaluation;
pub mod intake;
pub(crate) mod matcher;
pub mod memory;
pub mod optimizer;
pub mod period;
pub mod ranking;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    ActiveRule, ActiveRuleSelection, CardId, CardSummary, ConditionSet, CreditCard, DynamicTier,
    PeriodStatus, RankingResponse, RewardRule, RewardStructure, RewardSystem, RotatingRule,
    ScenarioResult, SelectionSource, TierId, TransactionContext, PERCENT,
};
pub use evaluation::{ActiveSelections, CardRate, CardRateEvaluator};
pub use intake::{CardCatalogError, CardCatalogImport, CardCatalogImporter, IntakeIssue};
pub use matcher::rule_matches;
pub use memory::{InMemoryCardCatalog, InMemorySelectionStore};
pub use optimizer::{
    DynamicTierOptimizer, OptimizationPlan, ScoredRule, SelectionState, TierPlan,
};
pub use period::{PeriodCursor, PeriodKey, PeriodKind};
pub use ranking::{enumerate_all_scenarios, rank_cards_for_transaction};
pub use repository::{CardCatalog, RepositoryError, SelectionStore};
pub use router::{parse_date, reward_router};
pub use service::{ActivationOutcome, CardRewardSummary, RewardService, RewardServiceError};
