use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::period::{PeriodKey, PeriodKind};

/// Unit attached to every reward rate the engine emits.
pub const PERCENT: &str = "%";

/// Identifier wrapper for configured credit cards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId(pub String);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for a dynamic tier within one card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TierId(pub String);

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn canonical_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Ordered, de-duplicated set of canonical identifiers. Empty means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ConditionSet {
    keys: Vec<String>,
}

impl ConditionSet {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for key in keys {
            set.insert(key.as_ref());
        }
        set
    }

    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, raw: &str) {
        if let Some(key) = canonical_key(raw) {
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|candidate| candidate == key)
    }

    /// Same keys, in any order.
    pub fn same_keys(&self, other: &ConditionSet) -> bool {
        self.keys.len() == other.keys.len() && self.keys.iter().all(|key| other.contains(key))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<Vec<String>> for ConditionSet {
    fn from(value: Vec<String>) -> Self {
        Self::new(value)
    }
}

impl From<ConditionSet> for Vec<String> {
    fn from(value: ConditionSet) -> Self {
        value.keys
    }
}

/// One conditional reward offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRule {
    #[serde(default)]
    pub category: ConditionSet,
    #[serde(default)]
    pub payee: ConditionSet,
    #[serde(default)]
    pub payment_method: ConditionSet,
    pub rate: f64,
}

impl RewardRule {
    /// Rule that applies to every transaction.
    pub fn unconditional(rate: f64) -> Self {
        Self {
            category: ConditionSet::unrestricted(),
            payee: ConditionSet::unrestricted(),
            payment_method: ConditionSet::unrestricted(),
            rate,
        }
    }

    pub fn with_categories<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.category = ConditionSet::new(keys);
        self
    }

    pub fn with_payees<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.payee = ConditionSet::new(keys);
        self
    }

    pub fn with_payment_methods<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.payment_method = ConditionSet::new(keys);
        self
    }

    pub fn is_unconditional(&self) -> bool {
        self.category.is_unrestricted()
            && self.payee.is_unrestricted()
            && self.payment_method.is_unrestricted()
    }
}

/// Rule offered only during specific months or quarters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatingRule {
    #[serde(flatten)]
    pub rule: RewardRule,
    #[serde(default = "default_is_rotating")]
    pub is_rotating: bool,
    #[serde(default)]
    pub months: BTreeSet<u32>,
    #[serde(default)]
    pub quarters: BTreeSet<u32>,
}

fn default_is_rotating() -> bool {
    true
}

impl RotatingRule {
    pub fn in_months(rule: RewardRule, months: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rule,
            is_rotating: true,
            months: months.into_iter().collect(),
            quarters: BTreeSet::new(),
        }
    }

    pub fn in_quarters(rule: RewardRule, quarters: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rule,
            is_rotating: true,
            months: BTreeSet::new(),
            quarters: quarters.into_iter().collect(),
        }
    }

    pub fn always_on(rule: RewardRule) -> Self {
        Self {
            rule,
            is_rotating: false,
            months: BTreeSet::new(),
            quarters: BTreeSet::new(),
        }
    }
}

/// Bucket of candidate rules sharing a rate, capped at `max_active` simultaneous activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTier {
    pub id: TierId,
    pub name: String,
    pub rate: f64,
    pub eligible_rules: Vec<RewardRule>,
    pub max_active: usize,
}

/// One rule currently activated from a dynamic tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRule {
    pub tier_id: TierId,
    pub rule: RewardRule,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Optimized,
    Manual,
}

/// Persisted activation choice for one dynamic card and one activation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRuleSelection {
    pub period: PeriodKey,
    pub source: SelectionSource,
    pub rules: Vec<ActiveRule>,
}

/// Whether the card earns cash or points in a named program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardSystem {
    Cashback,
    Points { program: String },
}

impl RewardSystem {
    pub fn label(&self) -> &'static str {
        match self {
            RewardSystem::Cashback => "Cashback",
            RewardSystem::Points { .. } => "Points",
        }
    }
}

/// Bookkeeping entry recording whether a rotating period was reviewed and activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStatus {
    pub period: String,
    #[serde(default)]
    pub updated: bool,
    #[serde(default)]
    pub activated: bool,
}

/// Reward structure variants, each carrying only the fields it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardStructure {
    Static {
        rules: Vec<RewardRule>,
    },
    Rotating {
        rules: Vec<RotatingRule>,
        period: PeriodKind,
        #[serde(default)]
        period_status: Vec<PeriodStatus>,
    },
    Dynamic {
        tiers: Vec<DynamicTier>,
        activation_period: PeriodKind,
        #[serde(default)]
        requires_activation: bool,
    },
}

impl RewardStructure {
    pub fn label(&self) -> &'static str {
        match self {
            RewardStructure::Static { .. } => "Static",
            RewardStructure::Rotating { .. } => "Rotating",
            RewardStructure::Dynamic { .. } => "Dynamic",
        }
    }
}

/// A credit card's reward configuration as maintained in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: CardId,
    pub name: String,
    pub bank: Option<String>,
    pub base_rate: f64,
    pub reward_system: RewardSystem,
    pub structure: RewardStructure,
}

impl CreditCard {
    pub fn summary(&self) -> CardSummary {
        CardSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            bank: self.bank.clone(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.structure, RewardStructure::Dynamic { .. })
    }

    pub fn tier(&self, tier_id: &TierId) -> Option<&DynamicTier> {
        match &self.structure {
            RewardStructure::Dynamic { tiers, .. } => tiers.iter().find(|tier| &tier.id == tier_id),
            _ => None,
        }
    }
}

/// Query input describing a hypothetical transaction. Ids are already resolved by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub payee_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub amount_milliunits: u64,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, id: impl Into<String>) -> Self {
        self.category_id = Some(id.into());
        self
    }

    pub fn payee(mut self, id: impl Into<String>) -> Self {
        self.payee_id = Some(id.into());
        self
    }

    pub fn payment_method(mut self, id: impl Into<String>) -> Self {
        self.payment_method_id = Some(id.into());
        self
    }

    pub fn amount(mut self, milliunits: u64) -> Self {
        self.amount_milliunits = milliunits;
        self
    }
}

/// Card identity as reported alongside a rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardSummary {
    pub id: CardId,
    pub name: String,
    pub bank: Option<String>,
}

/// One reachable reward outcome: a card, a rate, and the conditions that produce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub card: CardSummary,
    pub rate: f64,
    #[serde(rename = "type")]
    pub rate_type: &'static str,
    pub category: Vec<String>,
    pub payee: Vec<String>,
    pub payment_method: Vec<String>,
}

impl ScenarioResult {
    pub fn base(card: &CreditCard, rate: f64) -> Self {
        Self {
            card: card.summary(),
            rate,
            rate_type: PERCENT,
            category: Vec::new(),
            payee: Vec::new(),
            payment_method: Vec::new(),
        }
    }

    pub fn for_rule(card: &CreditCard, rate: f64, rule: &RewardRule) -> Self {
        Self {
            card: card.summary(),
            rate,
            rate_type: PERCENT,
            category: rule.category.keys().to_vec(),
            payee: rule.payee.keys().to_vec(),
            payment_method: rule.payment_method.keys().to_vec(),
        }
    }

    /// True when no condition produced the rate.
    pub fn is_base(&self) -> bool {
        self.category.is_empty() && self.payee.is_empty() && self.payment_method.is_empty()
    }
}

/// Ranked answer for one transaction context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingResponse {
    pub results: Vec<ScenarioResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_set_trims_and_deduplicates() {
        let set = ConditionSet::new([" Dining ", "Dining", "", "Travel"]);
        assert_eq!(set.keys(), ["Dining".to_string(), "Travel".to_string()]);
        assert!(set.contains("Travel"));
        assert!(!set.contains(" Dining "));
    }

    #[test]
    fn scenario_serializes_with_rate_unit_and_camel_case() {
        let card = CreditCard {
            id: CardId("card-1".to_string()),
            name: "Everyday".to_string(),
            bank: Some("First Bank".to_string()),
            base_rate: 1.0,
            reward_system: RewardSystem::Cashback,
            structure: RewardStructure::Static { rules: Vec::new() },
        };
        let rule = RewardRule::unconditional(3.0).with_payment_methods(["Apple Pay"]);

        let value = serde_json::to_value(ScenarioResult::for_rule(&card, 3.0, &rule))
            .expect("scenario serializes");

        assert_eq!(value["type"], "%");
        assert_eq!(value["card"]["id"], "card-1");
        assert_eq!(value["paymentMethod"][0], "Apple Pay");
        assert!(value["category"].as_array().expect("array").is_empty());
    }
}
