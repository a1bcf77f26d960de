use super::domain::{canonical_key, ConditionSet, RewardRule, TransactionContext};

impl ConditionSet {
    /// An unrestricted set admits anything, including an absent value. A restricted set only
    /// admits a present value that is one of its keys.
    pub fn admits(&self, value: Option<&str>) -> bool {
        if self.is_unrestricted() {
            return true;
        }

        value
            .and_then(canonical_key)
            .map(|key| self.contains(&key))
            .unwrap_or(false)
    }
}

pub fn rule_matches(rule: &RewardRule, context: &TransactionContext) -> bool {
    rule.category.admits(context.category_id.as_deref())
        && rule.payee.admits(context.payee_id.as_deref())
        && rule.payment_method.admits(context.payment_method_id.as_deref())
}
