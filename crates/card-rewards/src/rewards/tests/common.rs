use std::sync::Arc;

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::rewards::domain::{
    ActiveRule, ActiveRuleSelection, CardId, CreditCard, DynamicTier, PeriodStatus, RewardRule,
    RewardStructure, RewardSystem, RotatingRule, SelectionSource, TierId,
};
use crate::rewards::evaluation::ActiveSelections;
use crate::rewards::memory::{InMemoryCardCatalog, InMemorySelectionStore};
use crate::rewards::period::{PeriodCursor, PeriodKind};
use crate::rewards::repository::{CardCatalog, RepositoryError, SelectionStore};
use crate::rewards::service::RewardService;

pub(super) type MemoryService = RewardService<InMemoryCardCatalog, InMemorySelectionStore>;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn cursor(year: i32, month: u32) -> PeriodCursor {
    PeriodCursor::for_date(date(year, month, 15))
}

pub(super) fn card_id(raw: &str) -> CardId {
    CardId(raw.to_string())
}

pub(super) fn static_card(id: &str, base_rate: f64, rules: Vec<RewardRule>) -> CreditCard {
    CreditCard {
        id: card_id(id),
        name: format!("{id} card"),
        bank: Some("First Federal".to_string()),
        base_rate,
        reward_system: RewardSystem::Cashback,
        structure: RewardStructure::Static { rules },
    }
}

/// Flat 1% card with 4% on dining.
pub(super) fn dining_card() -> CreditCard {
    static_card(
        "dining",
        1.0,
        vec![RewardRule::unconditional(4.0).with_categories(["Dining"])],
    )
}

/// 1% card paying 5% on gas during the first quarter.
pub(super) fn quarterly_gas_card() -> CreditCard {
    CreditCard {
        id: card_id("rotating"),
        name: "Rotating Rewards".to_string(),
        bank: Some("Discover".to_string()),
        base_rate: 1.0,
        reward_system: RewardSystem::Cashback,
        structure: RewardStructure::Rotating {
            rules: vec![RotatingRule::in_quarters(
                RewardRule::unconditional(5.0).with_categories(["Gas"]),
                [1],
            )],
            period: PeriodKind::Quarterly,
            period_status: vec![PeriodStatus {
                period: "2025-Q1".to_string(),
                updated: true,
                activated: false,
            }],
        },
    }
}

pub(super) fn tier(id: &str, rate: f64, max_active: usize, categories: &[&str]) -> DynamicTier {
    DynamicTier {
        id: TierId(id.to_string()),
        name: format!("Tier {id}"),
        rate,
        eligible_rules: categories
            .iter()
            .map(|category| RewardRule::unconditional(rate).with_categories([*category]))
            .collect(),
        max_active,
    }
}

/// Monthly dynamic card: 5% on two of dining, groceries, or travel.
pub(super) fn dynamic_card() -> CreditCard {
    CreditCard {
        id: card_id("dynamic"),
        name: "Custom Cash".to_string(),
        bank: Some("Citi".to_string()),
        base_rate: 1.0,
        reward_system: RewardSystem::Points {
            program: "ThankYou".to_string(),
        },
        structure: RewardStructure::Dynamic {
            tiers: vec![tier("top", 5.0, 2, &["Dining", "Groceries", "Travel"])],
            activation_period: PeriodKind::Monthly,
            requires_activation: true,
        },
    }
}

pub(super) fn manual_selection(
    cursor: &PeriodCursor,
    kind: PeriodKind,
    rules: Vec<ActiveRule>,
) -> ActiveRuleSelection {
    ActiveRuleSelection {
        period: cursor.key(kind),
        source: SelectionSource::Manual,
        rules,
    }
}

pub(super) fn active(tier_id: &str, rule: RewardRule) -> ActiveRule {
    ActiveRule {
        tier_id: TierId(tier_id.to_string()),
        rate: rule.rate,
        rule,
    }
}

pub(super) fn no_selections() -> ActiveSelections {
    ActiveSelections::new()
}

pub(super) fn build_service(
    cards: Vec<CreditCard>,
) -> (MemoryService, Arc<InMemorySelectionStore>) {
    let catalog = Arc::new(InMemoryCardCatalog::new(cards));
    let selections = Arc::new(InMemorySelectionStore::default());
    let service = RewardService::new(catalog, selections.clone());
    (service, selections)
}

pub(super) struct UnavailableCatalog;

impl CardCatalog for UnavailableCatalog {
    fn list_cards(&self) -> Result<Vec<CreditCard>, RepositoryError> {
        Err(RepositoryError::Unavailable("metadata store offline".to_string()))
    }
}

pub(super) struct ReadOnlySelections;

impl SelectionStore for ReadOnlySelections {
    fn active_selection(
        &self,
        _card_id: &CardId,
        _period: &crate::rewards::period::PeriodKey,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        Ok(None)
    }

    fn latest_selection(
        &self,
        _card_id: &CardId,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        Ok(None)
    }

    fn save_selection(
        &self,
        _card_id: &CardId,
        _selection: ActiveRuleSelection,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }
}

pub(super) fn unavailable_service() -> RewardService<UnavailableCatalog, InMemorySelectionStore> {
    RewardService::new(
        Arc::new(UnavailableCatalog),
        Arc::new(InMemorySelectionStore::default()),
    )
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
