use super::domain::{ActiveRuleSelection, CardId, CreditCard};
use super::period::PeriodKey;

/// Read access to the metadata store's card reward configuration.
pub trait CardCatalog: Send + Sync {
    fn list_cards(&self) -> Result<Vec<CreditCard>, RepositoryError>;

    fn fetch_card(&self, id: &CardId) -> Result<Option<CreditCard>, RepositoryError> {
        Ok(self.list_cards()?.into_iter().find(|card| &card.id == id))
    }
}

/// Persistence of dynamic-tier activation selections.
pub trait SelectionStore: Send + Sync {
    fn active_selection(
        &self,
        card_id: &CardId,
        period: &PeriodKey,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError>;

    /// Most recently saved selection regardless of period, used to detect rollover.
    fn latest_selection(
        &self,
        card_id: &CardId,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError>;

    /// Stores the selection as the card's latest, replacing any earlier one for that card.
    fn save_selection(
        &self,
        card_id: &CardId,
        selection: ActiveRuleSelection,
    ) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
