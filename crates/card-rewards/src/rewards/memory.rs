use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::domain::{ActiveRuleSelection, CardId, CreditCard};
use super::period::PeriodKey;
use super::repository::{CardCatalog, RepositoryError, SelectionStore};

/// Catalog held in memory, replaceable wholesale when the source document is reloaded.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCardCatalog {
    cards: Arc<RwLock<Vec<CreditCard>>>,
}

impl InMemoryCardCatalog {
    pub fn new(cards: Vec<CreditCard>) -> Self {
        Self {
            cards: Arc::new(RwLock::new(cards)),
        }
    }

    pub fn replace(&self, cards: Vec<CreditCard>) {
        *self.cards.write().unwrap_or_else(PoisonError::into_inner) = cards;
    }
}

impl CardCatalog for InMemoryCardCatalog {
    fn list_cards(&self) -> Result<Vec<CreditCard>, RepositoryError> {
        Ok(self
            .cards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn fetch_card(&self, id: &CardId) -> Result<Option<CreditCard>, RepositoryError> {
        let guard = self.cards.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.iter().find(|card| &card.id == id).cloned())
    }
}

/// Latest selection per card. A save replaces whatever the card held, so a long-running
/// process keeps one entry per dynamic card however many periods roll over.
#[derive(Default, Clone)]
pub struct InMemorySelectionStore {
    selections: Arc<RwLock<HashMap<CardId, ActiveRuleSelection>>>,
}

impl InMemorySelectionStore {
    pub fn len(&self) -> usize {
        self.selections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SelectionStore for InMemorySelectionStore {
    fn active_selection(
        &self,
        card_id: &CardId,
        period: &PeriodKey,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        let guard = self
            .selections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(card_id)
            .filter(|selection| &selection.period == period)
            .cloned())
    }

    fn latest_selection(
        &self,
        card_id: &CardId,
    ) -> Result<Option<ActiveRuleSelection>, RepositoryError> {
        let guard = self
            .selections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(card_id).cloned())
    }

    fn save_selection(
        &self,
        card_id: &CardId,
        selection: ActiveRuleSelection,
    ) -> Result<(), RepositoryError> {
        self.selections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(card_id.clone(), selection);
        Ok(())
    }
}
