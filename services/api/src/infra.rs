use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use card_rewards::error::AppError;
use card_rewards::rewards::{
    CardCatalogImport, CardCatalogImporter, CreditCard, InMemoryCardCatalog,
    InMemorySelectionStore, RewardService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

pub(crate) type MemoryRewardService = RewardService<InMemoryCardCatalog, InMemorySelectionStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn import_catalog(path: &Path) -> Result<CardCatalogImport, AppError> {
    let import = CardCatalogImporter::from_path(path)?;
    if !import.issues.is_empty() {
        warn!(
            path = %path.display(),
            issues = import.issues.len(),
            "card catalog imported with issues"
        );
    }
    Ok(import)
}

/// Catalog for the HTTP service. Without a configured path the service starts empty.
pub(crate) fn load_catalog(path: Option<&Path>) -> Result<InMemoryCardCatalog, AppError> {
    match path {
        Some(path) => {
            let import = import_catalog(path)?;
            info!(path = %path.display(), cards = import.cards.len(), "card catalog loaded");
            Ok(InMemoryCardCatalog::new(import.cards))
        }
        None => {
            warn!("REWARDS_CATALOG_PATH not set; serving an empty card catalog");
            Ok(InMemoryCardCatalog::default())
        }
    }
}

pub(crate) fn service_for(cards: Vec<CreditCard>) -> MemoryRewardService {
    RewardService::new(
        Arc::new(InMemoryCardCatalog::new(cards)),
        Arc::new(InMemorySelectionStore::default()),
    )
}
