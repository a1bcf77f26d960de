use crate::cli::ServeArgs;
use crate::infra::{load_catalog, AppState};
use crate::routes::with_reward_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use card_rewards::config::AppConfig;
use card_rewards::error::AppError;
use card_rewards::rewards::{CardCatalog, InMemorySelectionStore, RewardService, SelectionStore};
use card_rewards::telemetry;
use chrono::Local;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(catalog) = args.catalog.take() {
        config.rewards.catalog_path = Some(catalog);
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let catalog = Arc::new(load_catalog(config.rewards.catalog_path.as_deref())?);
    let selections = Arc::new(InMemorySelectionStore::default());
    let reward_service = Arc::new(RewardService::new(catalog, selections));
    let refresh = spawn_refresh_task(reward_service.clone(), config.rewards.refresh_interval());

    let app = with_reward_routes(reward_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        refresh_secs = config.rewards.refresh_interval_secs,
        "card rewards service ready"
    );

    let served = axum::serve(listener, app).await;
    refresh.abort();
    served?;
    Ok(())
}

/// Re-optimizes pending and stale dynamic selections on a fixed cadence. The first tick fires
/// immediately so cards are activated at startup.
fn spawn_refresh_task<C, S>(service: Arc<RewardService<C, S>>, every: Duration) -> JoinHandle<()>
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let today = Local::now().date_naive();
            let service = service.clone();

            match tokio::task::spawn_blocking(move || service.refresh_stale_selections(today)).await
            {
                Ok(Ok(outcomes)) => {
                    let failed = outcomes.iter().filter(|outcome| !outcome.success).count();
                    if failed > 0 {
                        warn!(
                            refreshed = outcomes.len(),
                            failed, "scheduled activation refresh had failures"
                        );
                    } else {
                        debug!(refreshed = outcomes.len(), "scheduled activation refresh done");
                    }
                }
                Ok(Err(err)) => warn!(error = %err, "scheduled activation refresh failed"),
                Err(err) => warn!(error = %err, "scheduled activation refresh aborted"),
            }
        }
    })
}
