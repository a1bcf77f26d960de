use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::domain::{ActiveRule, ActiveRuleSelection, CardId, TransactionContext};
use super::repository::{CardCatalog, SelectionStore};
use super::service::{ActivationOutcome, RewardService, RewardServiceError};

/// Parse a `YYYY-MM-DD` evaluation date, tolerating surrounding whitespace.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|value| parse_date(&value).map_err(serde::de::Error::custom))
        .transpose()
}

fn resolve_today(today: Option<NaiveDate>) -> NaiveDate {
    today.unwrap_or_else(|| Local::now().date_naive())
}

/// Writes wait on per-card mutexes, so they run on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(error = %err, "reward worker task failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({ "error": "reward worker task failed" })),
        )
            .into_response()
    })
}

/// Transaction to rank cards for. `today` overrides the evaluation date.
#[derive(Debug, Deserialize)]
pub struct RankRequest {
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub payee_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub amount_milliunits: i64,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRulesRequest {
    pub active_rules: Vec<ActiveRule>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub today: Option<NaiveDate>,
}

/// Router builder exposing the reward engine's operations.
pub fn reward_router<C, S>(service: Arc<RewardService<C, S>>) -> Router
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    Router::new()
        .route("/api/v1/rewards/optimize", post(rank_handler::<C, S>))
        .route(
            "/api/v1/rewards/best_scenarios",
            get(scenarios_handler::<C, S>),
        )
        .route("/api/v1/rewards/refresh", post(refresh_handler::<C, S>))
        .route(
            "/api/v1/rewards/cards/:card_id",
            get(card_summary_handler::<C, S>),
        )
        .route(
            "/api/v1/rewards/cards/:card_id/optimize",
            post(optimize_card_handler::<C, S>),
        )
        .route(
            "/api/v1/rewards/cards/:card_id/active_rules",
            put(set_active_rules_handler::<C, S>),
        )
        .with_state(service)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

fn status_for(error: &RewardServiceError) -> StatusCode {
    match error {
        RewardServiceError::UnknownCard(_) => StatusCode::NOT_FOUND,
        RewardServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn service_error_response(error: RewardServiceError) -> Response {
    error_response(status_for(&error), error.to_string())
}

fn activation_response(
    card_id: &CardId,
    result: Result<ActiveRuleSelection, RewardServiceError>,
) -> Response {
    match result {
        Ok(selection) => (
            StatusCode::OK,
            axum::Json(ActivationOutcome::applied(card_id, &selection)),
        )
            .into_response(),
        Err(error) => {
            warn!(card = %card_id, %error, "reward activation request failed");
            (
                status_for(&error),
                axum::Json(ActivationOutcome::failed(card_id, &error)),
            )
                .into_response()
        }
    }
}

pub(crate) async fn rank_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    axum::Json(request): axum::Json<RankRequest>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    let RankRequest {
        category_id,
        payee_id,
        payment_method_id,
        amount_milliunits,
        today,
    } = request;

    let Ok(amount_milliunits) = u64::try_from(amount_milliunits) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "amount_milliunits must be non-negative".to_string(),
        );
    };

    let context = TransactionContext {
        category_id,
        payee_id,
        payment_method_id,
        amount_milliunits,
    };

    match service.rank_cards_for_transaction(&context, resolve_today(today)) {
        Ok(ranking) => (StatusCode::OK, axum::Json(ranking)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn scenarios_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    Query(query): Query<DateQuery>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    match service.enumerate_all_scenarios(resolve_today(query.today)) {
        Ok(scenarios) => (StatusCode::OK, axum::Json(scenarios)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn refresh_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    Query(query): Query<DateQuery>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    let today = resolve_today(query.today);
    let result = match run_blocking(move || service.refresh_stale_selections(today)).await {
        Ok(result) => result,
        Err(response) => return response,
    };
    match result {
        Ok(outcomes) => (StatusCode::OK, axum::Json(outcomes)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn card_summary_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    Path(card_id): Path<String>,
    Query(query): Query<DateQuery>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    match service.card_summary(&CardId(card_id), resolve_today(query.today)) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn optimize_card_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    Path(card_id): Path<String>,
    Query(query): Query<DateQuery>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    let card_id = CardId(card_id);
    let today = resolve_today(query.today);
    let id = card_id.clone();
    let work = move || service.try_optimize(&id, today).map(|plan| plan.to_selection());
    match run_blocking(work).await {
        Ok(result) => activation_response(&card_id, result),
        Err(response) => response,
    }
}

pub(crate) async fn set_active_rules_handler<C, S>(
    State(service): State<Arc<RewardService<C, S>>>,
    Path(card_id): Path<String>,
    axum::Json(request): axum::Json<SetActiveRulesRequest>,
) -> Response
where
    C: CardCatalog + 'static,
    S: SelectionStore + 'static,
{
    let card_id = CardId(card_id);
    let today = resolve_today(request.today);
    let id = card_id.clone();
    let work = move || service.try_set_active_rules(&id, request.active_rules, today);
    match run_blocking(work).await {
        Ok(result) => activation_response(&card_id, result),
        Err(response) => response,
    }
}
