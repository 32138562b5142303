//! HTTP route definitions

use std::future::Future;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::config::MatchConfig;
use crate::game::model::{EliminationCause, EndReason, MatchRecord};
use crate::game::orchestrator::{DamageOutcome, MatchDetails, OrchestratorError, Settlement};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::util::time::uptime_secs;
use crate::ws::handler::events_handler;

/// Control requests give up after this long; the operation itself keeps running
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (the event stream authenticates with a query token)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/matches/:id/events", get(events_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matches", post(create_match_handler))
        .route("/matches/:id", get(get_match_handler))
        .route("/matches/:id/start", post(start_match_handler))
        .route("/matches/:id/end", post(end_match_handler))
        .route(
            "/matches/:id/players/:user_id/eliminate",
            post(eliminate_handler),
        )
        .route("/matches/:id/players/:user_id/damage", post(damage_handler))
        .route(
            "/matches/:id/players/:user_id/position",
            post(position_handler),
        )
        .route("/matches/:id/loot/:loot_id/collect", post(collect_loot_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run an orchestrator operation on its own task so a dropped request
/// (client gone, timeout) can't interrupt it halfway
async fn detached<T, F>(operation: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    event_channels: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.orchestrator.active_matches().len(),
        event_channels: state.bus.channel_count(),
    })
}

// ============================================================================
// Match lifecycle endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateMatchRequest {
    /// Falls back to the server's default match configuration
    #[serde(default)]
    config: Option<MatchConfig>,
    players: Vec<Uuid>,
}

async fn create_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<MatchRecord>), AppError> {
    if req.players.is_empty() {
        return Err(AppError::BadRequest("A match needs at least one player".to_string()));
    }
    let config = req
        .config
        .unwrap_or_else(|| state.config.default_match.clone());

    let orchestrator = state.orchestrator.clone();
    let record =
        detached(async move { orchestrator.create_match(config, &req.players).await }).await?;

    info!(match_id = %record.id, requested_by = %auth.user_id, "Match created via API");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MatchDetails>, AppError> {
    Ok(Json(state.orchestrator.describe(match_id).await?))
}

async fn start_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MatchRecord>, AppError> {
    let orchestrator = state.orchestrator.clone();
    let record = detached(async move { orchestrator.start(match_id).await }).await?;
    Ok(Json(record))
}

#[derive(Deserialize, Default)]
struct EndMatchRequest {
    #[serde(default)]
    reason: Option<EndReason>,
}

#[derive(Serialize)]
struct EndMatchResponse {
    settled: bool,
    settlement: Option<Settlement>,
}

async fn end_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(match_id): Path<Uuid>,
    body: Option<Json<EndMatchRequest>>,
) -> Result<Json<EndMatchResponse>, AppError> {
    let reason = body
        .map(|Json(req)| req)
        .unwrap_or_default()
        .reason
        .unwrap_or(EndReason::Cancelled);

    info!(match_id = %match_id, requested_by = %auth.user_id, reason = ?reason, "End requested");
    let orchestrator = state.orchestrator.clone();
    let settlement = detached(async move { orchestrator.end(match_id, reason).await }).await?;

    Ok(Json(EndMatchResponse {
        settled: settlement.is_some(),
        settlement,
    }))
}

// ============================================================================
// Player endpoints
// ============================================================================

#[derive(Deserialize)]
struct EliminateRequest {
    #[serde(default = "default_elimination_cause")]
    cause: EliminationCause,
}

fn default_elimination_cause() -> EliminationCause {
    EliminationCause::Admin
}

#[derive(Serialize)]
struct EliminateResponse {
    eliminated: bool,
}

async fn eliminate_handler(
    State(state): State<AppState>,
    Path((match_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<EliminateRequest>,
) -> Result<Json<EliminateResponse>, AppError> {
    let orchestrator = state.orchestrator.clone();
    let eliminated = detached(async move {
        orchestrator
            .eliminate_player(match_id, user_id, req.cause)
            .await
    })
    .await?;
    Ok(Json(EliminateResponse { eliminated }))
}

#[derive(Deserialize)]
struct DamageRequest {
    attacker_id: Uuid,
    amount: f32,
    #[serde(default)]
    assists: Vec<Uuid>,
}

async fn damage_handler(
    State(state): State<AppState>,
    Path((match_id, victim_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<DamageRequest>,
) -> Result<Json<DamageOutcome>, AppError> {
    if !req.amount.is_finite() || req.amount < 0.0 {
        return Err(AppError::BadRequest("Damage must be a non-negative number".to_string()));
    }

    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move {
        orchestrator
            .apply_player_damage(match_id, req.attacker_id, victim_id, req.amount, &req.assists)
            .await
    })
    .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct PositionRequest {
    x: f32,
    y: f32,
}

async fn position_handler(
    State(state): State<AppState>,
    Path((match_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<PositionRequest>,
) -> Result<StatusCode, AppError> {
    if !req.x.is_finite() || !req.y.is_finite() {
        return Err(AppError::BadRequest("Position must be finite".to_string()));
    }

    state
        .orchestrator
        .update_player_position(match_id, user_id, req.x, req.y)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CollectLootRequest {
    user_id: Uuid,
}

#[derive(Serialize)]
struct CollectLootResponse {
    collected: bool,
}

async fn collect_loot_handler(
    State(state): State<AppState>,
    Path((match_id, loot_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CollectLootRequest>,
) -> Result<Json<CollectLootResponse>, AppError> {
    let collected = state
        .orchestrator
        .collect_loot(match_id, loot_id, req.user_id)
        .await?;
    Ok(Json(CollectLootResponse { collected }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::MatchNotFound(_)
            | OrchestratorError::PlayerNotFound { .. }
            | OrchestratorError::LootNotFound(_) => AppError::NotFound(e.to_string()),
            OrchestratorError::InvalidState { .. } | OrchestratorError::PlayerEliminated(_) => {
                AppError::Conflict(e.to_string())
            }
            OrchestratorError::InvalidConfig(_) => AppError::BadRequest(e.to_string()),
            OrchestratorError::Store(_) | OrchestratorError::Bus(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::MatchStatus;

    #[test]
    fn orchestrator_errors_map_to_status_codes() {
        let cases = [
            (OrchestratorError::MatchNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                OrchestratorError::InvalidState {
                    expected: MatchStatus::Waiting,
                    actual: MatchStatus::Finished,
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::PlayerEliminated(Uuid::nil()),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::InvalidConfig(crate::config::MatchConfigError::NegativeDamage),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).into_response().status(), status);
        }
    }
}
