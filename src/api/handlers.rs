//! Request handlers
//!
//! The webhook handler is the protocol dispatcher: it resolves the
//! calling aggregator by path identity, parses the request through that
//! aggregator's codec, drives the settlement engine, and renders the
//! result in the aggregator's own envelope. Platform endpoints (launch,
//! catalog, freespins) use plain JSON with HTTP status codes.

use super::{errors::ApiError, middleware::RequestId};
use crate::{
    aggregator::{
        AggregatorAdapter, AggregatorDirectory, AdapterRegistry, AggregatorInfo, LaunchRequest,
        WebhookAction, WebhookRequest,
    },
    engine::{OpenSession, SettlementEngine},
    errors::{EngineError, EngineResult},
    freespin::FreespinCommand,
    model::{AggregatorGame, Platform},
    money::ProviderAmount,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub registry: Arc<AdapterRegistry>,
    pub aggregators: Arc<AggregatorDirectory>,
    pub version: String,
}

impl AppState {
    fn resolve_aggregator(&self, identity: &str) -> Option<(AggregatorInfo, AggregatorAdapter)> {
        let info = self.aggregators.find_by_identity(identity)?;
        if !info.active {
            return None;
        }
        let adapter = self.registry.adapter(&info).ok()?;
        Some((info, adapter))
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
    })
}

/// The webhook dispatcher.
/// POST /{identity}/webhook
pub async fn webhook_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    // Unknown or inactive identities never reach the engine; there is
    // no codec to render with, so a bare 404 is the answer.
    let Some((_, adapter)) = state.resolve_aggregator(&identity) else {
        warn!(request = %request_id.0, %identity, "webhook for unknown aggregator");
        return StatusCode::NOT_FOUND.into_response();
    };

    let request = match adapter.codec.parse(&query, &body) {
        Ok(request) => request,
        Err(error) => {
            warn!(request = %request_id.0, %identity, %error, "webhook parse failed");
            return Json(adapter.codec.failure(&error)).into_response();
        }
    };

    match dispatch(&state.engine, &request).await {
        Ok(balance) => Json(adapter.codec.success(&balance)).into_response(),
        Err(error) => {
            info!(request = %request_id.0, %identity, %error, "webhook rejected");
            Json(adapter.codec.failure(&error)).into_response()
        }
    }
}

/// Map the normalized webhook action onto the engine operation.
async fn dispatch(
    engine: &SettlementEngine,
    request: &WebhookRequest,
) -> EngineResult<crate::model::Balance> {
    match request.action {
        WebhookAction::Balance => engine.find_balance(&request.session_token).await,
        WebhookAction::Bet => {
            engine
                .place_bet(
                    &request.session_token,
                    request.game_symbol.as_deref().unwrap_or_default(),
                    required(&request.external_round_id, "round id")?,
                    required(&request.external_transaction_id, "transaction id")?,
                    request.freespin_id.as_deref(),
                    required_amount(request)?,
                )
                .await
        }
        WebhookAction::Win => {
            engine
                .settle_bet(
                    &request.session_token,
                    required(&request.external_round_id, "round id")?,
                    required(&request.external_transaction_id, "transaction id")?,
                    request.reference_transaction_id.as_deref(),
                    request.freespin_id.as_deref(),
                    required_amount(request)?,
                    request.round_finished,
                )
                .await
        }
        WebhookAction::Refund => {
            engine
                .rollback_bet(
                    &request.session_token,
                    required(&request.external_round_id, "round id")?,
                    required(&request.external_transaction_id, "transaction id")?,
                    request.reference_transaction_id.as_deref(),
                    request.round_finished,
                )
                .await
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> EngineResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| EngineError::Validation(format!("missing {}", what)))
}

fn required_amount(request: &WebhookRequest) -> EngineResult<&ProviderAmount> {
    request
        .amount
        .as_ref()
        .ok_or_else(|| EngineError::Validation("missing amount".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct LaunchBody {
    pub aggregator: String,
    pub game_id: String,
    pub player_id: String,
    pub currency: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub platform: Platform,
    #[serde(default)]
    pub lobby_url: String,
    #[serde(default)]
    pub demo: bool,
    #[serde(default)]
    pub external_token: Option<String>,
}

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub session_token: String,
    pub url: String,
}

/// Open a session and build the provider launch URL.
/// POST /launch
pub async fn launch_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<LaunchBody>,
) -> Result<Json<LaunchResponse>, ApiError> {
    let fail = |e: EngineError| ApiError::new(request_id.0.clone(), e);

    let info = state
        .aggregators
        .find_by_identity(&body.aggregator)
        .ok_or_else(|| fail(EngineError::NotFound(format!("aggregator '{}'", body.aggregator))))?;
    let adapter = state.registry.adapter(&info).map_err(fail)?;

    let session = state
        .engine
        .open_session(
            &info,
            OpenSession {
                game_id: body.game_id.clone(),
                player_id: body.player_id.clone(),
                currency: body.currency.clone(),
                locale: body.locale.clone(),
                platform: body.platform,
                external_token: body.external_token.clone(),
            },
        )
        .await
        .map_err(fail)?;

    let url = adapter
        .launch
        .launch_url(&LaunchRequest {
            game_symbol: body.game_id,
            session_token: session.token.clone(),
            player_id: body.player_id,
            locale: body.locale,
            platform: body.platform,
            currency: body.currency,
            lobby_url: body.lobby_url,
            demo: body.demo,
        })
        .await
        .map_err(fail)?;

    Ok(Json(LaunchResponse {
        session_token: session.token,
        url,
    }))
}

/// Normalized upstream catalog for one aggregator.
/// GET /{identity}/games
pub async fn games_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Result<Json<Vec<AggregatorGame>>, ApiError> {
    let (_, adapter) = state.resolve_aggregator(&identity).ok_or_else(|| {
        ApiError::new(
            request_id.0.clone(),
            EngineError::NotFound(format!("aggregator '{}'", identity)),
        )
    })?;
    let games = adapter
        .games
        .list_games()
        .await
        .map_err(|e| ApiError::new(request_id.0.clone(), e))?;
    Ok(Json(games))
}

#[derive(Debug, Deserialize)]
pub struct FreespinBody {
    pub reference_id: String,
    pub player_id: String,
    pub game_symbol: String,
    pub currency: String,
    #[serde(default)]
    pub values: HashMap<String, i64>,
}

/// Issue a validated freespin preset upstream.
/// POST /{identity}/freespins
pub async fn freespin_create_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
    Json(body): Json<FreespinBody>,
) -> Result<StatusCode, ApiError> {
    let (_, adapter) = state.resolve_aggregator(&identity).ok_or_else(|| {
        ApiError::new(
            request_id.0.clone(),
            EngineError::NotFound(format!("aggregator '{}'", identity)),
        )
    })?;
    adapter
        .freespins
        .create_freespin(&FreespinCommand {
            reference_id: body.reference_id,
            player_id: body.player_id,
            game_symbol: body.game_symbol,
            currency: body.currency,
            values: body.values,
        })
        .await
        .map_err(|e| ApiError::new(request_id.0.clone(), e))?;
    Ok(StatusCode::CREATED)
}

/// POST /{identity}/freespins/{reference}/cancel
pub async fn freespin_cancel_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((identity, reference)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (_, adapter) = state.resolve_aggregator(&identity).ok_or_else(|| {
        ApiError::new(
            request_id.0.clone(),
            EngineError::NotFound(format!("aggregator '{}'", identity)),
        )
    })?;
    adapter
        .freespins
        .cancel_freespin(&reference)
        .await
        .map_err(|e| ApiError::new(request_id.0.clone(), e))?;
    Ok(StatusCode::NO_CONTENT)
}
