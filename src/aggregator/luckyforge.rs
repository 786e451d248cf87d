//! LuckyForge aggregator adapter
//!
//! JSON-body webhook protocol with decimal-string amounts. The request
//! body is `{"method", "session", "round", "tx", "ref_tx", "bonus_id",
//! "amount", "round_closed"}`; methods map as `balance|debit|credit|
//! cancel`. Success replies `{"ok": true, "balance": "12.50",
//! "currency": ...}`, failures `{"ok": false, "code", "restart",
//! "msg"}`.

use super::{
    AdapterFactory, AggregatorAdapter, AggregatorInfo, FreespinAdapter, GameSyncAdapter,
    LaunchAdapter, LaunchRequest, WebhookAction, WebhookCodec, WebhookRequest,
};
use crate::errors::{EngineError, EngineResult};
use crate::freespin::{validate_preset, FreespinCommand, PresetField, PresetSchema};
use crate::model::{AggregatorGame, Balance, Platform};
use crate::money::{CurrencyConverter, ProviderAmount};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LuckyForgeFactory {
    client: reqwest::Client,
}

impl LuckyForgeFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for LuckyForgeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for LuckyForgeFactory {
    fn build(&self, info: &AggregatorInfo) -> EngineResult<AggregatorAdapter> {
        let adapter = Arc::new(LuckyForgeAdapter {
            api_url: info.config_value("api_url")?.trim_end_matches('/').to_string(),
            merchant_key: info.config_value("merchant_key")?.to_string(),
            client: self.client.clone(),
            converter: CurrencyConverter::new(),
        });
        Ok(AggregatorAdapter {
            launch: adapter.clone(),
            games: adapter.clone(),
            freespins: adapter.clone(),
            codec: adapter,
        })
    }
}

pub struct LuckyForgeAdapter {
    api_url: String,
    merchant_key: String,
    client: reqwest::Client,
    converter: CurrencyConverter,
}

impl LuckyForgeAdapter {
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        call: &str,
        reference: &str,
        path: &str,
        body: serde_json::Value,
    ) -> EngineResult<T> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .client
            .post(&url)
            .header("x-merchant-key", &self.merchant_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::external(call, reference, e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::external(
                call,
                reference,
                format!("upstream returned {}", response.status()),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::external(call, reference, format!("malformed body: {}", e)))
    }
}

/// Inbound webhook body. LuckyForge sends camelCase keys.
#[derive(Debug, Deserialize)]
struct InboundBody {
    method: String,
    session: String,
    #[serde(default)]
    game: Option<String>,
    #[serde(default)]
    round: Option<String>,
    #[serde(default)]
    tx: Option<String>,
    #[serde(default, rename = "refTx", alias = "ref_tx")]
    ref_tx: Option<String>,
    #[serde(default, rename = "bonusId", alias = "bonus_id")]
    bonus_id: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default, rename = "roundClosed", alias = "round_closed")]
    round_closed: bool,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    #[serde(alias = "gameUrl")]
    game_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamGame {
    #[serde(alias = "gameCode")]
    code: String,
    #[serde(alias = "title")]
    name: String,
    #[serde(default, alias = "studio")]
    studio: String,
    #[serde(default, alias = "freespinsSupported")]
    freespins_supported: bool,
    #[serde(default, alias = "demoSupported")]
    demo_supported: bool,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    devices: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamPresetField {
    #[serde(alias = "minValue")]
    min_value: Option<i64>,
    #[serde(alias = "maxValue")]
    max_value: Option<i64>,
    #[serde(alias = "defaultValue")]
    default_value: Option<i64>,
}

#[async_trait]
impl LaunchAdapter for LuckyForgeAdapter {
    async fn launch_url(&self, request: &LaunchRequest) -> EngineResult<String> {
        let body: LaunchResponse = self
            .post_json(
                "luckyforge.launch",
                &request.session_token,
                "/sessions",
                json!({
                    "game": request.game_symbol,
                    "session": request.session_token,
                    "player": request.player_id,
                    "language": request.locale,
                    "device": request.platform.to_string(),
                    "currency": request.currency,
                    "returnUrl": request.lobby_url,
                    "demo": request.demo,
                }),
            )
            .await?;
        body.game_url.ok_or_else(|| {
            EngineError::external(
                "luckyforge.launch",
                &request.session_token,
                "response carried no game url",
            )
        })
    }
}

#[async_trait]
impl GameSyncAdapter for LuckyForgeAdapter {
    async fn list_games(&self) -> EngineResult<Vec<AggregatorGame>> {
        let url = format!("{}/games", self.api_url);
        let response = self
            .client
            .get(&url)
            .header("x-merchant-key", &self.merchant_key)
            .send()
            .await
            .map_err(|e| EngineError::external("luckyforge.games", &url, e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::external(
                "luckyforge.games",
                &url,
                format!("upstream returned {}", response.status()),
            ));
        }
        let upstream: Vec<UpstreamGame> = response
            .json()
            .await
            .map_err(|e| EngineError::external("luckyforge.games", &url, format!("malformed body: {}", e)))?;
        Ok(upstream
            .into_iter()
            .map(|game| AggregatorGame {
                symbol: game.code,
                name: game.name,
                provider_name: game.studio,
                has_freespins: game.freespins_supported,
                has_demo: game.demo_supported,
                locales: game.languages,
                platforms: game
                    .devices
                    .iter()
                    .filter_map(|d| match d.to_ascii_lowercase().as_str() {
                        "desktop" => Some(Platform::Desktop),
                        "mobile" => Some(Platform::Mobile),
                        _ => None,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[async_trait]
impl FreespinAdapter for LuckyForgeAdapter {
    async fn preset(&self, game_symbol: &str) -> EngineResult<PresetSchema> {
        let upstream: HashMap<String, UpstreamPresetField> = self
            .post_json(
                "luckyforge.preset",
                game_symbol,
                "/freespins/schema",
                json!({ "game": game_symbol }),
            )
            .await?;
        Ok(upstream
            .into_iter()
            .map(|(field, bounds)| {
                (
                    field,
                    PresetField {
                        minimal: bounds.min_value,
                        maximum: bounds.max_value,
                        default: bounds.default_value,
                    },
                )
            })
            .collect())
    }

    async fn create_freespin(&self, command: &FreespinCommand) -> EngineResult<()> {
        let schema = self.preset(&command.game_symbol).await?;
        let values = validate_preset(&command.values, &schema)?;
        let _: serde_json::Value = self
            .post_json(
                "luckyforge.freespin_create",
                &command.reference_id,
                "/freespins",
                json!({
                    "reference": command.reference_id,
                    "player": command.player_id,
                    "game": command.game_symbol,
                    "currency": command.currency,
                    "settings": values,
                }),
            )
            .await?;
        Ok(())
    }

    async fn cancel_freespin(&self, reference_id: &str) -> EngineResult<()> {
        let _: serde_json::Value = self
            .post_json(
                "luckyforge.freespin_cancel",
                reference_id,
                "/freespins/cancel",
                json!({ "reference": reference_id }),
            )
            .await?;
        Ok(())
    }
}

impl WebhookCodec for LuckyForgeAdapter {
    fn parse(&self, _query: &HashMap<String, String>, body: &[u8]) -> EngineResult<WebhookRequest> {
        let inbound: InboundBody = serde_json::from_slice(body)
            .map_err(|e| EngineError::Validation(format!("malformed webhook body: {}", e)))?;
        let action = match inbound.method.as_str() {
            "balance" => WebhookAction::Balance,
            "debit" => WebhookAction::Bet,
            "credit" => WebhookAction::Win,
            "cancel" => WebhookAction::Refund,
            other => {
                return Err(EngineError::Validation(format!("unknown method '{}'", other)))
            }
        };
        if action != WebhookAction::Balance && (inbound.tx.is_none() || inbound.round.is_none()) {
            return Err(EngineError::Validation(
                "debit/credit/cancel require tx and round".to_string(),
            ));
        }
        Ok(WebhookRequest {
            action,
            session_token: inbound.session,
            game_symbol: inbound.game,
            external_round_id: inbound.round,
            external_transaction_id: inbound.tx,
            reference_transaction_id: inbound.ref_tx,
            freespin_id: inbound.bonus_id,
            amount: inbound.amount.map(ProviderAmount::Decimal),
            round_finished: inbound.round_closed,
        })
    }

    fn success(&self, balance: &Balance) -> serde_json::Value {
        json!({
            "ok": true,
            "balance": self.converter.to_provider_decimal(balance.total(), &balance.currency),
            "currency": balance.currency,
        })
    }

    fn failure(&self, error: &EngineError) -> serde_json::Value {
        let (code, restart, msg) = match error {
            EngineError::SessionInvalid => ("SESSION_EXPIRED", true, "session expired"),
            EngineError::InsufficientBalance { .. } => ("NO_FUNDS", false, "not enough funds"),
            EngineError::BetLimitExceeded { .. } => ("LIMIT_REACHED", false, "bet limit reached"),
            EngineError::RoundFinished { .. } => ("ROUND_CLOSED", false, "round closed"),
            EngineError::RoundNotFound(_) | EngineError::NotFound(_) => {
                ("TX_UNKNOWN", false, "transaction unknown")
            }
            EngineError::ExternalService { .. } => ("TRY_AGAIN", false, "temporary failure"),
            EngineError::IllegalState(_) | EngineError::DuplicateEntity(_) => {
                ("TX_CONFLICT", false, "transaction conflict")
            }
            _ => ("BAD_REQUEST", false, "invalid request"),
        };
        json!({
            "ok": false,
            "code": code,
            "restart": restart,
            "msg": msg,
        })
    }
}
