//! SpinLine aggregator adapter
//!
//! Query-string webhook protocol with integer-cent amounts:
//! `?action={balance|bet|win|refund}&extra={token}&game_id=&transaction_id=
//! &round_id=&freerounds_id=&amount=&ext_round_finished={0|1}`.
//! Responses are a small JSON envelope: `{status, balance, currency}` on
//! success, `{status, error: {code, display, action, message,
//! description}}` on failure.

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

pub struct SpinLineFactory {
    client: reqwest::Client,
}

impl SpinLineFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SpinLineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for SpinLineFactory {
    fn build(&self, info: &AggregatorInfo) -> EngineResult<AggregatorAdapter> {
        let adapter = Arc::new(SpinLineAdapter {
            gateway_url: info.config_value("gateway_url")?.trim_end_matches('/').to_string(),
            api_key: info.config_value("api_key")?.to_string(),
            operator_id: info.config_value("operator_id")?.to_string(),
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

/// Adapter bound to one SpinLine aggregator's gateway and credentials.
pub struct SpinLineAdapter {
    gateway_url: String,
    api_key: String,
    operator_id: String,
    client: reqwest::Client,
    converter: CurrencyConverter,
}

impl SpinLineAdapter {
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        call: &str,
        url: String,
        query: &[(&str, &str)],
    ) -> EngineResult<T> {
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("operator", self.operator_id.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| EngineError::external(call, &url, e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::external(
                call,
                &url,
                format!("upstream returned {}", response.status()),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::external(call, &url, format!("malformed body: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    url: Option<String>,
}

/// Upstream catalog entry; SpinLine serves PascalCase field names.
#[derive(Debug, Deserialize)]
struct UpstreamGame {
    #[serde(alias = "Symbol")]
    symbol: String,
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "Provider", default)]
    provider: String,
    #[serde(alias = "HasFreespins", default)]
    has_freespins: bool,
    #[serde(alias = "HasDemo", default)]
    has_demo: bool,
    #[serde(alias = "Locales", default)]
    locales: Vec<String>,
    #[serde(alias = "Mobile", default)]
    mobile: bool,
    #[serde(alias = "Desktop", default = "default_true")]
    desktop: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct UpstreamPresetField {
    #[serde(alias = "Min")]
    min: Option<i64>,
    #[serde(alias = "Max")]
    max: Option<i64>,
    #[serde(alias = "Default")]
    default: Option<i64>,
}

#[async_trait]
impl LaunchAdapter for SpinLineAdapter {
    async fn launch_url(&self, request: &LaunchRequest) -> EngineResult<String> {
        let url = format!("{}/v1/launch", self.gateway_url);
        let demo = if request.demo { "1" } else { "0" };
        let platform = request.platform.to_string();
        let body: LaunchResponse = self
            .get_json(
                "spinline.launch",
                url.clone(),
                &[
                    ("game_id", request.game_symbol.as_str()),
                    ("extra", request.session_token.as_str()),
                    ("player_id", request.player_id.as_str()),
                    ("lang", request.locale.as_str()),
                    ("platform", platform.as_str()),
                    ("currency", request.currency.as_str()),
                    ("lobby", request.lobby_url.as_str()),
                    ("demo", demo),
                ],
            )
            .await?;
        body.url
            .ok_or_else(|| EngineError::external("spinline.launch", url, "response carried no url"))
    }
}

#[async_trait]
impl GameSyncAdapter for SpinLineAdapter {
    async fn list_games(&self) -> EngineResult<Vec<AggregatorGame>> {
        let url = format!("{}/v1/games", self.gateway_url);
        let upstream: Vec<UpstreamGame> = self.get_json("spinline.games", url, &[]).await?;
        Ok(upstream
            .into_iter()
            .map(|game| {
                let mut platforms = Vec::new();
                if game.desktop {
                    platforms.push(Platform::Desktop);
                }
                if game.mobile {
                    platforms.push(Platform::Mobile);
                }
                AggregatorGame {
                    symbol: game.symbol,
                    name: game.name,
                    provider_name: game.provider,
                    has_freespins: game.has_freespins,
                    has_demo: game.has_demo,
                    locales: game.locales,
                    platforms,
                }
            })
            .collect())
    }
}

#[async_trait]
impl FreespinAdapter for SpinLineAdapter {
    async fn preset(&self, game_symbol: &str) -> EngineResult<PresetSchema> {
        let url = format!("{}/v1/freespins/preset", self.gateway_url);
        let upstream: HashMap<String, UpstreamPresetField> = self
            .get_json("spinline.preset", url, &[("game_id", game_symbol)])
            .await?;
        Ok(upstream
            .into_iter()
            .map(|(field, bounds)| {
                (
                    field,
                    PresetField {
                        minimal: bounds.min,
                        maximum: bounds.max,
                        default: bounds.default,
                    },
                )
            })
            .collect())
    }

    async fn create_freespin(&self, command: &FreespinCommand) -> EngineResult<()> {
        let schema = self.preset(&command.game_symbol).await?;
        let values = validate_preset(&command.values, &schema)?;

        let url = format!("{}/v1/freespins", self.gateway_url);
        let response = self
            .client
            .post(&url)
            .query(&[("api_key", self.api_key.as_str()), ("operator", self.operator_id.as_str())])
            .json(&json!({
                "reference": command.reference_id,
                "player_id": command.player_id,
                "game_id": command.game_symbol,
                "currency": command.currency,
                "values": values,
            }))
            .send()
            .await
            .map_err(|e| EngineError::external("spinline.freespin_create", &command.reference_id, e.to_string()))?;
        if !response.status().is_success() {
            // The bonus may or may not exist upstream at this point; the
            // caller must re-query rather than assume either way.
            return Err(EngineError::external(
                "spinline.freespin_create",
                &command.reference_id,
                format!("upstream returned {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn cancel_freespin(&self, reference_id: &str) -> EngineResult<()> {
        let url = format!("{}/v1/freespins/cancel", self.gateway_url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("operator", self.operator_id.as_str()),
                ("reference", reference_id),
            ])
            .send()
            .await
            .map_err(|e| EngineError::external("spinline.freespin_cancel", reference_id, e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::external(
                "spinline.freespin_cancel",
                reference_id,
                format!("upstream returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

fn required<'a>(query: &'a HashMap<String, String>, key: &str) -> EngineResult<&'a str> {
    query
        .get(key)
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::Validation(format!("missing required parameter '{}'", key)))
}

impl WebhookCodec for SpinLineAdapter {
    fn parse(&self, query: &HashMap<String, String>, _body: &[u8]) -> EngineResult<WebhookRequest> {
        let action = match required(query, "action")? {
            "balance" => WebhookAction::Balance,
            "bet" => WebhookAction::Bet,
            "win" => WebhookAction::Win,
            "refund" => WebhookAction::Refund,
            other => {
                return Err(EngineError::Validation(format!("unknown action '{}'", other)))
            }
        };
        let session_token = required(query, "extra")?.to_string();
        let amount = match query.get("amount").filter(|a| !a.is_empty()) {
            Some(raw) => Some(ProviderAmount::Cents(raw.parse::<i64>().map_err(|_| {
                EngineError::Validation(format!("malformed amount '{}'", raw))
            })?)),
            None => None,
        };
        let round_finished = matches!(query.get("ext_round_finished").map(|v| v.as_str()), Some("1"));

        if action != WebhookAction::Balance {
            required(query, "transaction_id")?;
            required(query, "round_id")?;
        }

        Ok(WebhookRequest {
            action,
            session_token,
            game_symbol: query.get("game_id").cloned(),
            external_round_id: query.get("round_id").cloned(),
            external_transaction_id: query.get("transaction_id").cloned(),
            // SpinLine carries no reference parameter; the engine
            // resolves the PLACE through the round instead.
            reference_transaction_id: None,
            freespin_id: query.get("freerounds_id").filter(|v| !v.is_empty()).cloned(),
            amount,
            round_finished,
        })
    }

    fn success(&self, balance: &Balance) -> serde_json::Value {
        json!({
            "status": 200,
            "balance": self.converter.to_provider_cents(balance.total(), &balance.currency),
            "currency": balance.currency,
        })
    }

    fn failure(&self, error: &EngineError) -> serde_json::Value {
        // SpinLine's own error vocabulary: `action` tells the game
        // client whether to retry the call or restart the session, and
        // `display` whether the message is player-facing.
        let (code, display, action, message) = match error {
            EngineError::SessionInvalid => {
                ("ERR_SESSION", false, "restart", "session token invalid or expired")
            }
            EngineError::InsufficientBalance { .. } => {
                ("ERR_FUNDS", true, "none", "insufficient balance")
            }
            EngineError::BetLimitExceeded { .. } => {
                ("ERR_BET_LIMIT", true, "none", "bet limit exceeded")
            }
            EngineError::RoundFinished { .. } => {
                ("ERR_ROUND_CLOSED", false, "none", "round already finished")
            }
            EngineError::RoundNotFound(_) | EngineError::NotFound(_) => {
                ("ERR_ROUND_UNKNOWN", false, "retry", "round or bet not found")
            }
            EngineError::ExternalService { .. } => {
                ("ERR_UPSTREAM", false, "retry", "temporary upstream failure")
            }
            EngineError::GameUnavailable(_) => {
                ("ERR_GAME", true, "restart", "game unavailable")
            }
            EngineError::IllegalState(_) | EngineError::DuplicateEntity(_) => {
                ("ERR_CONFLICT", false, "none", "conflicting transaction state")
            }
            // Generic fallback; internal detail stays internal.
            _ => ("ERR_REQUEST", false, "none", "invalid request"),
        };
        json!({
            "status": 400,
            "error": {
                "code": code,
                "display": display,
                "action": action,
                "message": message,
                "description": format!("{} rejected by operator", code),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SpinLineAdapter {
        SpinLineAdapter {
            gateway_url: "http://upstream.test".to_string(),
            api_key: "k".to_string(),
            operator_id: "op".to_string(),
            client: reqwest::Client::new(),
            converter: CurrencyConverter::new(),
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_bet() {
        let request = adapter()
            .parse(
                &query(&[
                    ("action", "bet"),
                    ("extra", "tok1"),
                    ("game_id", "book-of-tests"),
                    ("transaction_id", "tx1"),
                    ("round_id", "r1"),
                    ("amount", "100"),
                ]),
                b"",
            )
            .unwrap();
        assert_eq!(request.action, WebhookAction::Bet);
        assert_eq!(request.session_token, "tok1");
        assert_eq!(request.amount, Some(ProviderAmount::Cents(100)));
        assert!(!request.round_finished);
        assert!(request.freespin_id.is_none());
    }

    #[test]
    fn test_parse_win_with_round_finish() {
        let request = adapter()
            .parse(
                &query(&[
                    ("action", "win"),
                    ("extra", "tok1"),
                    ("transaction_id", "tx2"),
                    ("round_id", "r1"),
                    ("amount", "250"),
                    ("ext_round_finished", "1"),
                ]),
                b"",
            )
            .unwrap();
        assert_eq!(request.action, WebhookAction::Win);
        assert!(request.round_finished);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let adapter = adapter();
        assert!(adapter.parse(&query(&[("action", "bet"), ("extra", "tok1")]), b"").is_err());
        assert!(adapter.parse(&query(&[("action", "spin"), ("extra", "tok1")]), b"").is_err());
        assert!(adapter.parse(&query(&[("action", "balance")]), b"").is_err());
    }

    #[test]
    fn test_success_envelope_uses_provider_cents() {
        let body = adapter().success(&Balance {
            real: 900,
            bonus: 100,
            currency: "EUR".to_string(),
        });
        assert_eq!(body["status"], 200);
        assert_eq!(body["balance"], 1_000);
        assert_eq!(body["currency"], "EUR");
    }

    #[test]
    fn test_failure_maps_known_kinds() {
        let body = adapter().failure(&EngineError::SessionInvalid);
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"]["code"], "ERR_SESSION");
        assert_eq!(body["error"]["action"], "restart");

        let body = adapter().failure(&EngineError::InsufficientBalance {
            player_id: "p1".to_string(),
        });
        assert_eq!(body["error"]["code"], "ERR_FUNDS");
        assert_eq!(body["error"]["display"], true);
    }

    #[test]
    fn test_failure_generic_fallback_leaks_nothing() {
        let body = adapter().failure(&EngineError::InvalidPreset {
            field: "quantity".to_string(),
            reason: "internal bound detail".to_string(),
        });
        assert_eq!(body["error"]["code"], "ERR_REQUEST");
        assert!(!body.to_string().contains("internal bound detail"));
    }
}
