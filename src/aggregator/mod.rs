//! Aggregator adapter abstraction
//!
//! Each third-party aggregator speaks its own wire protocol and money
//! encoding. The engine talks to all of them through the capability
//! traits here; per-kind factories build adapters bound to a single
//! aggregator's configuration. Aggregator behavior never leaks into the
//! settlement engine itself.

pub mod luckyforge;
pub mod spinline;

use crate::errors::{EngineError, EngineResult};
use crate::freespin::{FreespinCommand, PresetSchema};
use crate::model::{AggregatorGame, Balance, Platform};
use crate::money::ProviderAmount;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Supported aggregator protocol families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorKind {
    SpinLine,
    LuckyForge,
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorKind::SpinLine => write!(f, "spinline"),
            AggregatorKind::LuckyForge => write!(f, "luckyforge"),
        }
    }
}

impl FromStr for AggregatorKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spinline" => Ok(AggregatorKind::SpinLine),
            "luckyforge" => Ok(AggregatorKind::LuckyForge),
            other => Err(EngineError::AggregatorNotSupported(other.to_string())),
        }
    }
}

/// Read-only configuration for one registered aggregator. Config keys
/// are aggregator-specific (API keys, gateway URLs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorInfo {
    pub id: Uuid,
    /// URL path segment the aggregator calls back on.
    pub identity: String,
    pub kind: AggregatorKind,
    pub config: HashMap<String, String>,
    pub active: bool,
}

impl AggregatorInfo {
    /// Required config key lookup, `Validation` if missing.
    pub fn config_value(&self, key: &str) -> EngineResult<&str> {
        self.config
            .get(key)
            .map(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "aggregator '{}' is missing config key '{}'",
                    self.identity, key
                ))
            })
    }
}

/// Generic launch parameters, translated by each adapter into the
/// provider's own launch query or payload.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub game_symbol: String,
    pub session_token: String,
    pub player_id: String,
    pub locale: String,
    pub platform: Platform,
    pub currency: String,
    pub lobby_url: String,
    pub demo: bool,
}

/// Normalized inbound webhook call, regardless of the aggregator's wire
/// shape. Monetary amounts stay in the provider's encoding; the engine
/// converts them once the session (and with it the currency) is known.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub action: WebhookAction,
    pub session_token: String,
    pub game_symbol: Option<String>,
    pub external_round_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub reference_transaction_id: Option<String>,
    pub freespin_id: Option<String>,
    pub amount: Option<ProviderAmount>,
    pub round_finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Balance,
    Bet,
    Win,
    Refund,
}

#[async_trait]
pub trait LaunchAdapter: Send + Sync {
    /// Build the provider launch URL. Fails `ExternalService` on a
    /// non-success upstream response; never returns a partial URL.
    async fn launch_url(&self, request: &LaunchRequest) -> EngineResult<String>;
}

#[async_trait]
pub trait GameSyncAdapter: Send + Sync {
    /// Fetch the upstream catalog in the normalized shape.
    async fn list_games(&self) -> EngineResult<Vec<AggregatorGame>>;
}

#[async_trait]
pub trait FreespinAdapter: Send + Sync {
    async fn preset(&self, game_symbol: &str) -> EngineResult<PresetSchema>;

    /// Validate the command against the live preset schema, then issue
    /// it upstream. On upstream rejection the bonus state is unknown;
    /// callers must re-query rather than assume.
    async fn create_freespin(&self, command: &FreespinCommand) -> EngineResult<()>;

    async fn cancel_freespin(&self, reference_id: &str) -> EngineResult<()>;
}

/// Per-aggregator webhook wire codec: parse the inbound request, render
/// the success envelope, and map internal errors onto the aggregator's
/// own error vocabulary.
pub trait WebhookCodec: Send + Sync {
    fn parse(
        &self,
        query: &HashMap<String, String>,
        body: &[u8],
    ) -> EngineResult<WebhookRequest>;

    fn success(&self, balance: &Balance) -> serde_json::Value;

    /// Unmapped kinds must fall back to the aggregator's generic
    /// invalid-request code rather than leaking internal detail.
    fn failure(&self, error: &EngineError) -> serde_json::Value;
}

/// Capability bundle bound to one aggregator's configuration.
#[derive(Clone)]
pub struct AggregatorAdapter {
    pub launch: Arc<dyn LaunchAdapter>,
    pub games: Arc<dyn GameSyncAdapter>,
    pub freespins: Arc<dyn FreespinAdapter>,
    pub codec: Arc<dyn WebhookCodec>,
}

impl std::fmt::Debug for AggregatorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorAdapter").finish_non_exhaustive()
    }
}

pub trait AdapterFactory: Send + Sync {
    fn build(&self, info: &AggregatorInfo) -> EngineResult<AggregatorAdapter>;
}

/// Registry of adapter factories keyed by aggregator kind.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<AggregatorKind, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every shipped protocol family registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AggregatorKind::SpinLine, Arc::new(spinline::SpinLineFactory::new()));
        registry.register(AggregatorKind::LuckyForge, Arc::new(luckyforge::LuckyForgeFactory::new()));
        registry
    }

    pub fn register(&mut self, kind: AggregatorKind, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn factory(&self, kind: AggregatorKind) -> Option<Arc<dyn AdapterFactory>> {
        self.factories.get(&kind).cloned()
    }

    /// Build the adapter bundle for one aggregator, or
    /// `AggregatorNotSupported` if its kind has no factory.
    pub fn adapter(&self, info: &AggregatorInfo) -> EngineResult<AggregatorAdapter> {
        self.factory(info.kind)
            .ok_or_else(|| EngineError::AggregatorNotSupported(info.kind.to_string()))?
            .build(info)
    }

    /// Whether a factory exists for the kind; the engine rejects
    /// webhook work for sessions whose aggregator has none.
    pub fn supports(&self, kind: AggregatorKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

/// Lookup of registered aggregators by id and by callback identity.
#[derive(Default)]
pub struct AggregatorDirectory {
    by_id: DashMap<Uuid, AggregatorInfo>,
    by_identity: DashMap<String, Uuid>,
}

impl AggregatorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: AggregatorInfo) {
        self.by_identity.insert(info.identity.clone(), info.id);
        self.by_id.insert(info.id, info);
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<AggregatorInfo> {
        self.by_id.get(&id).map(|i| i.clone())
    }

    pub fn find_by_identity(&self, identity: &str) -> Option<AggregatorInfo> {
        let id = self.by_identity.get(identity)?;
        self.find_by_id(*id)
    }
}
