//! Domain model for sessions, rounds and spins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client platform the game was launched on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Mobile,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Desktop => write!(f, "desktop"),
            Platform::Mobile => write!(f, "mobile"),
        }
    }
}

/// One player's launched-game context. Created at launch, immutable
/// thereafter; `token` is the external lookup key the aggregator echoes
/// back on every webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub game_id: String,
    pub aggregator_id: Uuid,
    pub player_id: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_token: Option<String>,
    pub currency: String,
    pub locale: String,
    pub platform: Platform,
}

/// An aggregator-defined unit of play. May span multiple spins (base
/// spin plus bonus spins). Unique on `(session_id, external_round_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub session_id: Uuid,
    pub game_id: String,
    pub external_round_id: String,
    pub finished: bool,
}

/// Wallet-affecting event kind inside a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpinKind {
    Place,
    Settle,
    Rollback,
}

impl fmt::Display for SpinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinKind::Place => write!(f, "place"),
            SpinKind::Settle => write!(f, "settle"),
            SpinKind::Rollback => write!(f, "rollback"),
        }
    }
}

/// One wallet-affecting webhook call. Immutable once created; unique on
/// `external_transaction_id`, which is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spin {
    pub id: Uuid,
    pub round_id: Uuid,
    pub kind: SpinKind,
    pub real_amount: i64,
    pub bonus_amount: i64,
    pub external_transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_spin_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freespin_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Player balance in minor units, derived on demand from the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub real: i64,
    pub bonus: i64,
    pub currency: String,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.real + self.bonus
    }
}

/// Normalized catalog entry returned by a game-sync adapter, regardless
/// of upstream field names and casing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorGame {
    pub symbol: String,
    pub name: String,
    pub provider_name: String,
    pub has_freespins: bool,
    pub has_demo: bool,
    pub locales: Vec<String>,
    pub platforms: Vec<Platform>,
}
