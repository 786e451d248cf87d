//! Domain events published to downstream analytics and bonus workers
//!
//! Publishing is fire-and-forget: a failure is logged and never fails
//! the webhook response.

use crate::model::{Balance, SpinKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    SessionOpened {
        session_id: Uuid,
        aggregator_id: Uuid,
        player_id: String,
        game_id: String,
        currency: String,
    },
    SpinSettled {
        session_id: Uuid,
        round_id: Uuid,
        spin_id: Uuid,
        kind: SpinKind,
        real_amount: i64,
        bonus_amount: i64,
        balance_after: Balance,
    },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// Publisher that emits events as structured log lines. Stands in for a
/// message-queue transport, which is outside this crate.
#[derive(Default)]
pub struct TracingPublisher;

impl TracingPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(target: "gamebridge::events", %payload, "domain event"),
            Err(e) => warn!("failed to serialize domain event: {}", e),
        }
    }
}
