//! gamebridge - Game Aggregation Settlement Gateway
//!
//! Brokers real-money game sessions between an operator platform and
//! third-party game aggregators: launches players into remote game
//! clients, then turns the aggregators' webhook callbacks into
//! idempotent wallet operations through a session/round/spin state
//! machine. Per-aggregator adapters translate the one internal
//! settlement contract to each aggregator's wire protocol and money
//! encoding.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod freespin;
pub mod model;
pub mod money;
pub mod store;
pub mod wallet;

use crate::aggregator::{AggregatorDirectory, AdapterRegistry};
use crate::config::GatewayConfig;
use crate::engine::SettlementEngine;
use crate::events::{EventPublisher, TracingPublisher};
use crate::store::{MemoryStore, SessionStore};
use crate::wallet::{MemoryLimits, MemoryWallet, PlayerLimits, Wallet};
use std::sync::Arc;

/// Everything the server needs, built by explicit construction; there
/// is no service locator.
pub struct Services {
    pub engine: Arc<SettlementEngine>,
    pub registry: Arc<AdapterRegistry>,
    pub aggregators: Arc<AggregatorDirectory>,
}

/// Composition root. Collaborators default to the in-process
/// implementations; callers with real store/wallet backends pass their
/// own.
pub fn compose(
    config: &GatewayConfig,
    store: Option<Arc<dyn SessionStore>>,
    wallet: Option<Arc<dyn Wallet>>,
    limits: Option<Arc<dyn PlayerLimits>>,
    events: Option<Arc<dyn EventPublisher>>,
) -> Services {
    let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
    let wallet = wallet.unwrap_or_else(|| Arc::new(MemoryWallet::new()));
    let limits = limits.unwrap_or_else(|| Arc::new(MemoryLimits::new()));
    let events = events.unwrap_or_else(|| Arc::new(TracingPublisher::new()));

    let registry = Arc::new(AdapterRegistry::with_defaults());
    let aggregators = Arc::new(AggregatorDirectory::new());
    for entry in config.aggregators.clone() {
        aggregators.insert(entry.into_info());
    }

    let engine = Arc::new(SettlementEngine::new(
        store,
        wallet,
        limits,
        events,
        registry.clone(),
        aggregators.clone(),
    ));

    Services {
        engine,
        registry,
        aggregators,
    }
}
