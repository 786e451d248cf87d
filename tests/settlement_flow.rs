//! End-to-end settlement flows: engine semantics driven the way the
//! webhook surface drives them, including the full HTTP dispatch path
//! for the SpinLine protocol.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use gamebridge::{
    aggregator::AggregatorKind,
    api::{handlers::AppState, routes::create_router},
    compose,
    config::{AggregatorEntry, GatewayConfig},
    engine::OpenSession,
    errors::{EngineError, EngineResult},
    model::{Balance, Platform},
    money::ProviderAmount,
    wallet::{MemoryWallet, Wallet},
    Services,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::ServiceExt;

fn gateway_config() -> GatewayConfig {
    let mut config = HashMap::new();
    config.insert("gateway_url".to_string(), "http://upstream.test".to_string());
    config.insert("api_key".to_string(), "k".to_string());
    config.insert("operator_id".to_string(), "op".to_string());
    GatewayConfig {
        aggregators: vec![AggregatorEntry {
            identity: "spinline-eu".to_string(),
            kind: AggregatorKind::SpinLine,
            active: true,
            config,
        }],
        ..GatewayConfig::default()
    }
}

fn services_with_funds(real: i64) -> Services {
    compose(
        &gateway_config(),
        None,
        Some(Arc::new(MemoryWallet::with_balance("p1", "EUR", real, 0))),
        None,
        None,
    )
}

async fn open_session(services: &Services) -> String {
    let info = services
        .aggregators
        .find_by_identity("spinline-eu")
        .expect("configured aggregator");
    services
        .engine
        .open_session(
            &info,
            OpenSession {
                game_id: "book-of-tests".to_string(),
                player_id: "p1".to_string(),
                currency: "EUR".to_string(),
                locale: "en".to_string(),
                platform: Platform::Desktop,
                external_token: None,
            },
        )
        .await
        .expect("session opens")
        .token
}

#[tokio::test]
async fn place_settle_replay_nets_plus_150() {
    let services = services_with_funds(1_000);
    let token = open_session(&services).await;
    let engine = &services.engine;

    let after_bet = engine
        .place_bet(&token, "g", "r1", "tx1", None, &ProviderAmount::Cents(100))
        .await
        .unwrap();
    assert_eq!(after_bet.real, 900);

    let after_win = engine
        .settle_bet(&token, "r1", "tx2", Some("tx1"), None, &ProviderAmount::Cents(250), true)
        .await
        .unwrap();
    assert_eq!(after_win.real, 1_150);

    let replay = engine
        .settle_bet(&token, "r1", "tx2", Some("tx1"), None, &ProviderAmount::Cents(250), true)
        .await
        .unwrap();
    assert_eq!(replay, after_win);
}

#[tokio::test]
async fn concurrent_duplicate_bets_debit_once() {
    let services = services_with_funds(1_000);
    let token = open_session(&services).await;

    let a = {
        let engine = services.engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .place_bet(&token, "g", "r1", "tx1", None, &ProviderAmount::Cents(100))
                .await
        })
    };
    let b = {
        let engine = services.engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .place_bet(&token, "g", "r1", "tx1", None, &ProviderAmount::Cents(100))
                .await
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_ok() && b.is_ok());

    // Exactly one debit regardless of interleaving.
    let balance = services.engine.find_balance(&token).await.unwrap();
    assert_eq!(balance.real, 900);
}

#[tokio::test]
async fn rollback_restores_pre_place_balance() {
    let services = services_with_funds(1_000);
    let token = open_session(&services).await;
    let engine = &services.engine;

    engine
        .place_bet(&token, "g", "r2", "tx1", None, &ProviderAmount::Cents(300))
        .await
        .unwrap();
    let restored = engine
        .rollback_bet(&token, "r2", "tx2", Some("tx1"), false)
        .await
        .unwrap();
    assert_eq!(restored.real, 1_000);

    // Round is still open after a plain rollback.
    assert!(engine
        .place_bet(&token, "g", "r2", "tx3", None, &ProviderAmount::Cents(100))
        .await
        .is_ok());
}

/// Wallet that parks one specific reference id until released, to pin
/// down interleavings where a wallet call is in flight while another
/// webhook lands.
struct StallWallet {
    inner: MemoryWallet,
    stall_reference: String,
    gate: Semaphore,
}

impl StallWallet {
    fn new(inner: MemoryWallet, stall_reference: &str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            stall_reference: stall_reference.to_string(),
            gate: Semaphore::new(0),
        })
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    async fn hold(&self, reference_id: &str) {
        if reference_id == self.stall_reference {
            self.gate.acquire().await.expect("gate open").forget();
        }
    }
}

#[async_trait]
impl Wallet for StallWallet {
    async fn find_balance(&self, player_id: &str, currency: &str) -> EngineResult<Balance> {
        self.inner.find_balance(player_id, currency).await
    }

    async fn withdraw(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance> {
        self.hold(reference_id).await;
        self.inner
            .withdraw(player_id, reference_id, currency, real, bonus)
            .await
    }

    async fn deposit(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance> {
        self.hold(reference_id).await;
        self.inner
            .deposit(player_id, reference_id, currency, real, bonus)
            .await
    }
}

#[tokio::test]
async fn concurrent_settle_and_rollback_apply_only_one() {
    // The settle's credit is parked mid-flight; the rollback arriving
    // meanwhile must lose before any money moves.
    let wallet = StallWallet::new(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), "tx2");
    let services = compose(&gateway_config(), None, Some(wallet.clone()), None, None);
    let token = open_session(&services).await;

    services
        .engine
        .place_bet(&token, "g", "r1", "tx1", None, &ProviderAmount::Cents(100))
        .await
        .unwrap();

    let settle = {
        let engine = services.engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .settle_bet(&token, "r1", "tx2", Some("tx1"), None, &ProviderAmount::Cents(250), true)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rollback = services
        .engine
        .rollback_bet(&token, "r1", "tx3", Some("tx1"), false)
        .await;
    assert!(matches!(rollback, Err(EngineError::IllegalState(_))));

    wallet.release();
    let settled = settle.await.unwrap().unwrap();
    assert_eq!(settled.real, 1_150);
    let balance = services.engine.find_balance(&token).await.unwrap();
    assert_eq!(balance.real, 1_150);
}

#[tokio::test]
async fn bet_in_flight_when_round_finishes_is_rejected_and_refunded() {
    // A bet that read the round as open stalls in the wallet while a
    // settle finishes the round; the bet must be rejected and its debit
    // handed back.
    let wallet = StallWallet::new(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), "tx3");
    let services = compose(&gateway_config(), None, Some(wallet.clone()), None, None);
    let token = open_session(&services).await;

    services
        .engine
        .place_bet(&token, "g", "r1", "tx1", None, &ProviderAmount::Cents(100))
        .await
        .unwrap();

    let late_bet = {
        let engine = services.engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .place_bet(&token, "g", "r1", "tx3", None, &ProviderAmount::Cents(100))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    services
        .engine
        .settle_bet(&token, "r1", "tx2", Some("tx1"), None, &ProviderAmount::Cents(250), true)
        .await
        .unwrap();

    wallet.release();
    let result = late_bet.await.unwrap();
    assert!(matches!(result, Err(EngineError::RoundFinished { .. })));
    let balance = services.engine.find_balance(&token).await.unwrap();
    assert_eq!(balance.real, 1_150);
}

fn app(services: &Services) -> axum::Router {
    let state = Arc::new(AppState {
        engine: services.engine.clone(),
        registry: services.registry.clone(),
        aggregators: services.aggregators.clone(),
        version: "test".to_string(),
    });
    create_router(state).layer(axum::middleware::from_fn(
        gamebridge::api::middleware::request_id_middleware,
    ))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn webhook_bet_and_win_over_http() {
    let services = services_with_funds(1_000);
    let token = open_session(&services).await;
    let app = app(&services);

    let bet_uri = format!(
        "/spinline-eu/webhook?action=bet&extra={}&game_id=g&transaction_id=tx1&round_id=r1&amount=100",
        token
    );
    let response = app
        .clone()
        .oneshot(Request::post(&bet_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], 200);
    assert_eq!(body["balance"], 900);
    assert_eq!(body["currency"], "EUR");

    let win_uri = format!(
        "/spinline-eu/webhook?action=win&extra={}&transaction_id=tx2&round_id=r1&amount=250&ext_round_finished=1",
        token
    );
    let response = app
        .clone()
        .oneshot(Request::post(&win_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], 200);
    assert_eq!(body["balance"], 1_150);

    // The round is now closed; a fresh bet on it maps to SpinLine's
    // round-closed error code.
    let late_bet = format!(
        "/spinline-eu/webhook?action=bet&extra={}&game_id=g&transaction_id=tx3&round_id=r1&amount=100",
        token
    );
    let response = app
        .oneshot(Request::post(&late_bet).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], 400);
    assert_eq!(body["error"]["code"], "ERR_ROUND_CLOSED");
}

#[tokio::test]
async fn webhook_invalid_session_uses_protocol_vocabulary() {
    let services = services_with_funds(0);
    let app = app(&services);

    let response = app
        .oneshot(
            Request::post("/spinline-eu/webhook?action=balance&extra=unknown-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], 400);
    assert_eq!(body["error"]["code"], "ERR_SESSION");
    assert_eq!(body["error"]["action"], "restart");
}

#[tokio::test]
async fn webhook_unknown_identity_is_404() {
    let services = services_with_funds(0);
    let app = app(&services);

    let response = app
        .oneshot(
            Request::post("/vendor-nobody/webhook?action=balance&extra=t")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
