//! Settlement engine
//!
//! Drives the round/spin state machine behind every aggregator webhook
//! call. Rounds move `open -> finished` exactly once; a spin chain
//! moves `placed -> settled` or `placed -> rolled back`. All wallet
//! effects are idempotent on the aggregator's external transaction id:
//! a duplicate delivery observes the already-recorded spin and returns
//! the current balance without touching the wallet again.

use crate::aggregator::{AggregatorDirectory, AdapterRegistry, AggregatorInfo};
use crate::errors::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::model::{Balance, Platform, Round, Session, Spin, SpinKind};
use crate::money::{CurrencyConverter, ProviderAmount};
use crate::store::{NewSpin, SessionStore, SpinInsert};
use crate::wallet::{PlayerLimits, Wallet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parameters for opening a session at game launch.
#[derive(Debug, Clone)]
pub struct OpenSession {
    pub game_id: String,
    pub player_id: String,
    pub currency: String,
    pub locale: String,
    pub platform: Platform,
    pub external_token: Option<String>,
}

pub struct SettlementEngine {
    store: Arc<dyn SessionStore>,
    wallet: Arc<dyn Wallet>,
    limits: Arc<dyn PlayerLimits>,
    events: Arc<dyn EventPublisher>,
    registry: Arc<AdapterRegistry>,
    aggregators: Arc<AggregatorDirectory>,
    converter: CurrencyConverter,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        wallet: Arc<dyn Wallet>,
        limits: Arc<dyn PlayerLimits>,
        events: Arc<dyn EventPublisher>,
        registry: Arc<AdapterRegistry>,
        aggregators: Arc<AggregatorDirectory>,
    ) -> Self {
        Self {
            store,
            wallet,
            limits,
            events,
            registry,
            aggregators,
            converter: CurrencyConverter::new(),
        }
    }

    /// Create and persist a session at game launch. The session token
    /// is the key the aggregator echoes back on every webhook call.
    pub async fn open_session(
        &self,
        aggregator: &AggregatorInfo,
        request: OpenSession,
    ) -> EngineResult<Session> {
        if !aggregator.active {
            return Err(EngineError::GameUnavailable(format!(
                "aggregator '{}' is inactive",
                aggregator.identity
            )));
        }
        if !self.registry.supports(aggregator.kind) {
            return Err(EngineError::AggregatorNotSupported(aggregator.kind.to_string()));
        }
        let session = Session {
            id: Uuid::new_v4(),
            game_id: request.game_id,
            aggregator_id: aggregator.id,
            player_id: request.player_id,
            token: Uuid::new_v4().to_string(),
            external_token: request.external_token,
            currency: request.currency,
            locale: request.locale,
            platform: request.platform,
        };
        self.store.save_session(&session).await?;
        self.events
            .publish(DomainEvent::SessionOpened {
                session_id: session.id,
                aggregator_id: session.aggregator_id,
                player_id: session.player_id.clone(),
                game_id: session.game_id.clone(),
                currency: session.currency.clone(),
            })
            .await;
        info!(session = %session.id, player = %session.player_id, game = %session.game_id, "session opened");
        Ok(session)
    }

    /// Current balance for a session token. Pure read.
    pub async fn find_balance(&self, session_token: &str) -> EngineResult<Balance> {
        let session = self.resolve_session(session_token).await?;
        self.wallet
            .find_balance(&session.player_id, &session.currency)
            .await
    }

    /// Debit the player's wallet for a bet and record the PLACE spin.
    ///
    /// Duplicate delivery (same external transaction id) replays
    /// idempotently: no new record, no second debit, same balance shape.
    pub async fn place_bet(
        &self,
        session_token: &str,
        game_symbol: &str,
        external_round_id: &str,
        external_transaction_id: &str,
        freespin_id: Option<&str>,
        amount: &ProviderAmount,
    ) -> EngineResult<Balance> {
        let session = self.resolve_session(session_token).await?;

        if let Some(existing) = self
            .store
            .find_spin_by_external_id(external_transaction_id)
            .await?
        {
            debug!(tx = external_transaction_id, spin = %existing.id, "duplicate bet delivery, replaying");
            return self
                .wallet
                .find_balance(&session.player_id, &session.currency)
                .await;
        }

        let round = self
            .store
            .find_or_create_round(session.id, game_symbol, external_round_id)
            .await?;
        if round.finished {
            return Err(EngineError::RoundFinished {
                external_round_id: external_round_id.to_string(),
            });
        }

        let amount_minor = self.converter.to_system_units(amount, &session.currency)?;
        if amount_minor < 0 {
            return Err(EngineError::Validation(format!(
                "bet amount must not be negative, got {}",
                amount_minor
            )));
        }

        if let Some(remaining) = self
            .limits
            .find_current_bet_limit(&session.player_id)
            .await?
        {
            if amount_minor > remaining {
                return Err(EngineError::BetLimitExceeded {
                    player_id: session.player_id.clone(),
                    requested: amount_minor,
                    remaining,
                });
            }
        }

        // The wallet sees the external transaction id as its own
        // idempotency reference, so a concurrent duplicate that slipped
        // past the replay check above still debits exactly once.
        let balance = self
            .wallet
            .withdraw(
                &session.player_id,
                external_transaction_id,
                &session.currency,
                amount_minor,
                0,
            )
            .await?;

        let insert = match self
            .store
            .record_spin(
                NewSpin {
                    round_id: round.id,
                    kind: SpinKind::Place,
                    real_amount: amount_minor,
                    bonus_amount: 0,
                    external_transaction_id: external_transaction_id.to_string(),
                    reference_spin_id: None,
                    freespin_id: freespin_id.map(|s| s.to_string()),
                },
                false,
            )
            .await
        {
            Ok(insert) => insert,
            // The round finished while the debit was in flight; give the
            // money back before surfacing the rejection.
            Err(err @ EngineError::RoundFinished { .. }) => {
                self.wallet
                    .deposit(
                        &session.player_id,
                        &format!("revert:{}", external_transaction_id),
                        &session.currency,
                        amount_minor,
                        0,
                    )
                    .await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        if let SpinInsert::Existing(spin) = &insert {
            debug!(tx = external_transaction_id, spin = %spin.id, "bet raced a duplicate, kept first record");
        }

        info!(
            session = %session.id,
            round = external_round_id,
            tx = external_transaction_id,
            amount = amount_minor,
            "bet placed"
        );
        Ok(balance)
    }

    /// Credit a win (or confirm a loss with `amount <= 0`) against the
    /// round's PLACE spin, optionally finishing the round atomically
    /// with the settle record.
    pub async fn settle_bet(
        &self,
        session_token: &str,
        external_round_id: &str,
        external_transaction_id: &str,
        reference_transaction_id: Option<&str>,
        freespin_id: Option<&str>,
        amount: &ProviderAmount,
        round_finished: bool,
    ) -> EngineResult<Balance> {
        let session = self.resolve_session(session_token).await?;

        if self
            .store
            .find_spin_by_external_id(external_transaction_id)
            .await?
            .is_some()
        {
            debug!(tx = external_transaction_id, "duplicate settle delivery, replaying");
            return self
                .wallet
                .find_balance(&session.player_id, &session.currency)
                .await;
        }

        let (round, place) = self
            .resolve_place(&session, external_round_id, reference_transaction_id)
            .await?;
        let amount_minor = self.converter.to_system_units(amount, &session.currency)?;
        // Claim the terminal slot before any wallet effect; the loser of
        // a concurrent settle/rollback race fails here with its money
        // untouched.
        self.store
            .claim_settlement(place.id, external_transaction_id)
            .await?;

        // Zero or negative settle is a loss confirmation: recorded, but
        // no wallet credit.
        let balance = if amount_minor > 0 {
            self.wallet
                .deposit(
                    &session.player_id,
                    external_transaction_id,
                    &session.currency,
                    amount_minor,
                    0,
                )
                .await?
        } else {
            self.wallet
                .find_balance(&session.player_id, &session.currency)
                .await?
        };

        let insert = self
            .store
            .record_spin(
                NewSpin {
                    round_id: round.id,
                    kind: SpinKind::Settle,
                    real_amount: amount_minor.max(0),
                    bonus_amount: 0,
                    external_transaction_id: external_transaction_id.to_string(),
                    reference_spin_id: Some(place.id),
                    freespin_id: freespin_id.map(|s| s.to_string()),
                },
                round_finished,
            )
            .await?;

        if let SpinInsert::Created(spin) = insert {
            self.publish_settled(&session, &round, &spin, &balance).await;
        }
        info!(
            session = %session.id,
            round = external_round_id,
            tx = external_transaction_id,
            amount = amount_minor,
            finished = round_finished,
            "bet settled"
        );
        Ok(balance)
    }

    /// Reverse a PLACE debit in full and record a ROLLBACK spin. Used
    /// when the aggregator cancels a round without resolving it. Does
    /// not finish the round unless the request explicitly says so.
    pub async fn rollback_bet(
        &self,
        session_token: &str,
        external_round_id: &str,
        external_transaction_id: &str,
        reference_transaction_id: Option<&str>,
        round_finished: bool,
    ) -> EngineResult<Balance> {
        let session = self.resolve_session(session_token).await?;

        if self
            .store
            .find_spin_by_external_id(external_transaction_id)
            .await?
            .is_some()
        {
            debug!(tx = external_transaction_id, "duplicate rollback delivery, replaying");
            return self
                .wallet
                .find_balance(&session.player_id, &session.currency)
                .await;
        }

        let (round, place) = self
            .resolve_place(&session, external_round_id, reference_transaction_id)
            .await?;
        self.store
            .claim_settlement(place.id, external_transaction_id)
            .await?;

        let balance = self
            .wallet
            .deposit(
                &session.player_id,
                external_transaction_id,
                &session.currency,
                place.real_amount,
                place.bonus_amount,
            )
            .await?;

        let insert = self
            .store
            .record_spin(
                NewSpin {
                    round_id: round.id,
                    kind: SpinKind::Rollback,
                    real_amount: place.real_amount,
                    bonus_amount: place.bonus_amount,
                    external_transaction_id: external_transaction_id.to_string(),
                    reference_spin_id: Some(place.id),
                    freespin_id: place.freespin_id.clone(),
                },
                round_finished,
            )
            .await?;

        if let SpinInsert::Created(spin) = insert {
            self.publish_settled(&session, &round, &spin, &balance).await;
        }
        info!(
            session = %session.id,
            round = external_round_id,
            tx = external_transaction_id,
            "bet rolled back"
        );
        Ok(balance)
    }

    async fn resolve_session(&self, token: &str) -> EngineResult<Session> {
        let session = self
            .store
            .find_session_by_token(token)
            .await?
            .ok_or(EngineError::SessionInvalid)?;
        let aggregator = self
            .aggregators
            .find_by_id(session.aggregator_id)
            .ok_or_else(|| EngineError::NotFound(format!("aggregator {}", session.aggregator_id)))?;
        if !self.registry.supports(aggregator.kind) {
            return Err(EngineError::AggregatorNotSupported(aggregator.kind.to_string()));
        }
        Ok(session)
    }

    /// Resolve the round and its PLACE spin for a settle/rollback.
    /// A reference transaction id takes precedence; protocols without
    /// one fall back to the round's PLACE spin. Either way an absent
    /// PLACE is `RoundNotFound` — out-of-order delivery is the
    /// aggregator's to retry, never something to guess an amount for.
    async fn resolve_place(
        &self,
        session: &Session,
        external_round_id: &str,
        reference_transaction_id: Option<&str>,
    ) -> EngineResult<(Round, Spin)> {
        let round = self
            .store
            .find_round(session.id, external_round_id)
            .await?
            .ok_or_else(|| EngineError::RoundNotFound(external_round_id.to_string()))?;

        let place = match reference_transaction_id {
            Some(reference) => self.store.find_spin_by_external_id(reference).await?,
            None => self.store.find_place_spin_by_round(round.id).await?,
        };
        let place = place.ok_or_else(|| EngineError::RoundNotFound(external_round_id.to_string()))?;
        if place.kind != SpinKind::Place || place.round_id != round.id {
            return Err(EngineError::RoundNotFound(external_round_id.to_string()));
        }
        Ok((round, place))
    }

    async fn publish_settled(
        &self,
        session: &Session,
        round: &Round,
        spin: &Spin,
        balance: &Balance,
    ) {
        // Fire and forget; a lost event never fails the webhook.
        self.events
            .publish(DomainEvent::SpinSettled {
                session_id: session.id,
                round_id: round.id,
                spin_id: spin.id,
                kind: spin.kind,
                real_amount: spin.real_amount,
                bonus_amount: spin.bonus_amount,
                balance_after: balance.clone(),
            })
            .await;
        if spin.kind == SpinKind::Rollback {
            warn!(spin = %spin.id, round = %round.id, "round cancelled by aggregator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorKind;
    use crate::store::MemoryStore;
    use crate::wallet::{MemoryLimits, MemoryWallet};
    use std::collections::HashMap;

    struct Harness {
        engine: SettlementEngine,
        aggregator: AggregatorInfo,
    }

    fn aggregator_info() -> AggregatorInfo {
        let mut config = HashMap::new();
        config.insert("gateway_url".to_string(), "http://upstream.test".to_string());
        config.insert("api_key".to_string(), "k".to_string());
        config.insert("operator_id".to_string(), "op".to_string());
        AggregatorInfo {
            id: Uuid::new_v4(),
            identity: "spinline-eu".to_string(),
            kind: AggregatorKind::SpinLine,
            config,
            active: true,
        }
    }

    fn harness(wallet: MemoryWallet, limits: MemoryLimits) -> Harness {
        let aggregator = aggregator_info();
        let directory = Arc::new(AggregatorDirectory::new());
        directory.insert(aggregator.clone());
        let engine = SettlementEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(wallet),
            Arc::new(limits),
            Arc::new(crate::events::TracingPublisher::new()),
            Arc::new(AdapterRegistry::with_defaults()),
            directory,
        );
        Harness { engine, aggregator }
    }

    async fn open(h: &Harness) -> Session {
        h.engine
            .open_session(
                &h.aggregator,
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
            .unwrap()
    }

    fn cents(v: i64) -> ProviderAmount {
        ProviderAmount::Cents(v)
    }

    #[tokio::test]
    async fn test_unknown_token_is_session_invalid() {
        let h = harness(MemoryWallet::new(), MemoryLimits::new());
        let err = h.engine.find_balance("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionInvalid));
    }

    #[tokio::test]
    async fn test_place_settle_scenario_nets_plus_150() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        let after_bet = h
            .engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        assert_eq!(after_bet.real, 900);

        let after_win = h
            .engine
            .settle_bet(token, "r1", "tx2", Some("tx1"), None, &cents(250), true)
            .await
            .unwrap();
        assert_eq!(after_win.real, 1_150);

        // Second identical settle: no further balance change.
        let replay = h
            .engine
            .settle_bet(token, "r1", "tx2", Some("tx1"), None, &cents(250), true)
            .await
            .unwrap();
        assert_eq!(replay.real, 1_150);
    }

    #[tokio::test]
    async fn test_duplicate_place_debits_once() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        let first = h
            .engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        let second = h
            .engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        assert_eq!(first.real, 900);
        assert_eq!(second.real, 900);
    }

    #[tokio::test]
    async fn test_finished_round_rejects_new_bets() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        h.engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        h.engine
            .settle_bet(token, "r1", "tx2", Some("tx1"), None, &cents(0), true)
            .await
            .unwrap();

        let err = h
            .engine
            .place_bet(token, "g", "r1", "tx3", None, &cents(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RoundFinished { .. }));
    }

    #[tokio::test]
    async fn test_settle_without_place_is_round_not_found() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let err = h
            .engine
            .settle_bet(&session.token, "r9", "tx2", Some("tx1"), None, &cents(250), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RoundNotFound(_)));
    }

    #[tokio::test]
    async fn test_rollback_restores_balance_and_leaves_round_open() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        h.engine
            .place_bet(token, "g", "r2", "tx1", None, &cents(300))
            .await
            .unwrap();
        let restored = h
            .engine
            .rollback_bet(token, "r2", "tx2", Some("tx1"), false)
            .await
            .unwrap();
        assert_eq!(restored.real, 1_000);

        // A plain rollback leaves the round open: the same round still
        // accepts a new bet.
        assert!(h
            .engine
            .place_bet(token, "g", "r2", "tx3", None, &cents(100))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_no_double_settlement_with_fresh_tx_id() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        h.engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        h.engine
            .settle_bet(token, "r1", "tx2", Some("tx1"), None, &cents(250), false)
            .await
            .unwrap();
        let err = h
            .engine
            .rollback_bet(token, "r1", "tx3", Some("tx1"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));
        let balance = h.engine.find_balance(token).await.unwrap();
        assert_eq!(balance.real, 1_150);
    }

    #[tokio::test]
    async fn test_bet_limit_blocks_before_wallet() {
        let limits = MemoryLimits::new();
        limits.set_limit("p1", 50);
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), limits);
        let session = open(&h).await;

        let err = h
            .engine
            .place_bet(&session.token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BetLimitExceeded { .. }));
        let balance = h.engine.find_balance(&session.token).await.unwrap();
        assert_eq!(balance.real, 1_000);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_wallet_untouched() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 50, 0), MemoryLimits::new());
        let session = open(&h).await;

        let err = h
            .engine
            .place_bet(&session.token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        let balance = h.engine.find_balance(&session.token).await.unwrap();
        assert_eq!(balance.real, 50);
    }

    #[tokio::test]
    async fn test_loss_confirmation_settles_without_credit() {
        let h = harness(MemoryWallet::with_balance("p1", "EUR", 1_000, 0), MemoryLimits::new());
        let session = open(&h).await;
        let token = session.token.as_str();

        h.engine
            .place_bet(token, "g", "r1", "tx1", None, &cents(100))
            .await
            .unwrap();
        let balance = h
            .engine
            .settle_bet(token, "r1", "tx2", Some("tx1"), None, &cents(0), true)
            .await
            .unwrap();
        assert_eq!(balance.real, 900);
    }

    #[tokio::test]
    async fn test_inactive_aggregator_cannot_open_sessions() {
        let h = harness(MemoryWallet::new(), MemoryLimits::new());
        let mut inactive = h.aggregator.clone();
        inactive.active = false;
        let err = h
            .engine
            .open_session(
                &inactive,
                OpenSession {
                    game_id: "g".to_string(),
                    player_id: "p1".to_string(),
                    currency: "EUR".to_string(),
                    locale: "en".to_string(),
                    platform: Platform::Mobile,
                    external_token: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GameUnavailable(_)));
    }
}
