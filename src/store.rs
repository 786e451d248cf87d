//! Session/round/spin persistence interface
//!
//! The engine never does read-then-write against this interface: the
//! race-prone operations (spin insert by idempotency key, round
//! find-or-create, settle-plus-round-finish) are single atomic calls
//! here, and any backing implementation must keep them that way (unique
//! constraint with conflict-as-success, or an equivalent serialized
//! critical section scoped to the key).

use crate::errors::{EngineError, EngineResult};
use crate::model::{Round, Session, Spin, SpinKind};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

/// Spin fields supplied by the engine; ids and timestamps are assigned
/// on insert.
#[derive(Debug, Clone)]
pub struct NewSpin {
    pub round_id: Uuid,
    pub kind: SpinKind,
    pub real_amount: i64,
    pub bonus_amount: i64,
    pub external_transaction_id: String,
    pub reference_spin_id: Option<Uuid>,
    pub freespin_id: Option<String>,
}

/// Outcome of a conditional spin insert.
#[derive(Debug, Clone)]
pub enum SpinInsert {
    /// The spin was recorded by this call.
    Created(Spin),
    /// A spin with this external transaction id already existed; the
    /// caller must treat the delivery as an idempotent replay.
    Existing(Spin),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &Session) -> EngineResult<()>;

    async fn find_session_by_token(&self, token: &str) -> EngineResult<Option<Session>>;

    /// Atomic find-or-create on `(session_id, external_round_id)`.
    async fn find_or_create_round(
        &self,
        session_id: Uuid,
        game_id: &str,
        external_round_id: &str,
    ) -> EngineResult<Round>;

    async fn find_round(
        &self,
        session_id: Uuid,
        external_round_id: &str,
    ) -> EngineResult<Option<Round>>;

    async fn find_spin_by_external_id(&self, external_transaction_id: &str)
        -> EngineResult<Option<Spin>>;

    /// The PLACE spin of a round, if any. With several PLACE spins in
    /// one round the earliest one wins, so reference-less protocols
    /// resolve the same spin on every delivery.
    async fn find_place_spin_by_round(&self, round_id: Uuid) -> EngineResult<Option<Spin>>;

    /// Claim the terminal slot of a PLACE spin. The first transaction id
    /// to claim wins and may re-claim freely (crash/retry recovery); any
    /// other id fails `IllegalState`. Callers claim BEFORE touching the
    /// wallet so the loser of a concurrent settle/rollback race fails
    /// with its money untouched.
    async fn claim_settlement(
        &self,
        place_spin_id: Uuid,
        external_transaction_id: &str,
    ) -> EngineResult<()>;

    /// Conditionally insert a spin by its external transaction id and,
    /// in the same atomic unit, mark the round finished when
    /// `finish_round` is set. Duplicate keys return the existing spin
    /// (conflict-as-success). A PLACE against a round that finished in
    /// the meantime fails `RoundFinished`; a terminal spin whose PLACE
    /// is claimed by a different transaction id fails `IllegalState`.
    async fn record_spin(&self, spin: NewSpin, finish_round: bool) -> EngineResult<SpinInsert>;
}

/// In-memory store backed by `DashMap`. The entry API provides the
/// conditional-insert atomicity; `record_spin` holds the round entry
/// while writing the spin so the settle-plus-finish pair is atomic.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    rounds: DashMap<(Uuid, String), Round>,
    round_keys: DashMap<Uuid, (Uuid, String)>,
    spins: DashMap<String, Spin>,
    /// PLACE spin id -> external transaction id holding its terminal slot.
    settlements: DashMap<Uuid, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_session(&self, session: &Session) -> EngineResult<()> {
        if self.sessions.contains_key(&session.token) {
            return Err(EngineError::DuplicateEntity(format!(
                "session token '{}'",
                session.token
            )));
        }
        self.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session_by_token(&self, token: &str) -> EngineResult<Option<Session>> {
        Ok(self.sessions.get(token).map(|s| s.clone()))
    }

    async fn find_or_create_round(
        &self,
        session_id: Uuid,
        game_id: &str,
        external_round_id: &str,
    ) -> EngineResult<Round> {
        let key = (session_id, external_round_id.to_string());
        let round = self
            .rounds
            .entry(key.clone())
            .or_insert_with(|| Round {
                id: Uuid::new_v4(),
                session_id,
                game_id: game_id.to_string(),
                external_round_id: external_round_id.to_string(),
                finished: false,
            })
            .clone();
        self.round_keys.insert(round.id, key);
        Ok(round)
    }

    async fn find_round(
        &self,
        session_id: Uuid,
        external_round_id: &str,
    ) -> EngineResult<Option<Round>> {
        let key = (session_id, external_round_id.to_string());
        Ok(self.rounds.get(&key).map(|r| r.clone()))
    }

    async fn find_spin_by_external_id(
        &self,
        external_transaction_id: &str,
    ) -> EngineResult<Option<Spin>> {
        Ok(self.spins.get(external_transaction_id).map(|s| s.clone()))
    }

    async fn find_place_spin_by_round(&self, round_id: Uuid) -> EngineResult<Option<Spin>> {
        Ok(self
            .spins
            .iter()
            .filter(|s| s.round_id == round_id && s.kind == SpinKind::Place)
            .map(|s| s.clone())
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.external_transaction_id.cmp(&b.external_transaction_id))
            }))
    }

    async fn claim_settlement(
        &self,
        place_spin_id: Uuid,
        external_transaction_id: &str,
    ) -> EngineResult<()> {
        match self.settlements.entry(place_spin_id) {
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                if slot.get() == external_transaction_id {
                    Ok(())
                } else {
                    Err(EngineError::IllegalState(format!(
                        "bet {} already settled or rolled back by {}",
                        place_spin_id,
                        slot.get()
                    )))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(external_transaction_id.to_string());
                Ok(())
            }
        }
    }

    async fn record_spin(&self, spin: NewSpin, finish_round: bool) -> EngineResult<SpinInsert> {
        let round_key = self
            .round_keys
            .get(&spin.round_id)
            .map(|k| k.clone())
            .ok_or_else(|| EngineError::RoundNotFound(spin.round_id.to_string()))?;
        // Hold the round entry for the whole write so the spin insert
        // and the finished flag flip are one atomic unit.
        let mut round = self
            .rounds
            .get_mut(&round_key)
            .ok_or_else(|| EngineError::RoundNotFound(spin.round_id.to_string()))?;

        let record = Spin {
            id: Uuid::new_v4(),
            round_id: spin.round_id,
            kind: spin.kind,
            real_amount: spin.real_amount,
            bonus_amount: spin.bonus_amount,
            external_transaction_id: spin.external_transaction_id,
            reference_spin_id: spin.reference_spin_id,
            freespin_id: spin.freespin_id,
            created_at: Utc::now(),
        };
        match self.spins.entry(record.external_transaction_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Ok(SpinInsert::Existing(existing.get().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                // Re-check under the round guard: the round may have
                // finished after the caller's optimistic read.
                if record.kind == SpinKind::Place && round.finished {
                    return Err(EngineError::RoundFinished {
                        external_round_id: round.external_round_id.clone(),
                    });
                }
                if record.kind != SpinKind::Place {
                    if let Some(reference) = record.reference_spin_id {
                        match self.settlements.entry(reference) {
                            dashmap::mapref::entry::Entry::Occupied(slot) => {
                                if slot.get() != &record.external_transaction_id {
                                    return Err(EngineError::IllegalState(format!(
                                        "bet {} already settled or rolled back by {}",
                                        reference,
                                        slot.get()
                                    )));
                                }
                            }
                            dashmap::mapref::entry::Entry::Vacant(slot) => {
                                slot.insert(record.external_transaction_id.clone());
                            }
                        }
                    }
                }
                let stored = record.clone();
                vacant.insert(record);
                if finish_round {
                    round.finished = true;
                }
                Ok(SpinInsert::Created(stored))
            }
        }
    }
}
