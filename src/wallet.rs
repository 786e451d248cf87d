//! Wallet and player-limit collaborator interfaces
//!
//! The wallet is an external network service in production; every call
//! carries the external transaction id as its idempotency reference so
//! a retried call does not double-apply there either. The engine never
//! retries a wallet call itself: on timeout it cannot tell whether the
//! debit landed, so it surfaces `ExternalService` and lets the
//! aggregator's retry drive the idempotent replay path.

use crate::errors::{EngineError, EngineResult};
use crate::model::Balance;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn find_balance(&self, player_id: &str, currency: &str) -> EngineResult<Balance>;

    /// Debit real/bonus minor units. `reference_id` is the idempotency
    /// key; a repeated reference must not debit twice.
    async fn withdraw(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance>;

    /// Credit real/bonus minor units, idempotent on `reference_id`.
    async fn deposit(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance>;
}

#[async_trait]
pub trait PlayerLimits: Send + Sync {
    /// Remaining bet allowance for the player, if a limit is set.
    async fn find_current_bet_limit(&self, player_id: &str) -> EngineResult<Option<i64>>;
}

/// In-memory wallet used for composition and tests. Balances are keyed
/// by `(player, currency)`; applied reference ids are remembered so a
/// replayed call is a no-op returning the current balance.
#[derive(Default)]
pub struct MemoryWallet {
    balances: DashMap<(String, String), (i64, i64)>,
    applied: DashSet<String>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(player_id: &str, currency: &str, real: i64, bonus: i64) -> Self {
        let wallet = Self::new();
        wallet
            .balances
            .insert((player_id.to_string(), currency.to_string()), (real, bonus));
        wallet
    }

    fn balance_of(&self, player_id: &str, currency: &str) -> Balance {
        let (real, bonus) = self
            .balances
            .get(&(player_id.to_string(), currency.to_string()))
            .map(|b| *b)
            .unwrap_or((0, 0));
        Balance {
            real,
            bonus,
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl Wallet for MemoryWallet {
    async fn find_balance(&self, player_id: &str, currency: &str) -> EngineResult<Balance> {
        Ok(self.balance_of(player_id, currency))
    }

    async fn withdraw(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance> {
        if !self.applied.insert(format!("w:{}", reference_id)) {
            return Ok(self.balance_of(player_id, currency));
        }
        let key = (player_id.to_string(), currency.to_string());
        let mut entry = self.balances.entry(key).or_insert((0, 0));
        let (cur_real, cur_bonus) = *entry;
        if cur_real < real || cur_bonus < bonus {
            // Undo the reference claim so a later retry with funds works.
            drop(entry);
            self.applied.remove(&format!("w:{}", reference_id));
            return Err(EngineError::InsufficientBalance {
                player_id: player_id.to_string(),
            });
        }
        *entry = (cur_real - real, cur_bonus - bonus);
        drop(entry);
        Ok(self.balance_of(player_id, currency))
    }

    async fn deposit(
        &self,
        player_id: &str,
        reference_id: &str,
        currency: &str,
        real: i64,
        bonus: i64,
    ) -> EngineResult<Balance> {
        if !self.applied.insert(format!("d:{}", reference_id)) {
            return Ok(self.balance_of(player_id, currency));
        }
        let key = (player_id.to_string(), currency.to_string());
        let mut entry = self.balances.entry(key).or_insert((0, 0));
        let (cur_real, cur_bonus) = *entry;
        *entry = (cur_real + real, cur_bonus + bonus);
        drop(entry);
        Ok(self.balance_of(player_id, currency))
    }
}

/// Static per-player bet limits for composition and tests.
#[derive(Default)]
pub struct MemoryLimits {
    limits: DashMap<String, i64>,
}

impl MemoryLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limit(&self, player_id: &str, remaining: i64) {
        self.limits.insert(player_id.to_string(), remaining);
    }
}

#[async_trait]
impl PlayerLimits for MemoryLimits {
    async fn find_current_bet_limit(&self, player_id: &str) -> EngineResult<Option<i64>> {
        Ok(self.limits.get(player_id).map(|l| *l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_withdraw_is_idempotent_on_reference() {
        let wallet = MemoryWallet::with_balance("p1", "EUR", 1_000, 0);
        wallet.withdraw("p1", "tx1", "EUR", 100, 0).await.unwrap();
        let replay = wallet.withdraw("p1", "tx1", "EUR", 100, 0).await.unwrap();
        assert_eq!(replay.real, 900);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balance_untouched() {
        let wallet = MemoryWallet::with_balance("p1", "EUR", 50, 0);
        let err = wallet.withdraw("p1", "tx1", "EUR", 100, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        let balance = wallet.find_balance("p1", "EUR").await.unwrap();
        assert_eq!(balance.real, 50);
        // The failed reference is not burned; a funded retry succeeds.
        wallet.deposit("p1", "topup", "EUR", 100, 0).await.unwrap();
        assert!(wallet.withdraw("p1", "tx1", "EUR", 100, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw_references_are_distinct() {
        let wallet = MemoryWallet::with_balance("p1", "EUR", 1_000, 0);
        wallet.withdraw("p1", "tx1", "EUR", 100, 0).await.unwrap();
        let after = wallet.deposit("p1", "tx1", "EUR", 250, 0).await.unwrap();
        assert_eq!(after.real, 1_150);
    }

    #[tokio::test]
    async fn test_limits_lookup() {
        let limits = MemoryLimits::new();
        assert_eq!(limits.find_current_bet_limit("p1").await.unwrap(), None);
        limits.set_limit("p1", 500);
        assert_eq!(limits.find_current_bet_limit("p1").await.unwrap(), Some(500));
    }
}
