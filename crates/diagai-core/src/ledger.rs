//! Credit reservation and refund.
//!
//! Credits move in exactly two directions: `reserve` at intake and
//! `release` when a generation ends in failure. A successful generation
//! keeps its reservation, which is then the charge.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::store::UserStore;

#[derive(Clone)]
pub struct CreditLedger {
    users: Arc<dyn UserStore>,
}

impl CreditLedger {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Atomically take `amount` credits from `user_id`, or fail with
    /// `InsufficientCredits` leaving the balance untouched.
    pub async fn reserve(&self, user_id: Uuid, amount: u32) -> Result<(), GenerationError> {
        if self.users.reserve_credits(user_id, amount).await? {
            debug!(user = %user_id, amount, "credits reserved");
            return Ok(());
        }
        let available = self.users.balance(user_id).await?;
        info!(user = %user_id, required = amount, available, "insufficient credits");
        Err(GenerationError::InsufficientCredits {
            required: amount,
            available,
        })
    }

    /// Hand `amount` credits back to `user_id`.
    pub async fn release(&self, user_id: Uuid, amount: u32) -> Result<(), GenerationError> {
        self.users.release_credits(user_id, amount).await?;
        info!(user = %user_id, amount, "credits refunded");
        Ok(())
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<u32, GenerationError> {
        Ok(self.users.balance(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, Plan, User};

    async fn ledger_with(credits: u32) -> (CreditLedger, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("ledger@example.com", None, Plan::Free).with_credits(credits);
        store.create_user(&user).await.unwrap();
        (CreditLedger::new(store), user.id)
    }

    #[tokio::test]
    async fn reserve_then_release_restores_balance() {
        let (ledger, user) = ledger_with(4).await;
        ledger.reserve(user, 3).await.unwrap();
        assert_eq!(ledger.balance(user).await.unwrap(), 1);
        ledger.release(user, 3).await.unwrap();
        assert_eq!(ledger.balance(user).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn shortfall_reports_both_amounts() {
        let (ledger, user) = ledger_with(2).await;
        match ledger.reserve(user, 3).await {
            Err(GenerationError::InsufficientCredits {
                required,
                available,
            }) => {
                assert_eq!(required, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }
        assert_eq!(ledger.balance(user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_user_is_a_store_error() {
        let (ledger, _) = ledger_with(1).await;
        assert!(matches!(
            ledger.reserve(Uuid::new_v4(), 1).await,
            Err(GenerationError::Store(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_grant_at_most_balance() {
        let (ledger, user) = ledger_with(5).await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.reserve(user, 1).await.is_ok() }));
        }
        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(ledger.balance(user).await.unwrap(), 0);
    }
}
