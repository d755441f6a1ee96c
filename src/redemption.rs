/// Redemption processing
///
/// A redemption is recorded as pending; a cashier later hands over the
/// reward and marks it processed, which is when the balance is debited.
use crate::{
    account::{debit_if_covered, Actor, Role},
    config::LedgerConfig,
    db::{self, retry_on_conflict},
    error::{RewardsError, RewardsResult},
    ledger::{load_transaction, mark_processed, Transaction, TransactionKind},
};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct RedemptionProcessor {
    db: SqlitePool,
    config: LedgerConfig,
}

impl RedemptionProcessor {
    pub fn new(db: SqlitePool, config: LedgerConfig) -> Self {
        Self { db, config }
    }

    /// Mark a pending redemption processed and debit its owner
    pub async fn process(&self, actor: &Actor, id: i64) -> RewardsResult<Transaction> {
        actor.require(Role::Cashier)?;

        let txn = retry_on_conflict(&self.config, "process_redemption", || {
            self.try_process(actor, id)
        })
        .await?;

        tracing::info!(
            transaction_id = id,
            account_id = txn.account_id,
            amount = txn.amount,
            processed_by = %actor.utorid,
            "redemption processed"
        );

        Ok(txn)
    }

    async fn try_process(&self, actor: &Actor, id: i64) -> RewardsResult<Transaction> {
        let mut tx = db::begin_write(&self.db).await?;
        let txn = load_transaction(&mut tx, id).await?;

        if txn.kind != TransactionKind::Redemption {
            return Err(RewardsError::Validation(format!(
                "Transaction {} is a {}, not a redemption",
                id,
                txn.kind.as_str()
            )));
        }
        if txn.suspicious {
            return Err(RewardsError::State(format!(
                "Redemption {} is flagged suspicious",
                id
            )));
        }
        if !txn.is_pending_redemption() || !mark_processed(&mut tx, id, &actor.utorid).await? {
            return Err(RewardsError::State(format!(
                "Redemption {} has already been processed",
                id
            )));
        }

        debit_if_covered(&mut tx, txn.account_id, -txn.amount).await?;

        let processed = load_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::AccountStore,
        clock::SystemClock,
        db,
        ledger::{Ledger, PurchaseRequest, RedemptionRequest, TransferRequest},
    };
    use std::sync::Arc;

    struct Fixture {
        processor: RedemptionProcessor,
        ledger: Ledger,
        accounts: AccountStore,
        cashier: Actor,
        alice: Actor,
    }

    async fn setup() -> Fixture {
        let db = db::in_memory_pool().await.unwrap();
        let accounts = AccountStore::new(db.clone());
        let cashier = accounts
            .seed("cash0001", "Cashier", "cash@mail.example.com", Role::Cashier)
            .await
            .unwrap();
        let alice = accounts
            .seed("alice001", "Alice", "alice@mail.example.com", Role::Regular)
            .await
            .unwrap();

        let ledger = Ledger::new(db.clone(), Arc::new(SystemClock), LedgerConfig::default());
        let cashier = Actor::from(&cashier);
        ledger
            .purchase(
                &cashier,
                PurchaseRequest {
                    account_id: alice.id,
                    spent: 25.0,
                    promotion_ids: vec![],
                    remark: String::new(),
                },
            )
            .await
            .unwrap();

        Fixture {
            processor: RedemptionProcessor::new(db, LedgerConfig::default()),
            ledger,
            accounts,
            cashier,
            alice: Actor::from(&alice),
        }
    }

    async fn redeem(f: &Fixture, amount: i64) -> Transaction {
        f.ledger
            .redemption(
                &f.alice,
                RedemptionRequest {
                    amount,
                    remark: String::new(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_debits_once() {
        let f = setup().await;
        let pending = redeem(&f, 30).await;
        assert_eq!(f.accounts.get_balance(f.alice.id).await.unwrap(), 100);

        let processed = f.processor.process(&f.cashier, pending.id).await.unwrap();
        assert_eq!(processed.processed, Some(true));
        assert_eq!(processed.processed_by.as_deref(), Some("cash0001"));
        assert_eq!(f.accounts.get_balance(f.alice.id).await.unwrap(), 70);

        let err = f.processor.process(&f.cashier, pending.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::State(_)));
        assert_eq!(f.accounts.get_balance(f.alice.id).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_process_requires_cashier_and_redemption() {
        let f = setup().await;
        let pending = redeem(&f, 30).await;

        let err = f.processor.process(&f.alice, pending.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Authorization(_)));

        let purchase = f.ledger.list_for_account(f.alice.id).await.unwrap();
        let purchase_id = purchase.last().unwrap().id;
        let err = f.processor.process(&f.cashier, purchase_id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Validation(_)));

        let err = f.processor.process(&f.cashier, 9999).await.unwrap_err();
        assert!(matches!(err, RewardsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_process_rejects_when_balance_moved() {
        let f = setup().await;
        let pending = redeem(&f, 80).await;

        let bob = f
            .accounts
            .seed("bobby002", "Bob", "bob@mail.example.com", Role::Regular)
            .await
            .unwrap();
        f.ledger
            .transfer(
                &f.alice,
                TransferRequest {
                    recipient_id: bob.id,
                    amount: 50,
                    remark: String::new(),
                },
            )
            .await
            .unwrap();

        let err = f.processor.process(&f.cashier, pending.id).await.unwrap_err();
        assert!(matches!(
            err,
            RewardsError::InsufficientBalance { requested: 80, available: 50 }
        ));

        // Still pending
        let txn = f.ledger.get(pending.id).await.unwrap();
        assert_eq!(txn.processed, Some(false));
    }
}
