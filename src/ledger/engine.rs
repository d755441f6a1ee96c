/// Transaction processing
use crate::{
    account::{apply_delta, apply_delta_floored, debit_if_covered, load_account, Actor, Role},
    clock::Clock,
    config::LedgerConfig,
    db::{self, retry_on_conflict},
    error::{RewardsError, RewardsResult},
    event::{guest_ids, is_guest, is_organizer, load_event, reserve_points},
    ledger::{
        pricing,
        records::{
            self, insert_transaction, link_promotions, load_transaction, swap_suspicious,
            NewTransaction,
        },
        AdjustmentRequest, AwardTarget, EventAwardRequest, PurchaseRequest, RedemptionRequest,
        Transaction, TransactionKind, TransferReceipt, TransferRequest,
    },
    promotion::{load_promotion, record_usage, usage_exists, PromotionKind},
};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

/// Ledger service
///
/// Each public operation runs in a single storage transaction and is retried
/// as a whole when SQLite reports a competing writer.
#[derive(Clone)]
pub struct Ledger {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self { db, clock, config }
    }

    /// Record a purchase and credit its points, unless the cashier is under
    /// suspicion
    pub async fn purchase(&self, actor: &Actor, req: PurchaseRequest) -> RewardsResult<Transaction> {
        actor.require(Role::Cashier)?;
        pricing::to_cents(req.spent)?;

        let mut seen = HashSet::new();
        if !req.promotion_ids.iter().all(|id| seen.insert(*id)) {
            return Err(RewardsError::Validation(
                "Promotion ids must not repeat".to_string(),
            ));
        }

        let txn = retry_on_conflict(&self.config, "purchase", || self.try_purchase(actor, &req))
            .await?;

        if txn.suspicious {
            tracing::warn!(
                transaction_id = txn.id,
                cashier = %actor.utorid,
                withheld = txn.amount,
                "purchase by suspicious cashier, points withheld"
            );
        } else {
            tracing::info!(
                transaction_id = txn.id,
                account_id = txn.account_id,
                earned = txn.amount,
                cashier = %actor.utorid,
                "purchase recorded"
            );
        }

        Ok(txn)
    }

    async fn try_purchase(&self, actor: &Actor, req: &PurchaseRequest) -> RewardsResult<Transaction> {
        let now = self.clock.now();
        let mut tx = db::begin_write(&self.db).await?;

        let customer = load_account(&mut tx, req.account_id).await?;
        let cashier = load_account(&mut tx, actor.id).await?;

        let mut promotions = Vec::with_capacity(req.promotion_ids.len());
        for id in &req.promotion_ids {
            let promotion = load_promotion(&mut tx, *id).await?;
            if !promotion.is_active_at(now) {
                return Err(RewardsError::Validation(format!(
                    "Promotion {} is not active",
                    promotion.id
                )));
            }
            if usage_exists(&mut tx, customer.id, promotion.id).await? {
                return Err(RewardsError::Conflict(format!(
                    "Promotion {} already used by {}",
                    promotion.id, customer.utorid
                )));
            }
            if !promotion.accepts_spend(req.spent) {
                return Err(RewardsError::Validation(format!(
                    "Promotion {} requires a minimum spend of {}",
                    promotion.id,
                    promotion.min_spending.unwrap_or_default()
                )));
            }
            promotions.push(promotion);
        }

        let quote = pricing::quote(req.spent, &promotions)?;
        let suspicious = cashier.is_suspicious_cashier();
        let earned = if suspicious { 0 } else { quote.total() };

        let mut row = NewTransaction::new(
            TransactionKind::Purchase,
            customer.id,
            quote.total(),
            &req.remark,
            &actor.utorid,
            now,
        );
        row.spent = Some(req.spent);
        row.earned = Some(earned);
        row.suspicious = suspicious;
        let id = insert_transaction(&mut tx, &row).await?;

        link_promotions(&mut tx, id, &req.promotion_ids).await?;
        for promotion in promotions.iter().filter(|p| p.kind == PromotionKind::OneTime) {
            record_usage(&mut tx, customer.id, promotion.id, id, now).await?;
        }

        if !suspicious {
            apply_delta(&mut tx, customer.id, earned).await?;
        }

        let txn = load_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(txn)
    }

    /// Manager correction referencing an earlier transaction
    pub async fn adjustment(
        &self,
        actor: &Actor,
        req: AdjustmentRequest,
    ) -> RewardsResult<Transaction> {
        actor.require(Role::Manager)?;

        if req.amount == 0 {
            return Err(RewardsError::Validation(
                "Adjustment amount must be non-zero".to_string(),
            ));
        }

        let txn = retry_on_conflict(&self.config, "adjustment", || {
            self.try_adjustment(actor, &req)
        })
        .await?;

        tracing::info!(
            transaction_id = txn.id,
            account_id = txn.account_id,
            amount = txn.amount,
            related_id = req.related_id,
            manager = %actor.utorid,
            "adjustment recorded"
        );

        Ok(txn)
    }

    async fn try_adjustment(
        &self,
        actor: &Actor,
        req: &AdjustmentRequest,
    ) -> RewardsResult<Transaction> {
        let mut tx = db::begin_write(&self.db).await?;

        let account = load_account(&mut tx, req.account_id).await?;
        load_transaction(&mut tx, req.related_id).await?;

        let mut row = NewTransaction::new(
            TransactionKind::Adjustment,
            account.id,
            req.amount,
            &req.remark,
            &actor.utorid,
            self.clock.now(),
        );
        row.related_id = Some(req.related_id);
        let id = insert_transaction(&mut tx, &row).await?;

        apply_delta(&mut tx, account.id, req.amount).await?;

        let txn = load_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(txn)
    }

    /// Move points from the acting account to another
    pub async fn transfer(
        &self,
        actor: &Actor,
        req: TransferRequest,
    ) -> RewardsResult<TransferReceipt> {
        if req.amount <= 0 {
            return Err(RewardsError::Validation(
                "Transfer amount must be positive".to_string(),
            ));
        }
        if req.recipient_id == actor.id {
            return Err(RewardsError::Validation(
                "Cannot transfer points to yourself".to_string(),
            ));
        }

        let receipt =
            retry_on_conflict(&self.config, "transfer", || self.try_transfer(actor, &req)).await?;

        tracing::info!(
            sender = %actor.utorid,
            recipient_id = req.recipient_id,
            amount = req.amount,
            "transfer recorded"
        );

        Ok(receipt)
    }

    async fn try_transfer(
        &self,
        actor: &Actor,
        req: &TransferRequest,
    ) -> RewardsResult<TransferReceipt> {
        let now = self.clock.now();
        let mut tx = db::begin_write(&self.db).await?;

        let sender = load_account(&mut tx, actor.id).await?;
        if !sender.verified {
            return Err(RewardsError::Authorization(
                "Only verified accounts can transfer points".to_string(),
            ));
        }
        let recipient = load_account(&mut tx, req.recipient_id).await?;

        debit_if_covered(&mut tx, sender.id, req.amount).await?;
        apply_delta(&mut tx, recipient.id, req.amount).await?;

        let mut sent = NewTransaction::new(
            TransactionKind::Transfer,
            sender.id,
            -req.amount,
            &req.remark,
            &actor.utorid,
            now,
        );
        sent.related_id = Some(recipient.id);
        let sent_id = insert_transaction(&mut tx, &sent).await?;

        let mut received = NewTransaction::new(
            TransactionKind::Transfer,
            recipient.id,
            req.amount,
            &req.remark,
            &actor.utorid,
            now,
        );
        received.related_id = Some(sender.id);
        let received_id = insert_transaction(&mut tx, &received).await?;

        let receipt = TransferReceipt {
            sent: load_transaction(&mut tx, sent_id).await?,
            received: load_transaction(&mut tx, received_id).await?,
        };
        tx.commit().await?;
        Ok(receipt)
    }

    /// Request a redemption; the balance is debited when it is processed
    pub async fn redemption(
        &self,
        actor: &Actor,
        req: RedemptionRequest,
    ) -> RewardsResult<Transaction> {
        if req.amount <= 0 {
            return Err(RewardsError::Validation(
                "Redemption amount must be positive".to_string(),
            ));
        }

        let txn = retry_on_conflict(&self.config, "redemption", || {
            self.try_redemption(actor, &req)
        })
        .await?;

        tracing::info!(
            transaction_id = txn.id,
            account = %actor.utorid,
            amount = req.amount,
            "redemption requested"
        );

        Ok(txn)
    }

    async fn try_redemption(
        &self,
        actor: &Actor,
        req: &RedemptionRequest,
    ) -> RewardsResult<Transaction> {
        let mut tx = db::begin_write(&self.db).await?;

        let account = load_account(&mut tx, actor.id).await?;
        if !account.verified {
            return Err(RewardsError::Authorization(
                "Only verified accounts can redeem points".to_string(),
            ));
        }
        if req.amount > account.points {
            return Err(RewardsError::InsufficientBalance {
                requested: req.amount,
                available: account.points,
            });
        }

        let mut row = NewTransaction::new(
            TransactionKind::Redemption,
            account.id,
            -req.amount,
            &req.remark,
            &actor.utorid,
            self.clock.now(),
        );
        row.processed = Some(false);
        let id = insert_transaction(&mut tx, &row).await?;

        let txn = load_transaction(&mut tx, id).await?;
        tx.commit().await?;
        Ok(txn)
    }

    /// Disburse event points to one guest or to every guest as one batch
    pub async fn award_event_points(
        &self,
        actor: &Actor,
        req: EventAwardRequest,
    ) -> RewardsResult<Vec<Transaction>> {
        if req.amount < 0 {
            return Err(RewardsError::Validation(
                "Awarded points must be non-negative".to_string(),
            ));
        }

        let txns = retry_on_conflict(&self.config, "award_event_points", || {
            self.try_award(actor, &req)
        })
        .await?;

        tracing::info!(
            event_id = req.event_id,
            recipients = txns.len(),
            per_recipient = req.amount,
            awarded_by = %actor.utorid,
            "event points awarded"
        );

        Ok(txns)
    }

    async fn try_award(
        &self,
        actor: &Actor,
        req: &EventAwardRequest,
    ) -> RewardsResult<Vec<Transaction>> {
        let now = self.clock.now();
        let mut tx = db::begin_write(&self.db).await?;

        let event = load_event(&mut tx, req.event_id).await?;
        if !actor.role.meets(Role::Manager) && !is_organizer(&mut tx, event.id, actor.id).await? {
            return Err(RewardsError::Authorization(
                "Only managers and event organizers can award event points".to_string(),
            ));
        }

        let recipients = match req.target {
            AwardTarget::Guest(account_id) => {
                if !is_guest(&mut tx, event.id, account_id).await? {
                    return Err(RewardsError::Validation(format!(
                        "Account {} is not a guest of event {}",
                        account_id, event.id
                    )));
                }
                vec![account_id]
            }
            AwardTarget::AllGuests => {
                let guests = guest_ids(&mut tx, event.id).await?;
                if guests.is_empty() {
                    return Err(RewardsError::Validation(format!(
                        "Event {} has no guests",
                        event.id
                    )));
                }
                guests
            }
        };

        let total = req
            .amount
            .checked_mul(recipients.len() as i64)
            .ok_or_else(|| RewardsError::Validation("Awarded total is too large".to_string()))?;
        reserve_points(&mut tx, event.id, total).await?;

        let mut ids = Vec::with_capacity(recipients.len());
        for account_id in &recipients {
            let mut row = NewTransaction::new(
                TransactionKind::Event,
                *account_id,
                0,
                &req.remark,
                &actor.utorid,
                now,
            );
            row.awarded = Some(req.amount);
            row.related_id = Some(event.id);
            ids.push(insert_transaction(&mut tx, &row).await?);

            apply_delta(&mut tx, *account_id, req.amount).await?;
        }

        let mut txns = Vec::with_capacity(ids.len());
        for id in ids {
            txns.push(load_transaction(&mut tx, id).await?);
        }
        tx.commit().await?;
        Ok(txns)
    }

    /// Flag or clear a transaction, reversing or replaying its effect.
    ///
    /// Flagging floors the owner's balance at zero; clearing credits the full
    /// effect back.
    pub async fn set_suspicious(
        &self,
        actor: &Actor,
        id: i64,
        suspicious: bool,
    ) -> RewardsResult<Transaction> {
        actor.require(Role::Manager)?;

        retry_on_conflict(&self.config, "set_suspicious", || {
            self.try_set_suspicious(actor, id, suspicious)
        })
        .await
    }

    async fn try_set_suspicious(
        &self,
        actor: &Actor,
        id: i64,
        suspicious: bool,
    ) -> RewardsResult<Transaction> {
        let mut tx = db::begin_write(&self.db).await?;
        let txn = load_transaction(&mut tx, id).await?;

        if txn.suspicious == suspicious {
            return Ok(txn);
        }

        if !swap_suspicious(&mut tx, id, txn.suspicious, suspicious).await? {
            return Err(RewardsError::Conflict(format!(
                "Transaction {} changed concurrently",
                id
            )));
        }

        let effect = txn.point_effect();
        let balance = if suspicious {
            apply_delta_floored(&mut tx, txn.account_id, -effect).await?
        } else {
            apply_delta(&mut tx, txn.account_id, effect).await?
        };

        let updated = load_transaction(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(
            transaction_id = id,
            suspicious,
            effect,
            balance,
            manager = %actor.utorid,
            "transaction suspicion changed"
        );

        Ok(updated)
    }

    pub async fn get(&self, id: i64) -> RewardsResult<Transaction> {
        let mut conn = self.db.acquire().await?;
        load_transaction(&mut conn, id).await
    }

    /// All transactions owned by the account, newest first
    pub async fn list_for_account(&self, account_id: i64) -> RewardsResult<Vec<Transaction>> {
        let mut conn = self.db.acquire().await?;
        load_account(&mut conn, account_id).await?;
        records::list_for_account(&mut conn, account_id).await
    }
}
