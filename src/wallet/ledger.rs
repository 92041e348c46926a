use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::*;
use crate::error::{AppError, AppResult, LedgerError};
use crate::store::{MarketStore, StoreTx};

/// Wallets held for one movement through escrow
#[derive(Debug)]
pub struct EscrowLocks {
    pub escrow: Wallet,
    pub counterparts: BTreeMap<Uuid, Wallet>,
}

fn lock_order(escrow_user_id: Uuid, counterparts: &[Uuid]) -> Vec<Uuid> {
    let mut users: Vec<Uuid> = counterparts.to_vec();
    users.push(escrow_user_id);
    users.sort();
    users.dedup();
    users
}

/// A single balance movement to apply to one wallet
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: WalletTransactionKind,
    /// Signed: credits positive, debits negative
    pub amount: Decimal,
    pub links: TransactionLinks,
    pub external_reference: Option<String>,
    pub description: Option<String>,
}

impl LedgerEntry {
    pub fn new(kind: WalletTransactionKind, amount: Decimal) -> Self {
        Self {
            kind,
            amount,
            links: TransactionLinks::default(),
            external_reference: None,
            description: None,
        }
    }

    pub fn links(mut self, links: TransactionLinks) -> Self {
        self.links = links;
        self
    }

    pub fn external_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference = reference;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn into_row(self, wallet_id: Uuid, status: WalletTransactionStatus) -> WalletTransaction {
        let now = Utc::now();
        WalletTransaction {
            id: Uuid::new_v4(),
            seq: 0,
            wallet_id,
            amount: self.amount,
            balance_before: None,
            balance_after: None,
            kind: self.kind,
            status,
            order_id: self.links.order_id,
            order_group_id: self.links.order_group_id,
            settlement_id: self.links.settlement_id,
            order_line_id: self.links.order_line_id,
            external_reference: self.external_reference,
            description: self.description,
            created_at: now,
            completed_at: None,
        }
    }
}

/// Debit/credit pair written by `transfer`
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub debit: WalletTransaction,
    pub credit: WalletTransaction,
}

/// Wallet ledger - the only code path that changes a wallet balance.
///
/// The `*_in` functions run inside a caller-owned store transaction so that
/// payment, refund and payout can combine ledger writes with order and
/// inventory writes atomically. The remaining methods open their own.
#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn MarketStore>,
    escrow_user_id: Uuid,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn MarketStore>, escrow_user_id: Uuid) -> Self {
        Self {
            store,
            escrow_user_id,
        }
    }

    pub fn escrow_user_id(&self) -> Uuid {
        self.escrow_user_id
    }

    // ========== TRANSACTION-SCOPED PRIMITIVES ==========

    /// Returns the user's wallet, creating an empty active one if missing
    pub async fn open_wallet_in(tx: &mut dyn StoreTx, user_id: Uuid) -> AppResult<Wallet> {
        if let Some(wallet) = tx.lock_wallet(user_id).await? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(user_id);
        tx.insert_wallet(&wallet).await?;
        debug!(user_id = %user_id, wallet_id = %wallet.id, "Opened wallet");
        Ok(wallet)
    }

    /// Applies one signed entry to a wallet and appends the Success row
    pub async fn post_in(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        entry: LedgerEntry,
    ) -> AppResult<WalletTransaction> {
        if entry.amount.is_zero() {
            return Err(LedgerError::NonPositiveAmount(entry.amount).into());
        }

        let wallet = tx
            .lock_wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;

        Self::apply_to_wallet(tx, &wallet, entry).await
    }

    async fn apply_to_wallet(
        tx: &mut dyn StoreTx,
        wallet: &Wallet,
        entry: LedgerEntry,
    ) -> AppResult<WalletTransaction> {
        if !wallet.is_active() {
            return Err(LedgerError::WalletLocked(wallet.user_id).into());
        }

        let balance_before = wallet.balance;
        let balance_after = balance_before + entry.amount;
        if balance_after < Decimal::ZERO {
            return Err(LedgerError::InsufficientBalance {
                required: -entry.amount,
                available: balance_before,
            }
            .into());
        }

        tx.update_wallet_balance(wallet.id, balance_after).await?;

        let mut row = entry.into_row(wallet.id, WalletTransactionStatus::Success);
        row.balance_before = Some(balance_before);
        row.balance_after = Some(balance_after);
        row.completed_at = Some(row.created_at);

        tx.insert_wallet_transaction(&row).await
    }

    /// Moves `amount` between two wallets as a linked debit/credit pair.
    /// Both wallets are locked in ascending user id order before posting.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_in(
        tx: &mut dyn StoreTx,
        from_user: Uuid,
        to_user: Uuid,
        amount: Decimal,
        debit_kind: WalletTransactionKind,
        credit_kind: WalletTransactionKind,
        links: TransactionLinks,
        description: &str,
    ) -> AppResult<TransferRecord> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }

        let mut users = [from_user, to_user];
        users.sort();
        for user_id in users {
            if tx.lock_wallet(user_id).await?.is_none() {
                return Err(LedgerError::WalletNotFound(user_id).into());
            }
        }

        let debit = Self::post_in(
            tx,
            from_user,
            LedgerEntry::new(debit_kind, -amount)
                .links(links)
                .description(description),
        )
        .await?;
        let credit = Self::post_in(
            tx,
            to_user,
            LedgerEntry::new(credit_kind, amount)
                .links(links)
                .description(description),
        )
        .await?;

        Ok(TransferRecord { debit, credit })
    }

    /// Locks the platform escrow wallet; a missing escrow fails closed
    async fn lock_escrow_in(&self, tx: &mut dyn StoreTx) -> AppResult<Wallet> {
        tx.lock_wallet(self.escrow_user_id)
            .await?
            .ok_or_else(|| LedgerError::EscrowWalletMissing(self.escrow_user_id).into())
    }

    /// Locks escrow and its counterpart wallets in ascending user id order.
    ///
    /// Every movement through escrow takes its locks here, so payments,
    /// refunds and payouts always queue on wallets in the same order.
    /// Missing counterparts are opened when `open_missing` is set and left
    /// out of the result otherwise.
    pub async fn lock_with_escrow_in(
        &self,
        tx: &mut dyn StoreTx,
        counterparts: &[Uuid],
        open_missing: bool,
    ) -> AppResult<EscrowLocks> {
        let mut escrow = None;
        let mut locked = BTreeMap::new();

        for user_id in lock_order(self.escrow_user_id, counterparts) {
            if user_id == self.escrow_user_id {
                escrow = Some(self.lock_escrow_in(tx).await?);
            } else if open_missing {
                locked.insert(user_id, Self::open_wallet_in(tx, user_id).await?);
            } else if let Some(wallet) = tx.lock_wallet(user_id).await? {
                locked.insert(user_id, wallet);
            }
        }

        Ok(EscrowLocks {
            escrow: escrow.ok_or(LedgerError::EscrowWalletMissing(self.escrow_user_id))?,
            counterparts: locked,
        })
    }

    // ========== SELF-CONTAINED OPERATIONS ==========

    pub async fn open_wallet(&self, user_id: Uuid) -> AppResult<Wallet> {
        let mut tx = self.store.begin().await?;
        let wallet = Self::open_wallet_in(tx.as_mut(), user_id).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    /// Opens the escrow wallet at startup
    pub async fn provision_escrow(&self) -> AppResult<Wallet> {
        let wallet = self.open_wallet(self.escrow_user_id).await?;
        info!("✓ Escrow wallet ready: {} (balance {})", wallet.id, wallet.balance);
        Ok(wallet)
    }

    pub async fn deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        external_reference: Option<String>,
    ) -> AppResult<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }

        let mut tx = self.store.begin().await?;
        Self::open_wallet_in(tx.as_mut(), user_id).await?;
        let row = Self::post_in(
            tx.as_mut(),
            user_id,
            LedgerEntry::new(WalletTransactionKind::Deposit, amount)
                .external_reference(external_reference)
                .description("Wallet deposit"),
        )
        .await?;
        tx.commit().await?;

        info!(user_id = %user_id, amount = %amount, "💰 Deposit credited");
        Ok(row)
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: Decimal,
        external_reference: Option<String>,
    ) -> AppResult<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }

        let mut tx = self.store.begin().await?;
        let row = Self::post_in(
            tx.as_mut(),
            user_id,
            LedgerEntry::new(WalletTransactionKind::Withdrawal, -amount)
                .external_reference(external_reference)
                .description("Wallet withdrawal"),
        )
        .await?;
        tx.commit().await?;

        info!(user_id = %user_id, amount = %amount, "💸 Withdrawal debited");
        Ok(row)
    }

    /// Records a deposit awaiting confirmation from an external gateway.
    /// The balance is untouched until `complete_transaction`.
    pub async fn begin_deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        external_reference: Option<String>,
    ) -> AppResult<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }

        let mut tx = self.store.begin().await?;
        let wallet = Self::open_wallet_in(tx.as_mut(), user_id).await?;
        let row = LedgerEntry::new(WalletTransactionKind::Deposit, amount)
            .external_reference(external_reference)
            .description("Gateway deposit")
            .into_row(wallet.id, WalletTransactionStatus::Pending);
        let row = tx.insert_wallet_transaction(&row).await?;
        tx.commit().await?;

        debug!(user_id = %user_id, txn_id = %row.id, "Pending deposit recorded");
        Ok(row)
    }

    /// Resolves a Pending row exactly once. On success the amount is applied
    /// and the balance snapshots are stamped.
    pub async fn complete_transaction(&self, txn_id: Uuid, succeeded: bool) -> AppResult<WalletTransaction> {
        let mut tx = self.store.begin().await?;

        let row = tx
            .lock_wallet_transaction(txn_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wallet transaction {}", txn_id)))?;
        if row.status != WalletTransactionStatus::Pending {
            return Err(LedgerError::TransactionNotPending(txn_id).into());
        }

        let wallet = tx
            .lock_wallet_by_id(row.wallet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", row.wallet_id)))?;

        let now = Utc::now();
        let completed = if succeeded {
            if !wallet.is_active() {
                return Err(LedgerError::WalletLocked(wallet.user_id).into());
            }
            let balance_after = wallet.balance + row.amount;
            if balance_after < Decimal::ZERO {
                return Err(LedgerError::InsufficientBalance {
                    required: -row.amount,
                    available: wallet.balance,
                }
                .into());
            }
            tx.update_wallet_balance(wallet.id, balance_after).await?;
            tx.complete_wallet_transaction(
                txn_id,
                WalletTransactionStatus::Success,
                Some(wallet.balance),
                Some(balance_after),
                now,
            )
            .await?
        } else {
            tx.complete_wallet_transaction(txn_id, WalletTransactionStatus::Fail, None, None, now)
                .await?
        };

        tx.commit().await?;

        if succeeded {
            info!(txn_id = %txn_id, "✓ Pending transaction settled");
        } else {
            warn!(txn_id = %txn_id, "Pending transaction failed");
        }
        Ok(completed)
    }

    pub async fn set_status(&self, user_id: Uuid, status: WalletStatus) -> AppResult<Wallet> {
        let mut tx = self.store.begin().await?;
        let mut wallet = tx
            .lock_wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        tx.update_wallet_status(wallet.id, status).await?;
        tx.commit().await?;

        wallet.status = status;
        info!(user_id = %user_id, status = ?status, "Wallet status changed");
        Ok(wallet)
    }

    pub async fn balance(&self, user_id: Uuid) -> AppResult<Wallet> {
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .find_wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        tx.commit().await?;
        Ok(wallet)
    }

    pub async fn history(&self, user_id: Uuid) -> AppResult<Vec<WalletTransaction>> {
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .find_wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        let rows = tx.list_wallet_transactions(wallet.id).await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Replays the Success rows of a wallet against its stored balance
    pub async fn reconcile(&self, user_id: Uuid) -> AppResult<WalletReconciliation> {
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .find_wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        let rows = tx.list_wallet_transactions(wallet.id).await?;
        tx.commit().await?;

        let report = replay(&wallet, &rows);
        if !report.consistent {
            warn!(
                user_id = %user_id,
                balance = %report.balance,
                replayed = %report.replayed_balance,
                "⚠️ Wallet ledger does not reconcile"
            );
        }
        Ok(report)
    }
}

/// The sum is taken in creation order. The snapshot chain is checked in the
/// order rows were applied, which differs from creation order only for rows
/// that sat Pending for a while.
fn replay(wallet: &Wallet, rows: &[WalletTransaction]) -> WalletReconciliation {
    let mut applied: Vec<&WalletTransaction> = rows.iter().filter(|t| t.is_success()).collect();
    let replayed_balance: Decimal = applied.iter().map(|t| t.amount).sum();

    applied.sort_by_key(|t| (t.completed_at.unwrap_or(t.created_at), t.seq));

    let mut running = Decimal::ZERO;
    let mut broken_at = None;
    for row in &applied {
        let expected_after = running + row.amount;
        if broken_at.is_none()
            && (row.balance_before != Some(running) || row.balance_after != Some(expected_after))
        {
            broken_at = Some(row.id);
        }
        running = expected_after;
    }

    WalletReconciliation {
        wallet_id: wallet.id,
        user_id: wallet.user_id,
        balance: wallet.balance,
        replayed_balance,
        transaction_count: applied.len(),
        broken_at,
        consistent: broken_at.is_none() && replayed_balance == wallet.balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMarketStore;
    use rust_decimal_macros::dec;

    fn ledger() -> WalletLedger {
        WalletLedger::new(Arc::new(MemoryMarketStore::new()), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw_snapshots() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        let dep = ledger.deposit(user, dec!(50), None).await.unwrap();
        assert_eq!(dep.balance_before, Some(dec!(0)));
        assert_eq!(dep.balance_after, Some(dec!(50)));

        let wd = ledger.withdraw(user, dec!(20), None).await.unwrap();
        assert_eq!(wd.amount, dec!(-20));
        assert_eq!(wd.balance_after, Some(dec!(30)));

        assert_eq!(ledger.balance(user).await.unwrap().balance, dec!(30));
        assert!(ledger.reconcile(user).await.unwrap().consistent);
    }

    #[test]
    fn test_lock_order_is_ascending_and_unique() {
        let mut ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let escrow = ids[2];
        let order = lock_order(escrow, &[ids[3], ids[0], ids[3], ids[1]]);

        ids.sort();
        assert_eq!(order, ids);
        assert_eq!(lock_order(escrow, &[]), vec![escrow]);
    }

    #[tokio::test]
    async fn test_escrow_locks_open_or_skip_counterparts() {
        let ledger = ledger();
        let (customer, seller) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.deposit(customer, dec!(5), None).await.unwrap();

        let mut tx = ledger.store.begin().await.unwrap();
        let err = ledger
            .lock_with_escrow_in(tx.as_mut(), &[customer], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::EscrowWalletMissing(_))));
        drop(tx);

        ledger.provision_escrow().await.unwrap();
        let mut tx = ledger.store.begin().await.unwrap();
        let locks = ledger
            .lock_with_escrow_in(tx.as_mut(), &[customer, seller], false)
            .await
            .unwrap();
        assert_eq!(locks.escrow.user_id, ledger.escrow_user_id());
        assert_eq!(locks.counterparts[&customer].balance, dec!(5));
        assert!(!locks.counterparts.contains_key(&seller));

        let locks = ledger
            .lock_with_escrow_in(tx.as_mut(), &[seller], true)
            .await
            .unwrap();
        assert_eq!(locks.counterparts[&seller].balance, dec!(0));
        tx.commit().await.unwrap();
        assert!(ledger.balance(seller).await.is_ok());
    }

    #[tokio::test]
    async fn test_overdraft_rejected_without_rows() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.deposit(user, dec!(15), None).await.unwrap();

        let err = ledger.withdraw(user, dec!(20), None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::InsufficientBalance { .. })
        ));

        assert_eq!(ledger.history(user).await.unwrap().len(), 1);
        assert_eq!(ledger.balance(user).await.unwrap().balance, dec!(15));
    }

    #[tokio::test]
    async fn test_locked_wallet_rejects_posts() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.deposit(user, dec!(10), None).await.unwrap();
        ledger.set_status(user, WalletStatus::Locked).await.unwrap();

        let err = ledger.withdraw(user, dec!(1), None).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::WalletLocked(_))));

        ledger.set_status(user, WalletStatus::Active).await.unwrap();
        ledger.withdraw(user, dec!(1), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_deposit_completes_once() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        let pending = ledger.begin_deposit(user, dec!(25), Some("gw-1".into())).await.unwrap();
        assert_eq!(pending.status, WalletTransactionStatus::Pending);
        assert_eq!(pending.balance_before, None);
        assert_eq!(ledger.balance(user).await.unwrap().balance, dec!(0));

        // A direct deposit lands while the gateway deposit is still pending
        ledger.deposit(user, dec!(5), None).await.unwrap();

        let done = ledger.complete_transaction(pending.id, true).await.unwrap();
        assert_eq!(done.balance_before, Some(dec!(5)));
        assert_eq!(done.balance_after, Some(dec!(30)));

        let again = ledger.complete_transaction(pending.id, false).await.unwrap_err();
        assert!(matches!(
            again,
            AppError::Ledger(LedgerError::TransactionNotPending(_))
        ));

        let report = ledger.reconcile(user).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.replayed_balance, dec!(30));
    }

    #[tokio::test]
    async fn test_failed_pending_leaves_balance() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        let pending = ledger.begin_deposit(user, dec!(25), None).await.unwrap();

        let failed = ledger.complete_transaction(pending.id, false).await.unwrap();
        assert_eq!(failed.status, WalletTransactionStatus::Fail);
        assert_eq!(ledger.balance(user).await.unwrap().balance, dec!(0));
        assert!(ledger.reconcile(user).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_transfer_writes_linked_pair() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = WalletLedger::new(store.clone(), Uuid::new_v4());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.deposit(a, dec!(40), None).await.unwrap();
        ledger.open_wallet(b).await.unwrap();

        let order_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let record = WalletLedger::transfer_in(
            tx.as_mut(),
            a,
            b,
            dec!(12.50),
            WalletTransactionKind::Transfer,
            WalletTransactionKind::Transfer,
            TransactionLinks::order(order_id),
            "test transfer",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(record.debit.amount, dec!(-12.50));
        assert_eq!(record.credit.amount, dec!(12.50));
        assert_eq!(record.debit.order_id, Some(order_id));
        assert_eq!(ledger.balance(a).await.unwrap().balance, dec!(27.50));
        assert_eq!(ledger.balance(b).await.unwrap().balance, dec!(12.50));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = WalletLedger::new(store.clone(), Uuid::new_v4());
        let user = Uuid::new_v4();
        ledger.deposit(user, dec!(10), None).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            WalletLedger::post_in(
                tx.as_mut(),
                user,
                LedgerEntry::new(WalletTransactionKind::Withdrawal, dec!(-10)),
            )
            .await
            .unwrap();
        }

        assert_eq!(ledger.balance(user).await.unwrap().balance, dec!(10));
        assert_eq!(ledger.history(user).await.unwrap().len(), 1);
    }

    #[test]
    fn test_replay_detects_tampered_snapshot() {
        let wallet = Wallet {
            balance: dec!(10),
            ..Wallet::new(Uuid::new_v4())
        };
        let mut row = LedgerEntry::new(WalletTransactionKind::Deposit, dec!(10))
            .into_row(wallet.id, WalletTransactionStatus::Success);
        row.balance_before = Some(dec!(1));
        row.balance_after = Some(dec!(11));
        row.completed_at = Some(row.created_at);

        let report = replay(&wallet, &[row.clone()]);
        assert_eq!(report.replayed_balance, dec!(10));
        assert_eq!(report.broken_at, Some(row.id));
        assert!(!report.consistent);
    }
}
