use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use crate::error::{AppError, AppResult, InventoryError};
use crate::orders::models::{LineStatus, OrderLine};
use crate::store::{MarketStore, StoreTx};

/// Inventory ledger - sole mutator of on-hand quantities
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn MarketStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    // ========== TRANSACTION-SCOPED PRIMITIVES ==========

    /// Applies one signed movement to an (item, warehouse) record.
    ///
    /// Imports create the record when missing; any other kind requires it.
    /// A movement that would leave the record negative is rejected whole.
    pub async fn apply_in(tx: &mut dyn StoreTx, change: InventoryChange) -> AppResult<InventoryTransaction> {
        if change.delta == 0 {
            return Err(AppError::Validation("inventory delta must be non-zero".to_string()));
        }

        let record = match tx.lock_inventory_record(change.item_id, change.warehouse_id).await? {
            Some(record) => record,
            None if change.kind == InventoryTransactionKind::Import => {
                let record = InventoryRecord::empty(change.item_id, change.warehouse_id);
                tx.insert_inventory_record(&record).await?;
                record
            }
            None => {
                return Err(InventoryError::RecordNotFound {
                    item_id: change.item_id,
                    warehouse_id: change.warehouse_id,
                }
                .into())
            }
        };

        let quantity_after = record
            .quantity
            .checked_add(change.delta)
            .ok_or(InventoryError::QuantityOverflow(change.item_id))?;
        if quantity_after < 0 {
            return Err(InventoryError::InsufficientStock {
                item_id: change.item_id,
                requested: change.delta.saturating_neg(),
                available: record.quantity,
            }
            .into());
        }

        tx.update_inventory_quantity(record.id, quantity_after).await?;

        let row = InventoryTransaction {
            id: Uuid::new_v4(),
            seq: 0,
            record_id: record.id,
            item_id: change.item_id,
            warehouse_id: change.warehouse_id,
            kind: change.kind,
            delta: change.delta,
            quantity_before: record.quantity,
            quantity_after,
            reference_kind: change.reference.map(|r| r.kind),
            reference_id: change.reference.map(|r| r.id),
            performed_by: change.performed_by,
            note: change.note,
            created_at: Utc::now(),
        };

        tx.insert_inventory_transaction(&row).await
    }

    /// Exports the material quantities of a paid order, once per order.
    ///
    /// Canceled lines are skipped. Quantities are summed per item and each item
    /// is taken from the single warehouse with the most stock, provided it
    /// covers the whole amount.
    pub async fn deduct_for_order_in(
        tx: &mut dyn StoreTx,
        order_id: Uuid,
        lines: &[OrderLine],
        performed_by: Option<Uuid>,
    ) -> AppResult<Vec<InventoryTransaction>> {
        let reference = InventoryReference::order_payment(order_id);

        let existing = tx.find_inventory_transactions_by_reference(reference).await?;
        if !existing.is_empty() {
            debug!(order_id = %order_id, "Inventory already deducted for order");
            return Ok(existing);
        }

        let mut demand: Vec<(Uuid, i32)> = Vec::new();
        let stocked = lines
            .iter()
            .filter(|l| l.item_kind.is_stocked() && l.status != LineStatus::Canceled);
        for line in stocked {
            match demand.iter_mut().find(|(item_id, _)| *item_id == line.item_id) {
                Some((_, quantity)) => {
                    *quantity = quantity
                        .checked_add(line.quantity)
                        .ok_or(InventoryError::QuantityOverflow(line.item_id))?;
                }
                None => demand.push((line.item_id, line.quantity)),
            }
        }

        let mut applied = Vec::with_capacity(demand.len());
        for (item_id, quantity) in demand {
            let records = tx.lock_inventory_records_for_item(item_id).await?;
            let source = records
                .iter()
                .filter(|r| r.quantity >= quantity)
                .max_by_key(|r| r.quantity)
                .ok_or_else(|| InventoryError::InsufficientStock {
                    item_id,
                    requested: quantity,
                    available: records.iter().map(|r| r.quantity).max().unwrap_or(0),
                })?;

            let row = Self::apply_in(
                tx,
                InventoryChange {
                    item_id,
                    warehouse_id: source.warehouse_id,
                    kind: InventoryTransactionKind::Export,
                    delta: -quantity,
                    reference: Some(reference),
                    performed_by,
                    note: Some(format!("Order {} payment", order_id)),
                },
            )
            .await?;
            applied.push(row);
        }

        Ok(applied)
    }

    /// Returns a canceled line's quantity to the warehouse it was exported
    /// from. No-op for non-stocked lines and for lines never deducted.
    pub async fn restock_line_in(
        tx: &mut dyn StoreTx,
        line: &OrderLine,
        performed_by: Option<Uuid>,
    ) -> AppResult<Option<InventoryTransaction>> {
        if !line.item_kind.is_stocked() {
            return Ok(None);
        }

        let reference = InventoryReference::order_cancellation(line.id);
        let existing = tx.find_inventory_transactions_by_reference(reference).await?;
        if let Some(row) = existing.into_iter().next() {
            return Ok(Some(row));
        }

        let export = tx
            .find_inventory_transactions_by_reference(InventoryReference::order_payment(line.order_id))
            .await?
            .into_iter()
            .find(|t| t.item_id == line.item_id);
        let Some(export) = export else {
            return Ok(None);
        };

        let row = Self::apply_in(
            tx,
            InventoryChange {
                item_id: line.item_id,
                warehouse_id: export.warehouse_id,
                kind: InventoryTransactionKind::Return,
                delta: line.quantity,
                reference: Some(reference),
                performed_by,
                note: Some(format!("Line {} canceled", line.id)),
            },
        )
        .await?;

        Ok(Some(row))
    }

    // ========== SELF-CONTAINED OPERATIONS ==========

    /// Receives stock into a warehouse. A manual reference id makes the
    /// receipt idempotent per (item, warehouse).
    pub async fn receive_stock(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        reference_id: Option<Uuid>,
        performed_by: Option<Uuid>,
        note: Option<String>,
    ) -> AppResult<InventoryTransaction> {
        if quantity <= 0 {
            return Err(AppError::Validation("received quantity must be positive".to_string()));
        }

        self.manual_change(InventoryChange {
            item_id,
            warehouse_id,
            kind: InventoryTransactionKind::Import,
            delta: quantity,
            reference: reference_id.map(manual_reference),
            performed_by,
            note,
        })
        .await
    }

    /// Signed correction of an existing record
    pub async fn adjust_stock(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
        delta: i32,
        reference_id: Option<Uuid>,
        performed_by: Option<Uuid>,
        note: Option<String>,
    ) -> AppResult<InventoryTransaction> {
        self.manual_change(InventoryChange {
            item_id,
            warehouse_id,
            kind: InventoryTransactionKind::Adjustment,
            delta,
            reference: reference_id.map(manual_reference),
            performed_by,
            note,
        })
        .await
    }

    async fn manual_change(&self, change: InventoryChange) -> AppResult<InventoryTransaction> {
        let mut tx = self.store.begin().await?;

        if let Some(reference) = change.reference {
            let replay = tx
                .find_inventory_transactions_by_reference(reference)
                .await?
                .into_iter()
                .find(|t| t.item_id == change.item_id && t.warehouse_id == change.warehouse_id);
            if let Some(row) = replay {
                return Ok(row);
            }
        }

        let row = Self::apply_in(tx.as_mut(), change).await?;
        tx.commit().await?;

        info!(
            item_id = %row.item_id,
            warehouse_id = %row.warehouse_id,
            kind = ?row.kind,
            delta = row.delta,
            on_hand = row.quantity_after,
            "📦 Inventory updated"
        );
        Ok(row)
    }

    pub async fn on_hand(&self, item_id: Uuid, warehouse_id: Uuid) -> AppResult<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let record = tx
            .lock_inventory_record(item_id, warehouse_id)
            .await?
            .ok_or(InventoryError::RecordNotFound { item_id, warehouse_id })?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn history(&self, item_id: Uuid, warehouse_id: Uuid) -> AppResult<Vec<InventoryTransaction>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.list_inventory_transactions(item_id, warehouse_id).await?;
        tx.commit().await?;
        Ok(rows)
    }
}

fn manual_reference(id: Uuid) -> InventoryReference {
    InventoryReference {
        kind: ReferenceKind::Manual,
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::models::{ItemKind, LineStatus, SellerKind};
    use crate::store::MemoryMarketStore;
    use rust_decimal_macros::dec;

    fn line(order_id: Uuid, kind: ItemKind, item_id: Uuid, quantity: i32) -> OrderLine {
        let now = Utc::now();
        OrderLine {
            id: Uuid::new_v4(),
            order_id,
            item_kind: kind,
            item_id,
            seller_kind: SellerKind::Supplier,
            seller_id: Uuid::new_v4(),
            seller_user_id: Uuid::new_v4(),
            quantity,
            unit_price: dec!(10),
            status: LineStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_receive_creates_record_and_adjust_requires_it() {
        let ledger = InventoryLedger::new(Arc::new(MemoryMarketStore::new()));
        let (item, wh) = (Uuid::new_v4(), Uuid::new_v4());

        let err = ledger.adjust_stock(item, wh, 3, None, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Inventory(InventoryError::RecordNotFound { .. })));

        let row = ledger.receive_stock(item, wh, 10, None, None, None).await.unwrap();
        assert_eq!((row.quantity_before, row.quantity_after), (0, 10));

        ledger.adjust_stock(item, wh, -4, None, None, None).await.unwrap();
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, 6);
        assert_eq!(ledger.history(item, wh).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_negative_result_rejected_not_clamped() {
        let ledger = InventoryLedger::new(Arc::new(MemoryMarketStore::new()));
        let (item, wh) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.receive_stock(item, wh, 2, None, None, None).await.unwrap();

        let err = ledger.adjust_stock(item, wh, -3, None, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Inventory(InventoryError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_manual_reference_makes_receipt_idempotent() {
        let ledger = InventoryLedger::new(Arc::new(MemoryMarketStore::new()));
        let (item, wh, receipt) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let first = ledger.receive_stock(item, wh, 5, Some(receipt), None, None).await.unwrap();
        let second = ledger.receive_stock(item, wh, 5, Some(receipt), None, None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_deduction_picks_largest_covering_warehouse_once() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = InventoryLedger::new(store.clone());
        let item = Uuid::new_v4();
        let (small, large) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.receive_stock(item, small, 4, None, None, None).await.unwrap();
        ledger.receive_stock(item, large, 9, None, None, None).await.unwrap();

        let order_id = Uuid::new_v4();
        let lines = vec![
            line(order_id, ItemKind::Material, item, 3),
            line(order_id, ItemKind::Material, item, 2),
            line(order_id, ItemKind::Design, Uuid::new_v4(), 1),
        ];

        let mut tx = store.begin().await.unwrap();
        let rows = InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].warehouse_id, large);
        assert_eq!(rows[0].delta, -5);

        let mut tx = store.begin().await.unwrap();
        let again = InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(again[0].id, rows[0].id);

        assert_eq!(ledger.on_hand(item, large).await.unwrap().quantity, 4);
        assert_eq!(ledger.on_hand(item, small).await.unwrap().quantity, 4);
    }

    #[tokio::test]
    async fn test_deduction_fails_when_no_single_warehouse_covers() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = InventoryLedger::new(store.clone());
        let item = Uuid::new_v4();
        ledger.receive_stock(item, Uuid::new_v4(), 3, None, None, None).await.unwrap();
        ledger.receive_stock(item, Uuid::new_v4(), 3, None, None, None).await.unwrap();

        let order_id = Uuid::new_v4();
        let lines = vec![line(order_id, ItemKind::Material, item, 5)];
        let mut tx = store.begin().await.unwrap();
        let err = InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Inventory(InventoryError::InsufficientStock {
                requested: 5,
                available: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_quantity_overflow_is_rejected() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = InventoryLedger::new(store.clone());
        let (item, wh) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.receive_stock(item, wh, i32::MAX, None, None, None).await.unwrap();

        let err = ledger.receive_stock(item, wh, 1, None, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Inventory(InventoryError::QuantityOverflow(id)) if id == item));
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, i32::MAX);

        let err = ledger.adjust_stock(item, wh, i32::MIN, None, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Inventory(InventoryError::InsufficientStock {
                requested: i32::MAX,
                ..
            })
        ));

        let order_id = Uuid::new_v4();
        let lines = vec![
            line(order_id, ItemKind::Material, item, i32::MAX),
            line(order_id, ItemKind::Material, item, 1),
        ];
        let mut tx = store.begin().await.unwrap();
        let err = InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Inventory(InventoryError::QuantityOverflow(_))));
    }

    #[tokio::test]
    async fn test_canceled_lines_are_not_deducted() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = InventoryLedger::new(store.clone());
        let (item, wh) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.receive_stock(item, wh, 10, None, None, None).await.unwrap();

        let order_id = Uuid::new_v4();
        let mut canceled = line(order_id, ItemKind::Material, item, 4);
        canceled.status = LineStatus::Canceled;
        let lines = vec![canceled, line(order_id, ItemKind::Material, item, 1)];

        let mut tx = store.begin().await.unwrap();
        let rows = InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delta, -1);
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, 9);
    }

    #[tokio::test]
    async fn test_restock_returns_to_source_warehouse() {
        let store = Arc::new(MemoryMarketStore::new());
        let ledger = InventoryLedger::new(store.clone());
        let (item, wh) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.receive_stock(item, wh, 10, None, None, None).await.unwrap();

        let order_id = Uuid::new_v4();
        let canceled = line(order_id, ItemKind::Material, item, 4);
        let lines = vec![canceled.clone()];

        let mut tx = store.begin().await.unwrap();
        InventoryLedger::deduct_for_order_in(tx.as_mut(), order_id, &lines, None)
            .await
            .unwrap();
        let first = InventoryLedger::restock_line_in(tx.as_mut(), &canceled, None)
            .await
            .unwrap()
            .unwrap();
        let second = InventoryLedger::restock_line_in(tx.as_mut(), &canceled, None)
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, InventoryTransactionKind::Return);
        assert_eq!(ledger.on_hand(item, wh).await.unwrap().quantity, 10);
    }
}
