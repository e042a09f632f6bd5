//! In-process order store with the same upsert and lookup semantics as the
//! Postgres store, including the parent-row check for sub-entities.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::models::{Delivery, Item, Order, Payment};

use super::rows::OrderRow;
use super::{OrderStore, StoreError};

#[derive(Default)]
struct Tables {
    orders: HashMap<String, OrderRow>,
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    items: HashMap<String, Vec<Item>>,
}

impl Tables {
    fn require_parent(&self, order_uid: &str) -> Result<(), StoreError> {
        if self.orders.contains_key(order_uid) {
            Ok(())
        } else {
            Err(StoreError::MissingParent(order_uid.to_string()))
        }
    }

    fn assemble(&self, row: &OrderRow) -> Result<Order, StoreError> {
        let uid = &row.order_uid;
        let delivery = self
            .deliveries
            .get(uid)
            .cloned()
            .ok_or_else(|| incomplete(uid, "delivery"))?;
        let payment = self
            .payments
            .get(uid)
            .cloned()
            .ok_or_else(|| incomplete(uid, "payment"))?;
        let items = self.items.get(uid).cloned().unwrap_or_default();
        Ok(row.clone().into_order(delivery, payment, items))
    }

    /// Order rows, newest first
    fn latest_rows(&self) -> Vec<&OrderRow> {
        let mut rows: Vec<&OrderRow> = self.orders.values().collect();
        rows.sort_by(|a, b| {
            b.date_created
                .cmp(&a.date_created)
                .then_with(|| b.order_uid.cmp(&a.order_uid))
        });
        rows
    }
}

fn incomplete(order_uid: &str, part: &'static str) -> StoreError {
    StoreError::Incomplete {
        order_uid: order_uid.to_string(),
        part,
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    tables: RwLock<Tables>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored item rows for `order_uid`
    pub fn item_count(&self, order_uid: &str) -> usize {
        self.tables
            .read()
            .items
            .get(order_uid)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn order_count(&self) -> usize {
        self.tables.read().orders.len()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn upsert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.tables
            .write()
            .orders
            .insert(order.order_uid.clone(), OrderRow::from_order(order));
        Ok(())
    }

    async fn upsert_delivery(
        &self,
        order_uid: &str,
        delivery: &Delivery,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.require_parent(order_uid)?;
        tables
            .deliveries
            .insert(order_uid.to_string(), delivery.clone());
        Ok(())
    }

    async fn upsert_payment(&self, order_uid: &str, payment: &Payment) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.require_parent(order_uid)?;
        tables.payments.insert(order_uid.to_string(), payment.clone());
        Ok(())
    }

    async fn upsert_items(&self, order_uid: &str, items: &[Item]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.require_parent(order_uid)?;
        tables.items.insert(order_uid.to_string(), items.to_vec());
        Ok(())
    }

    async fn get_order_by_id(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read();
        match tables.orders.get(order_uid) {
            Some(row) => tables.assemble(row).map(Some),
            None => Ok(None),
        }
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read();
        let mut rows = tables.latest_rows();
        rows.reverse();

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            match tables.assemble(row) {
                Ok(order) => orders.push(order),
                Err(e) => tracing::warn!(order_uid = %row.order_uid, error = %e, "Skipping incomplete order"),
            }
        }
        Ok(orders)
    }

    async fn get_latest_orders(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .latest_rows()
            .into_iter()
            .take(limit)
            .map(|row| row.order_uid.clone())
            .collect())
    }
}
