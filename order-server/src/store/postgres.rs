//! Postgres order store
//!
//! `persist_order` writes the four parts inside one transaction, so a failed
//! batch never leaves a half-written order behind. The individual upserts
//! run on a pooled connection each.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use shared::models::{Delivery, Item, Order, Payment};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

use super::rows::{DeliveryRow, ItemRow, OrderRow, PaymentRow};
use super::{OrderStore, StoreError};

const ORDER_COLUMNS: &str = "order_uid, track_number, entry, locale, internal_signature, \
     customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard";
const DELIVERY_COLUMNS: &str = "order_uid, name, phone, zip, city, address, region, email";
const PAYMENT_COLUMNS: &str = "order_uid, transaction, request_id, currency, provider, amount, \
     payment_dt, bank, delivery_cost, goods_total, custom_fee";
const ITEM_COLUMNS: &str = "order_uid, item_index, chrt_id, track_number, price, rid, name, \
     sale, size, total_price, nm_id, brand, status";

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and apply the embedded migrations
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(max_connections, "Postgres pool ready, migrations applied");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ========== Writers (shared by pooled calls and the persist transaction) ==========

fn missing_parent(err: sqlx::Error, order_uid: &str) -> StoreError {
    let is_fk = err
        .as_database_error()
        .is_some_and(|e| e.is_foreign_key_violation());
    if is_fk {
        StoreError::MissingParent(order_uid.to_string())
    } else {
        err.into()
    }
}

async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_uid) DO UPDATE SET
            track_number = EXCLUDED.track_number,
            entry = EXCLUDED.entry,
            locale = EXCLUDED.locale,
            internal_signature = EXCLUDED.internal_signature,
            customer_id = EXCLUDED.customer_id,
            delivery_service = EXCLUDED.delivery_service,
            shardkey = EXCLUDED.shardkey,
            sm_id = EXCLUDED.sm_id,
            date_created = EXCLUDED.date_created,
            oof_shard = EXCLUDED.oof_shard
        "#,
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shardkey)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_delivery(
    conn: &mut PgConnection,
    order_uid: &str,
    d: &Delivery,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO deliveries (order_uid, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (order_uid) DO UPDATE SET
            name = EXCLUDED.name, phone = EXCLUDED.phone, zip = EXCLUDED.zip,
            city = EXCLUDED.city, address = EXCLUDED.address,
            region = EXCLUDED.region, email = EXCLUDED.email
        "#,
    )
    .bind(order_uid)
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .execute(&mut *conn)
    .await
    .map_err(|e| missing_parent(e, order_uid))?;
    Ok(())
}

async fn write_payment(
    conn: &mut PgConnection,
    order_uid: &str,
    p: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            order_uid, transaction, request_id, currency, provider, amount,
            payment_dt, bank, delivery_cost, goods_total, custom_fee
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_uid) DO UPDATE SET
            transaction = EXCLUDED.transaction, request_id = EXCLUDED.request_id,
            currency = EXCLUDED.currency, provider = EXCLUDED.provider,
            amount = EXCLUDED.amount, payment_dt = EXCLUDED.payment_dt,
            bank = EXCLUDED.bank, delivery_cost = EXCLUDED.delivery_cost,
            goods_total = EXCLUDED.goods_total, custom_fee = EXCLUDED.custom_fee
        "#,
    )
    .bind(order_uid)
    .bind(&p.transaction)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .execute(&mut *conn)
    .await
    .map_err(|e| missing_parent(e, order_uid))?;
    Ok(())
}

async fn write_items(
    conn: &mut PgConnection,
    order_uid: &str,
    items: &[Item],
) -> Result<(), StoreError> {
    for (index, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO items (
                order_uid, item_index, chrt_id, track_number, price, rid, name,
                sale, size, total_price, nm_id, brand, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (order_uid, item_index) DO UPDATE SET
                chrt_id = EXCLUDED.chrt_id, track_number = EXCLUDED.track_number,
                price = EXCLUDED.price, rid = EXCLUDED.rid, name = EXCLUDED.name,
                sale = EXCLUDED.sale, size = EXCLUDED.size,
                total_price = EXCLUDED.total_price, nm_id = EXCLUDED.nm_id,
                brand = EXCLUDED.brand, status = EXCLUDED.status
            "#,
        )
        .bind(order_uid)
        .bind(index as i32)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut *conn)
        .await
        .map_err(|e| missing_parent(e, order_uid))?;
    }

    sqlx::query("DELETE FROM items WHERE order_uid = $1 AND item_index >= $2")
        .bind(order_uid)
        .bind(items.len() as i32)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn upsert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_order(&mut conn, order).await
    }

    async fn upsert_delivery(
        &self,
        order_uid: &str,
        delivery: &Delivery,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_delivery(&mut conn, order_uid, delivery).await
    }

    async fn upsert_payment(&self, order_uid: &str, payment: &Payment) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_payment(&mut conn, order_uid, payment).await
    }

    async fn upsert_items(&self, order_uid: &str, items: &[Item]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_items(&mut tx, order_uid, items).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn persist_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_order(&mut tx, order).await?;
        write_delivery(&mut tx, &order.order_uid, &order.delivery).await?;
        write_payment(&mut tx, &order.order_uid, &order.payment).await?;
        write_items(&mut tx, &order.order_uid, &order.items).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_order_by_id(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let order: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_uid = $1"))
                .bind(order_uid)
                .fetch_optional(&self.pool)
                .await?;
        let Some(order) = order else {
            return Ok(None);
        };

        let delivery: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await?;
        let payment: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&self.pool)
        .await?;
        let items: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE order_uid = $1 ORDER BY item_index"
        ))
        .bind(order_uid)
        .fetch_all(&self.pool)
        .await?;

        let delivery = delivery.ok_or_else(|| StoreError::Incomplete {
            order_uid: order_uid.to_string(),
            part: "delivery",
        })?;
        let payment = payment.ok_or_else(|| StoreError::Incomplete {
            order_uid: order_uid.to_string(),
            part: "payment",
        })?;

        Ok(Some(order.into_order(
            delivery.into(),
            payment.into(),
            items.into_iter().map(Item::from).collect(),
        )))
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let orders: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY date_created, order_uid"
        ))
        .fetch_all(&self.pool)
        .await?;
        let deliveries: Vec<DeliveryRow> =
            sqlx::query_as(&format!("SELECT {DELIVERY_COLUMNS} FROM deliveries"))
                .fetch_all(&self.pool)
                .await?;
        let payments: Vec<PaymentRow> =
            sqlx::query_as(&format!("SELECT {PAYMENT_COLUMNS} FROM payments"))
                .fetch_all(&self.pool)
                .await?;
        let item_rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY order_uid, item_index"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries: HashMap<String, DeliveryRow> = deliveries
            .into_iter()
            .map(|d| (d.order_uid.clone(), d))
            .collect();
        let mut payments: HashMap<String, PaymentRow> = payments
            .into_iter()
            .map(|p| (p.order_uid.clone(), p))
            .collect();
        let mut items: HashMap<String, Vec<ItemRow>> = HashMap::new();
        for row in item_rows {
            items.entry(row.order_uid.clone()).or_default().push(row);
        }

        let mut result = Vec::with_capacity(orders.len());
        for order in orders {
            let uid = order.order_uid.clone();
            let (Some(delivery), Some(payment)) = (deliveries.remove(&uid), payments.remove(&uid))
            else {
                tracing::warn!(order_uid = %uid, "Skipping incomplete order");
                continue;
            };
            let mut rows = items.remove(&uid).unwrap_or_default();
            rows.sort_by_key(|r| r.item_index);
            result.push(order.into_order(
                delivery.into(),
                payment.into(),
                rows.into_iter().map(Item::from).collect(),
            ));
        }
        Ok(result)
    }

    async fn get_latest_orders(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT order_uid FROM orders ORDER BY date_created DESC, order_uid DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(uid,)| uid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::generator::OrderGenerator;

    async fn store() -> PgOrderStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgOrderStore::connect(&url, 2, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires Postgres (DATABASE_URL)"]
    async fn test_persist_is_idempotent() {
        let store = store().await;
        let mut order = OrderGenerator::new().order_with_items(3);
        store.persist_order(&order).await.unwrap();

        order.items.truncate(2);
        order.payment.goods_total = order.items_total().unwrap();
        order.payment.amount =
            order.payment.delivery_cost + order.payment.goods_total + order.payment.custom_fee;
        store.persist_order(&order).await.unwrap();

        let loaded = store.get_order_by_id(&order.order_uid).await.unwrap();
        assert_eq!(loaded, Some(order));
    }

    #[tokio::test]
    #[ignore = "requires Postgres (DATABASE_URL)"]
    async fn test_delivery_without_order_is_rejected() {
        let store = store().await;
        let order = OrderGenerator::new().order();
        let err = store
            .upsert_delivery(&order.order_uid, &order.delivery)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent(_)));
    }

    #[tokio::test]
    #[ignore = "requires Postgres (DATABASE_URL)"]
    async fn test_latest_orders_include_new_order() {
        let store = store().await;
        let mut order = OrderGenerator::new().order();
        order.date_created += chrono::Duration::days(365);
        store.persist_order(&order).await.unwrap();

        let latest = store.get_latest_orders(1).await.unwrap();
        assert_eq!(latest, vec![order.order_uid.clone()]);
    }
}
