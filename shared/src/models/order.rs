//! Order Model
//!
//! An order travels as one immutable unit: the root record, exactly one
//! delivery, exactly one payment and an ordered list of items. All money
//! fields are integer minor units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery address of an order (1:1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment of an order (1:1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub currency: String,
    pub provider: String,
    /// delivery_cost + goods_total + custom_fee
    pub amount: i64,
    /// Unix seconds
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    /// Sum of item total prices
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// Order line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// Discount percentage, 0..=100
    pub sale: i32,
    pub size: String,
    /// Fixed at creation, never re-derived
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Item {
    /// Discounted price with integer division, `None` on overflow
    pub fn total_for(price: i64, sale: i32) -> Option<i64> {
        price.checked_mul(100 - i64::from(sale)).map(|v| v / 100)
    }
}

/// Order entity
///
/// `order_uid` keys the store and the cache but is not part of the public
/// JSON representation. Deserialization still accepts it so the channel wire
/// format can carry it alongside the flattened body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip_serializing, default)]
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    #[serde(default)]
    pub internal_signature: Option<String>,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// Violated order invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderInvariantError {
    #[error("order_uid is empty")]
    MissingUid,

    #[error("item {index}: total_price {actual} != expected {expected}")]
    ItemTotal {
        index: usize,
        expected: i64,
        actual: i64,
    },

    #[error("item {index}: sale {sale} outside 0..=100")]
    SaleOutOfRange { index: usize, sale: i32 },

    #[error("payment goods_total {actual} != sum of item totals {expected}")]
    GoodsTotal { expected: i64, actual: i64 },

    #[error("payment amount {actual} != expected {expected}")]
    Amount { expected: i64, actual: i64 },

    #[error("{field} overflows")]
    Overflow { field: &'static str },
}

impl Order {
    /// Sum of `total_price` over all items, `None` on overflow
    pub fn items_total(&self) -> Option<i64> {
        self.items
            .iter()
            .try_fold(0i64, |acc, i| acc.checked_add(i.total_price))
    }

    /// Check identifier presence and the item/payment arithmetic
    pub fn validate(&self) -> Result<(), OrderInvariantError> {
        if self.order_uid.is_empty() {
            return Err(OrderInvariantError::MissingUid);
        }

        for (index, item) in self.items.iter().enumerate() {
            if !(0..=100).contains(&item.sale) {
                return Err(OrderInvariantError::SaleOutOfRange {
                    index,
                    sale: item.sale,
                });
            }
            let expected = Item::total_for(item.price, item.sale)
                .ok_or(OrderInvariantError::Overflow { field: "item total_price" })?;
            if item.total_price != expected {
                return Err(OrderInvariantError::ItemTotal {
                    index,
                    expected,
                    actual: item.total_price,
                });
            }
        }

        let goods = self
            .items_total()
            .ok_or(OrderInvariantError::Overflow { field: "goods_total" })?;
        if self.payment.goods_total != goods {
            return Err(OrderInvariantError::GoodsTotal {
                expected: goods,
                actual: self.payment.goods_total,
            });
        }

        let amount = self
            .payment
            .delivery_cost
            .checked_add(self.payment.goods_total)
            .and_then(|v| v.checked_add(self.payment.custom_fee))
            .ok_or(OrderInvariantError::Overflow { field: "payment amount" })?;
        if self.payment.amount != amount {
            return Err(OrderInvariantError::Amount {
                expected: amount,
                actual: self.payment.amount,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(price: i64, sale: i32) -> Item {
        Item {
            chrt_id: 9934930,
            track_number: "WBILMTESTTRACK".to_string(),
            price,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale,
            size: "0".to_string(),
            total_price: Item::total_for(price, sale).unwrap(),
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }
    }

    fn sample() -> Order {
        let items = vec![item(453, 30), item(1000, 0)];
        let goods_total = items.iter().map(|i| i.total_price).sum();
        Order {
            order_uid: "b563feb7b2b84b6test".to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: "b563feb7b2b84b6test".to_string(),
                request_id: None,
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1500 + goods_total + 0,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total,
                custom_fee: 0,
            },
            items,
            locale: "en".to_string(),
            internal_signature: None,
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
            oof_shard: "1".to_string(),
        }
    }

    #[test]
    fn test_item_total_uses_integer_division() {
        assert_eq!(Item::total_for(453, 30), Some(317));
        assert_eq!(Item::total_for(100, 0), Some(100));
        assert_eq!(Item::total_for(999, 90), Some(99));
        assert_eq!(Item::total_for(10000, 100), Some(0));
        assert_eq!(Item::total_for(i64::MAX / 10, 0), None);
    }

    #[test]
    fn test_huge_price_rejected_as_overflow() {
        let mut order = sample();
        order.items[0].price = i64::MAX / 10;
        assert!(matches!(
            order.validate(),
            Err(OrderInvariantError::Overflow { .. })
        ));
    }

    #[test]
    fn test_goods_sum_overflow_rejected() {
        let mut order = sample();
        order.items = vec![item(i64::MAX / 100, 0); 101];
        assert!(order.items_total().is_none());
        assert_eq!(
            order.validate(),
            Err(OrderInvariantError::Overflow { field: "goods_total" })
        );
    }

    #[test]
    fn test_amount_overflow_rejected() {
        let mut order = sample();
        order.payment.delivery_cost = i64::MAX;
        assert_eq!(
            order.validate(),
            Err(OrderInvariantError::Overflow { field: "payment amount" })
        );
    }

    #[test]
    fn test_valid_order_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn test_missing_uid_rejected() {
        let mut order = sample();
        order.order_uid.clear();
        assert_eq!(order.validate(), Err(OrderInvariantError::MissingUid));
    }

    #[test]
    fn test_tampered_item_total_rejected() {
        let mut order = sample();
        order.items[1].total_price += 1;
        assert!(matches!(
            order.validate(),
            Err(OrderInvariantError::ItemTotal { index: 1, .. })
        ));
    }

    #[test]
    fn test_amount_mismatch_rejected() {
        let mut order = sample();
        order.payment.amount -= 1;
        assert!(matches!(
            order.validate(),
            Err(OrderInvariantError::Amount { .. })
        ));
    }

    #[test]
    fn test_goods_total_mismatch_rejected() {
        let mut order = sample();
        order.payment.goods_total += 10;
        order.payment.amount += 10;
        assert!(matches!(
            order.validate(),
            Err(OrderInvariantError::GoodsTotal { .. })
        ));
    }

    #[test]
    fn test_public_json_omits_uid() {
        let order = sample();
        let value = serde_json::to_value(&order).unwrap();
        assert!(value.get("order_uid").is_none());
        assert_eq!(value["track_number"], "WBILMTESTTRACK");
        assert_eq!(value["payment"]["amount"], order.payment.amount);
        assert_eq!(value["items"].as_array().unwrap().len(), 2);

        let back: Order = serde_json::from_value(value).unwrap();
        assert!(back.order_uid.is_empty());
        assert_eq!(back.items, order.items);
    }

    #[test]
    fn test_deserialize_accepts_uid() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["order_uid"] = serde_json::json!("abc");
        let order: Order = serde_json::from_value(value).unwrap();
        assert_eq!(order.order_uid, "abc");
    }
}
