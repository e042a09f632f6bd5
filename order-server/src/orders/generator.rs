//! Synthetic order generator
//!
//! Produces complete orders whose item and payment arithmetic always holds.

use chrono::{SubsecRound, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use shared::models::{Delivery, Item, Order, Payment};
use uuid::Uuid;

const TRACK_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRACK_LEN: usize = 14;

const ENTRIES: &[&str] = &["WBIL", "WBIL_1", "WBIL_2", "WBIL_3"];
const LOCALES: &[&str] = &["ru", "en", "cz", "es", "uk", "dk"];
const DELIVERY_SERVICES: &[&str] = &["SDEK", "Pochta Rossii"];
const SHARDKEYS: &[&str] = &["4", "5", "6", "7", "8", "9"];
const OOF_SHARDS: &[&str] = &["1", "2", "3", "4", "5", "6", "7"];
const REQUEST_IDS: &[&str] = &["", "1", "2", "3", "4", "5", "6", "7"];
const PROVIDERS: &[&str] = &["wbpay", "tpay", "sberpay", "applepay"];
const BANKS: &[&str] = &["TBank", "Alpha", "Sber", "Ozon"];
const CURRENCIES: &[&str] = &["RUB", "USD", "EUR", "KZT", "BYN"];
const SIZES: &[&str] = &["S", "M", "L", "XL"];

const FIRST_NAMES: &[&str] = &["Anna", "Ivan", "Olga", "Pavel", "Maria", "Dmitry", "Elena"];
const LAST_NAMES: &[&str] = &["Petrova", "Smirnov", "Ivanova", "Kuznetsov", "Popova"];
const CITIES: &[(&str, &str)] = &[
    ("Moscow", "Moscow"),
    ("Kazan", "Tatarstan"),
    ("Novosibirsk", "Novosibirsk Oblast"),
    ("Yekaterinburg", "Sverdlovsk Oblast"),
    ("Samara", "Samara Oblast"),
];
const STREETS: &[&str] = &["Lenina", "Gagarina", "Mira", "Pushkina", "Sadovaya"];
const PRODUCTS: &[&str] = &["Mascara", "Backpack", "Sneakers", "Headphones", "Thermos", "Scarf"];
const BRANDS: &[&str] = &["Vivienne Sabo", "Nordwind", "Polar Lines", "Sibirica", "Volna"];

fn pick<R: Rng>(rng: &mut R, values: &[&'static str]) -> &'static str {
    values.choose(rng).copied().unwrap_or_default()
}

fn track_code<R: Rng>(rng: &mut R) -> String {
    (0..TRACK_LEN)
        .map(|_| TRACK_CHARSET[rng.gen_range(0..TRACK_CHARSET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderGenerator;

impl OrderGenerator {
    pub fn new() -> Self {
        Self
    }

    /// A batch of `count` independent orders
    pub fn batch(&self, count: usize) -> Vec<Order> {
        (0..count).map(|_| self.order()).collect()
    }

    /// An order with 1 to 5 items
    pub fn order(&self) -> Order {
        let count = rand::thread_rng().gen_range(1..=5);
        self.order_with_items(count)
    }

    pub fn order_with_items(&self, item_count: usize) -> Order {
        let mut rng = rand::thread_rng();
        let order_uid = Uuid::new_v4().to_string();
        let track_number = track_code(&mut rng);

        let items: Vec<Item> = (0..item_count)
            .map(|_| {
                let price: i64 = rng.gen_range(100..=10_000);
                let sale = rng.gen_range(0..=90);
                // bounded price and sale cannot overflow
                let total_price = Item::total_for(price, sale).unwrap_or_default();
                Item {
                    chrt_id: rng.gen_range(1_000_000..=9_999_999),
                    track_number: track_number.clone(),
                    price,
                    rid: Uuid::new_v4().to_string(),
                    name: pick(&mut rng, PRODUCTS).to_string(),
                    sale,
                    size: pick(&mut rng, SIZES).to_string(),
                    total_price,
                    nm_id: rng.gen_range(1_000_000..=9_999_999),
                    brand: pick(&mut rng, BRANDS).to_string(),
                    status: rng.gen_range(100..=500),
                }
            })
            .collect();

        let goods_total: i64 = items.iter().map(|i| i.total_price).sum();
        let delivery_cost = rng.gen_range(0..=1_500);
        let custom_fee = rng.gen_range(0..=100);
        let request_id = pick(&mut rng, REQUEST_IDS);

        let first = pick(&mut rng, FIRST_NAMES);
        let last = pick(&mut rng, LAST_NAMES);
        let (city, region) = CITIES
            .choose(&mut rng)
            .copied()
            .unwrap_or(("Moscow", "Moscow"));

        Order {
            order_uid,
            track_number,
            entry: pick(&mut rng, ENTRIES).to_string(),
            delivery: Delivery {
                name: format!("{first} {last}"),
                phone: format!("+7{:010}", rng.gen_range(0..10_000_000_000u64)),
                zip: format!("{:06}", rng.gen_range(100_000..=999_999)),
                city: city.to_string(),
                address: format!(
                    "{} {}",
                    pick(&mut rng, STREETS),
                    rng.gen_range(1..=120)
                ),
                region: region.to_string(),
                email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
            },
            payment: Payment {
                transaction: track_code(&mut rng),
                request_id: (!request_id.is_empty()).then(|| request_id.to_string()),
                currency: pick(&mut rng, CURRENCIES).to_string(),
                provider: pick(&mut rng, PROVIDERS).to_string(),
                amount: delivery_cost + goods_total + custom_fee,
                payment_dt: rng.gen_range(1_000_000_000..=9_999_999_999),
                bank: pick(&mut rng, BANKS).to_string(),
                delivery_cost,
                goods_total,
                custom_fee,
            },
            items,
            locale: pick(&mut rng, LOCALES).to_string(),
            internal_signature: Some(Uuid::new_v4().to_string()),
            customer_id: Uuid::new_v4().to_string(),
            delivery_service: pick(&mut rng, DELIVERY_SERVICES).to_string(),
            shardkey: pick(&mut rng, SHARDKEYS).to_string(),
            sm_id: rng.gen_range(10..=199),
            // Postgres keeps microseconds; whole milliseconds survive every store
            date_created: Utc::now().trunc_subsecs(3),
            oof_shard: pick(&mut rng, OOF_SHARDS).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_orders_satisfy_invariants() {
        let generator = OrderGenerator::new();
        for order in generator.batch(200) {
            order.validate().unwrap();
            assert!((1..=5).contains(&order.items.len()));
            assert!((0..=1_500).contains(&order.payment.delivery_cost));
            assert!((0..=100).contains(&order.payment.custom_fee));
            for item in &order.items {
                assert!((100..=10_000).contains(&item.price));
                assert!((0..=90).contains(&item.sale));
                assert_eq!(item.track_number, order.track_number);
            }
        }
    }

    #[test]
    fn test_track_number_format() {
        let order = OrderGenerator::new().order();
        assert_eq!(order.track_number.len(), TRACK_LEN);
        assert!(
            order
                .track_number
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_identifiers_are_unique() {
        let batch = OrderGenerator::new().batch(50);
        let mut uids: Vec<&str> = batch.iter().map(|o| o.order_uid.as_str()).collect();
        uids.sort_unstable();
        uids.dedup();
        assert_eq!(uids.len(), 50);
    }

    #[test]
    fn test_fixed_item_count() {
        let order = OrderGenerator::new().order_with_items(4);
        assert_eq!(order.items.len(), 4);
        assert_eq!(Some(order.payment.goods_total), order.items_total());
    }
}
