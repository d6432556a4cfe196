//! Fake order generation for the `send-order` producer.
//!
//! Values are plausible rather than realistic: fixed vocabularies for names,
//! places and brands, uniform numbers in the ranges the storefront uses.

use chrono::Utc;
use orderhub_core::{Delivery, Item, OrderAggregate, Payment};
use rand::seq::IndexedRandom;
use rand::Rng;
use uuid::Uuid;

const TRACK_PREFIX: &str = "WBILMTESTTRACK";

const ENTRIES: &[&str] = &["WBIL", "MEEST", "DHL"];
const DELIVERY_SERVICES: &[&str] = &["meest", "dhl", "wbil"];
const PROVIDERS: &[&str] = &["wbpay", "applepay", "googlepay", "yandexpay", "sberpay"];
const BANKS: &[&str] = &["alpha", "tinkoff", "sberbank", "yo.money", "vtb", "raiffeisenbank", ""];
const SIZES: &[&str] = &["0", "1", "2", "3", "4", "5", "S", "M", "L", "XL", "XXL", "XXXL"];
const CURRENCIES: &[&str] = &["USD", "EUR", "RUB", "GBP", "KZT"];
const LOCALES: &[&str] = &["en", "ru", "de", "fr", "kk"];
const STATUSES: &[i64] = &[200, 201, 202, 204, 301, 400, 404, 500];

const FIRST_NAMES: &[&str] = &["Anna", "Boris", "Clara", "Dmitri", "Elena", "Felix", "Galina"];
const LAST_NAMES: &[&str] = &["Ivanova", "Petrov", "Smirnova", "Volkov", "Kuznetsova", "Orlov"];
const CITIES: &[(&str, &str)] = &[
    ("Kiryat Mozkin", "Kraiot"),
    ("Kazan", "Tatarstan"),
    ("Almaty", "Almaty Region"),
    ("Tver", "Tver Oblast"),
    ("Haifa", "Haifa District"),
];
const STREETS: &[&str] = &["Ploshad Mira", "Lenina", "Sadovaya", "Tsentralnaya", "Naberezhnaya"];
const PRODUCTS: &[&str] = &["Mascaras", "Sneakers", "Backpack", "Desk Lamp", "Headphones"];
const BRANDS: &[&str] = &["Vivienne Sabo", "Northwind", "Acme", "Globex", "Initech"];

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, values: &[&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}

fn letters<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    (0..n)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

fn digits<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    (0..n)
        .map(|_| char::from(rng.random_range(b'0'..=b'9')))
        .collect()
}

fn fake_item<R: Rng + ?Sized>(rng: &mut R, track_number: &str) -> Item {
    Item {
        chrt_id: rng.random_range(1..=10_000_000),
        track_number: track_number.to_string(),
        price: rng.random_range(1..=999_999),
        rid: Uuid::now_v7().simple().to_string(),
        name: pick(rng, PRODUCTS).to_string(),
        sale: rng.random_range(0..=100),
        size: pick(rng, SIZES).to_string(),
        total_price: rng.random_range(1..=10_000_000),
        nm_id: rng.random_range(1..=10_000_000),
        brand: pick(rng, BRANDS).to_string(),
        status: STATUSES.choose(rng).copied().unwrap_or(200),
    }
}

/// Generate a random aggregate with a fresh `order_uid` and 1 to 4 items.
pub fn fake_order<R: Rng + ?Sized>(rng: &mut R) -> OrderAggregate {
    let order_uid = Uuid::now_v7().simple().to_string();
    let track_number = format!("{}{}", TRACK_PREFIX, letters(rng, 10));
    let (city, region) = CITIES.choose(rng).copied().unwrap_or(("Kazan", "Tatarstan"));
    let first = pick(rng, FIRST_NAMES);
    let last = pick(rng, LAST_NAMES);

    let n_items = rng.random_range(1..=4);
    let items = (0..n_items).map(|_| fake_item(rng, &track_number)).collect();

    OrderAggregate {
        order_uid: order_uid.clone(),
        track_number,
        entry: pick(rng, ENTRIES).to_string(),
        delivery: Delivery {
            name: format!("{} {}", first, last),
            phone: format!("+7{}", digits(rng, 10)),
            zip: digits(rng, 6),
            city: city.to_string(),
            address: format!("{} {}", pick(rng, STREETS), rng.random_range(1..=200)),
            region: region.to_string(),
            email: format!("{}.{}@example.com", first, last).to_lowercase(),
        },
        payment: Payment {
            transaction: order_uid,
            request_id: Uuid::now_v7().simple().to_string(),
            currency: pick(rng, CURRENCIES).to_string(),
            provider: pick(rng, PROVIDERS).to_string(),
            amount: rng.random_range(1..=1000),
            payment_dt: Utc::now().timestamp(),
            bank: pick(rng, BANKS).to_string(),
            delivery_cost: rng.random_range(0..=5000),
            goods_total: rng.random_range(0..=10_000),
            custom_fee: rng.random_range(0..=1000),
        },
        items,
        locale: pick(rng, LOCALES).to_string(),
        internal_signature: letters(rng, 5),
        customer_id: Uuid::now_v7().simple().to_string(),
        delivery_service: pick(rng, DELIVERY_SERVICES).to_string(),
        shardkey: rng.random_range(1..=1_000_000).to_string(),
        sm_id: rng.random_range(1..=1_000_000),
        date_created: Utc::now(),
        oof_shard: rng.random_range(1..=1_000_000).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::decode_order;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fake_order_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let order = fake_order(&mut rng);
            assert!(!order.order_uid.is_empty());
            assert!(order.track_number.starts_with(TRACK_PREFIX));
            assert_eq!(order.track_number.len(), TRACK_PREFIX.len() + 10);
            assert!((1..=4).contains(&order.items.len()));
            assert!(ENTRIES.contains(&order.entry.as_str()));
            assert_eq!(order.payment.transaction, order.order_uid);
            for item in &order.items {
                assert_eq!(item.track_number, order.track_number);
                assert!(SIZES.contains(&item.size.as_str()));
            }
        }
    }

    #[test]
    fn test_fake_orders_have_distinct_keys() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = fake_order(&mut rng);
        let b = fake_order(&mut rng);
        assert_ne!(a.order_uid, b.order_uid);
    }

    #[test]
    fn test_fake_order_survives_the_wire() {
        let mut rng = StdRng::seed_from_u64(42);
        let order = fake_order(&mut rng);
        let payload = serde_json::to_vec(&order).unwrap();
        assert_eq!(decode_order(&payload).unwrap(), order);
    }
}
