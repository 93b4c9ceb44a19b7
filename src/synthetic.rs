use crate::models::RawTransaction;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const COUNTRIES: [&str; 5] = ["United Kingdom", "Germany", "France", "EIRE", "Netherlands"];
const PRODUCTS: usize = 60;

/// Shape of a generated transaction history.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub customers: usize,
    pub history_days: i64,
    pub start: DateTime<Utc>,
}

impl SyntheticConfig {
    pub fn new(customers: usize, history_days: i64, start: DateTime<Utc>) -> Self {
        Self {
            customers,
            history_days,
            start,
        }
    }
}

/// Generates a seeded transaction table with a monotonic purchase signal:
/// each customer draws a buying intensity, and higher intensity means both a
/// denser history and a higher chance of purchasing near the end of it. A
/// model trained on the early window should therefore rank late purchasers
/// above the rest.
pub fn generate(config: SyntheticConfig, seed: u64) -> Vec<RawTransaction> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();

    for customer_idx in 0..config.customers {
        let customer_id = 1000 + customer_idx as u32;
        let intensity: f64 = rng.gen_range(0.05..0.9);
        let country = COUNTRIES[rng.gen_range(0..COUNTRIES.len())];
        let mut invoice_seq = 0usize;

        let mut day = 0i64;
        while day < config.history_days {
            if rng.gen_bool(intensity * 0.35) {
                invoice_seq += 1;
                let invoice_id = format!("INV{customer_id}-{invoice_seq:04}");
                let lines = rng.gen_range(1..5);
                for _ in 0..lines {
                    let product = rng.gen_range(0..PRODUCTS);
                    let is_return = rng.gen_bool(0.04);
                    let quantity = if is_return {
                        -(rng.gen_range(1..4) as i64)
                    } else {
                        rng.gen_range(1..12) as i64
                    };
                    rows.push(RawTransaction {
                        invoice_id: invoice_id.clone(),
                        product_code: format!("PROD{product:04}"),
                        description: format!("Product {product}"),
                        quantity,
                        unit_price: (rng.gen_range(1.0..40.0_f64) * 100.0).round() / 100.0,
                        timestamp: config.start + Duration::days(day)
                            + Duration::hours(rng.gen_range(8..20)),
                        customer_id: Some(customer_id),
                        country: country.to_string(),
                    });
                }
            }
            day += 1;
        }

        // A few anonymous rows, as real exports carry them.
        if rng.gen_bool(0.1) {
            rows.push(RawTransaction {
                invoice_id: format!("INVANON-{customer_idx:04}"),
                product_code: "PROD9999".to_string(),
                description: "Unattributed sale".to_string(),
                quantity: 1,
                unit_price: 5.0,
                timestamp: config.start + Duration::days(rng.gen_range(0..config.history_days)),
                customer_id: None,
                country: country.to_string(),
            });
        }
    }

    rows.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.invoice_id.cmp(&b.invoice_id))
    });
    rows
}
