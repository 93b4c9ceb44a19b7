use crate::error::SchemaError;
use crate::models::Transaction;
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Splits transaction history at a cutoff. The feature window is everything
/// at or before the cutoff; the label window is the half-open interval
/// (cutoff, cutoff + horizon].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LabelWindow {
    pub cutoff: DateTime<Utc>,
    pub horizon_days: i64,
}

impl LabelWindow {
    pub fn new(cutoff: DateTime<Utc>, horizon_days: i64) -> Self {
        Self {
            cutoff,
            horizon_days,
        }
    }

    pub fn label_window_end(&self) -> DateTime<Utc> {
        self.cutoff + Duration::days(self.horizon_days)
    }

    pub fn in_feature_window(&self, ts: DateTime<Utc>) -> bool {
        ts <= self.cutoff
    }

    pub fn in_label_window(&self, ts: DateTime<Utc>) -> bool {
        ts > self.cutoff && ts <= self.label_window_end()
    }
}

/// Per-customer windowing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerWindowLabel {
    pub customer_id: u32,
    /// True when the customer has at least one feature-window transaction.
    pub eligible: bool,
    pub label: u8,
}

/// Picks the latest cutoff that still leaves a full label window inside the
/// observed history, and at least some history before it.
pub fn choose_cutoff(
    transactions: &[Transaction],
    horizon_days: i64,
) -> Result<DateTime<Utc>, SchemaError> {
    let min_ts = transactions.iter().map(|t| t.timestamp).min();
    let max_ts = transactions.iter().map(|t| t.timestamp).max();
    let (min_ts, max_ts) = match (min_ts, max_ts) {
        (Some(min_ts), Some(max_ts)) => (min_ts, max_ts),
        _ => return Err(SchemaError::EmptyTable),
    };

    let cutoff = max_ts - Duration::days(horizon_days);
    if cutoff < min_ts {
        return Err(SchemaError::InfeasibleWindow {
            available_days: (max_ts - min_ts).num_days(),
            horizon_days,
        });
    }
    Ok(cutoff)
}

/// Builds per-customer eligibility flags and purchase labels.
///
/// Label 1 means at least one positive-quantity transaction inside the label
/// window. A transaction dated exactly at the cutoff counts toward the
/// feature window, never the label window.
pub fn build_labels(transactions: &[Transaction], window: LabelWindow) -> Vec<CustomerWindowLabel> {
    let mut by_customer: BTreeMap<u32, (bool, u8)> = BTreeMap::new();
    for tx in transactions {
        let entry = by_customer.entry(tx.customer_id).or_insert((false, 0));
        if window.in_feature_window(tx.timestamp) {
            entry.0 = true;
        }
        if window.in_label_window(tx.timestamp) && tx.quantity > 0 {
            entry.1 = 1;
        }
    }

    let labels: Vec<CustomerWindowLabel> = by_customer
        .into_iter()
        .map(|(customer_id, (eligible, label))| CustomerWindowLabel {
            customer_id,
            eligible,
            label,
        })
        .collect();

    let eligible = labels.iter().filter(|l| l.eligible).count();
    let positives = labels
        .iter()
        .filter(|l| l.eligible && l.label == 1)
        .count();
    info!(
        "Built labels for {} customers ({} eligible, {} positive) at cutoff {}",
        labels.len(),
        eligible,
        positives,
        window.cutoff
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(customer: u32, day: u32, quantity: i64) -> Transaction {
        Transaction {
            invoice_id: format!("c{customer}-d{day}"),
            product_code: "P".to_string(),
            description: "item".to_string(),
            quantity,
            unit_price: 2.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day as i64),
            customer_id: customer,
            country: "France".to_string(),
        }
    }

    #[test]
    fn cutoff_is_horizon_before_latest_transaction() {
        let txs = vec![tx(1, 0, 1), tx(1, 130, 1)];
        let cutoff = choose_cutoff(&txs, 30).unwrap();
        assert_eq!(cutoff, tx(1, 100, 1).timestamp);
    }

    #[test]
    fn short_history_is_infeasible() {
        let txs = vec![tx(1, 0, 1), tx(1, 10, 1)];
        assert!(matches!(
            choose_cutoff(&txs, 30),
            Err(SchemaError::InfeasibleWindow { .. })
        ));
    }

    #[test]
    fn transaction_exactly_at_cutoff_feeds_features_not_labels() {
        let cutoff = tx(1, 100, 1).timestamp;
        let window = LabelWindow::new(cutoff, 30);
        assert!(window.in_feature_window(cutoff));
        assert!(!window.in_label_window(cutoff));

        let labels = build_labels(&[tx(1, 100, 1)], window);
        assert_eq!(labels.len(), 1);
        assert!(labels[0].eligible);
        assert_eq!(labels[0].label, 0);
    }

    #[test]
    fn label_window_is_half_open_on_the_right() {
        let cutoff = tx(1, 100, 1).timestamp;
        let window = LabelWindow::new(cutoff, 30);
        // Day 130 is the last day inside the window, day 131 is outside.
        assert!(window.in_label_window(tx(1, 130, 1).timestamp));
        assert!(!window.in_label_window(tx(1, 131, 1).timestamp));
    }

    #[test]
    fn returns_inside_label_window_do_not_set_the_label() {
        let cutoff = tx(1, 100, 1).timestamp;
        let window = LabelWindow::new(cutoff, 30);
        let labels = build_labels(&[tx(1, 50, 3), tx(1, 110, -2)], window);
        assert_eq!(labels[0].label, 0);
    }

    #[test]
    fn customer_without_feature_history_is_ineligible() {
        let cutoff = tx(1, 100, 1).timestamp;
        let window = LabelWindow::new(cutoff, 30);
        let labels = build_labels(&[tx(7, 105, 1)], window);
        assert_eq!(labels.len(), 1);
        assert!(!labels[0].eligible);
        assert_eq!(labels[0].label, 1);
    }
}
