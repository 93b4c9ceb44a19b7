use crate::error::{FeatureError, SchemaError};
use crate::models::{Matrix, Transaction};
use chrono::{DateTime, Datelike, Duration, Utc};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

/// Numeric feature names in their fixed order. Trained artifacts bind to this
/// order followed by the vocabulary's one-hot columns; changing it invalidates
/// every saved artifact.
pub const NUMERIC_FEATURES: [&str; 23] = [
    "recency_days",
    "frequency",
    "monetary",
    "unique_products",
    "unique_descriptions",
    "avg_basket_size",
    "avg_basket_value",
    "spend_30d",
    "spend_90d",
    "spend_ratio_30d_90d",
    "spend_ratio_90d_180d",
    "freq_30d",
    "freq_90d",
    "total_returns",
    "return_rate",
    "return_amount",
    "net_amount",
    "avg_day_of_week",
    "std_day_of_week",
    "avg_month",
    "std_month",
    "weekend_ratio",
    "customer_lifetime_days",
];

const COUNTRY_PREFIX: &str = "country_";
const UNKNOWN_COUNTRY: &str = "unknown";

/// Country vocabulary frozen at training time. Countries unseen during
/// training map to the reserved unknown bucket at inference; the encoding
/// never grows after fit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountryVocabulary {
    countries: Vec<String>,
}

impl CountryVocabulary {
    /// Collects the distinct countries observed at or before the cutoff,
    /// sorted for a stable encoding.
    pub fn fit(transactions: &[Transaction], cutoff: DateTime<Utc>) -> Self {
        let countries: BTreeSet<String> = transactions
            .iter()
            .filter(|tx| tx.timestamp <= cutoff)
            .map(|tx| tx.country.clone())
            .collect();
        Self {
            countries: countries.into_iter().collect(),
        }
    }

    pub fn from_countries(mut countries: Vec<String>) -> Self {
        countries.sort();
        countries.dedup();
        Self { countries }
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// One-hot width: every known country plus the unknown bucket.
    pub fn encoded_width(&self) -> usize {
        self.countries.len() + 1
    }

    /// Index of a country in the encoding; unseen names land in the unknown
    /// bucket at the end.
    pub fn encode(&self, country: &str) -> usize {
        self.countries
            .binary_search_by(|c| c.as_str().cmp(country))
            .unwrap_or(self.countries.len())
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .countries
            .iter()
            .map(|c| format!("{COUNTRY_PREFIX}{}", sanitize(c)))
            .collect();
        names.push(format!("{COUNTRY_PREFIX}{UNKNOWN_COUNTRY}"));
        names
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// One customer's feature values, in the table's fixed column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerFeatures {
    pub customer_id: u32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    pub feature_names: Vec<String>,
    pub rows: Vec<CustomerFeatures>,
}

impl FeatureTable {
    pub fn to_matrix(&self) -> Matrix {
        let mut matrix = Matrix::with_cols(self.feature_names.len());
        for row in &self.rows {
            matrix.push_row(&row.values);
        }
        matrix
    }

    pub fn customer_ids(&self) -> Vec<u32> {
        self.rows.iter().map(|r| r.customer_id).collect()
    }
}

/// Batch feature computation result: the table plus the customers skipped for
/// lack of pre-cutoff history.
#[derive(Debug, Clone)]
pub struct FeatureBuildReport {
    pub table: FeatureTable,
    pub skipped: Vec<u32>,
}

/// Full feature name list for a vocabulary: numeric block then one-hots.
pub fn feature_names(vocabulary: &CountryVocabulary) -> Vec<String> {
    let mut names: Vec<String> = NUMERIC_FEATURES.iter().map(|n| n.to_string()).collect();
    names.extend(vocabulary.feature_names());
    names
}

/// Computes the per-customer feature table from transactions at or before the
/// cutoff. Pure function of its inputs: customers are processed in ascending
/// id order and nothing after the cutoff can influence any value.
///
/// Customers with zero pre-cutoff transactions are skipped and reported, not
/// fatal.
pub fn compute(
    transactions: &[Transaction],
    cutoff: DateTime<Utc>,
    vocabulary: &CountryVocabulary,
) -> Result<FeatureBuildReport, SchemaError> {
    if transactions.is_empty() {
        return Err(SchemaError::EmptyTable);
    }

    let mut by_customer: BTreeMap<u32, Vec<&Transaction>> = BTreeMap::new();
    for tx in transactions {
        by_customer.entry(tx.customer_id).or_default().push(tx);
    }
    let groups: Vec<(u32, Vec<&Transaction>)> = by_customer.into_iter().collect();

    let results: Vec<(u32, Option<Vec<f64>>)> = groups
        .par_iter()
        .map(|(customer_id, txs)| {
            match compute_customer(*customer_id, txs, cutoff, vocabulary) {
                Ok(values) => (*customer_id, Some(values)),
                Err(_) => (*customer_id, None),
            }
        })
        .collect();

    let mut rows = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (customer_id, values) in results {
        match values {
            Some(values) => rows.push(CustomerFeatures {
                customer_id,
                values,
            }),
            None => skipped.push(customer_id),
        }
    }

    if !skipped.is_empty() {
        warn!(
            "Skipped {} customer(s) with no history at or before {}",
            skipped.len(),
            cutoff
        );
    }
    info!(
        "Computed {} features for {} customers at cutoff {}",
        NUMERIC_FEATURES.len() + vocabulary.encoded_width(),
        rows.len(),
        cutoff
    );

    Ok(FeatureBuildReport {
        table: FeatureTable {
            feature_names: feature_names(vocabulary),
            rows,
        },
        skipped,
    })
}

/// Single-customer entry point, shared by batch computation and the scorer.
pub fn compute_customer(
    customer_id: u32,
    transactions: &[&Transaction],
    cutoff: DateTime<Utc>,
    vocabulary: &CountryVocabulary,
) -> Result<Vec<f64>, FeatureError> {
    let history: Vec<&Transaction> = transactions
        .iter()
        .copied()
        .filter(|tx| tx.timestamp <= cutoff)
        .collect();
    if history.is_empty() {
        return Err(FeatureError::InsufficientHistory { customer_id });
    }

    let total_rows = history.len() as f64;
    let first_ts = history.iter().map(|tx| tx.timestamp).min().unwrap();
    let last_ts = history.iter().map(|tx| tx.timestamp).max().unwrap();

    // RFM
    let recency_days = (cutoff - last_ts).num_days() as f64;
    let invoices: BTreeSet<&str> = history.iter().map(|tx| tx.invoice_id.as_str()).collect();
    let frequency = invoices.len() as f64;
    let monetary: f64 = history.iter().map(|tx| tx.amount()).sum();

    // Basket diversity
    let products: BTreeSet<&str> = history.iter().map(|tx| tx.product_code.as_str()).collect();
    let descriptions: BTreeSet<&str> = history.iter().map(|tx| tx.description.as_str()).collect();
    let mut baskets: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for tx in &history {
        let entry = baskets.entry(tx.invoice_id.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += tx.amount();
    }
    let basket_count = baskets.len() as f64;
    let avg_basket_size = baskets.values().map(|(n, _)| *n as f64).sum::<f64>() / basket_count;
    let avg_basket_value = baskets.values().map(|(_, v)| *v).sum::<f64>() / basket_count;

    // Momentum windows, all anchored at the cutoff
    let w30 = cutoff - Duration::days(30);
    let w90 = cutoff - Duration::days(90);
    let w180 = cutoff - Duration::days(180);
    let mut spend_30d = 0.0;
    let mut spend_90d = 0.0;
    let mut spend_prev_90d = 0.0;
    let mut count_30d = 0usize;
    let mut count_90d = 0usize;
    for tx in &history {
        let ts = tx.timestamp;
        if ts > w30 {
            spend_30d += tx.amount();
            count_30d += 1;
        }
        if ts > w90 {
            spend_90d += tx.amount();
            count_90d += 1;
        } else if ts > w180 {
            spend_prev_90d += tx.amount();
        }
    }
    let spend_ratio_30d_90d = safe_ratio(spend_30d, spend_90d);
    let spend_ratio_90d_180d = safe_ratio(spend_90d, spend_prev_90d);
    let freq_30d = count_30d as f64 / 30.0;
    let freq_90d = count_90d as f64 / 90.0;

    // Returns
    let return_rows: Vec<&&Transaction> = history.iter().filter(|tx| tx.is_return()).collect();
    let total_returns = return_rows.len() as f64;
    let return_rate = total_returns / total_rows;
    let return_amount: f64 = return_rows.iter().map(|tx| -tx.amount()).sum();
    let gross: f64 = history
        .iter()
        .filter(|tx| !tx.is_return())
        .map(|tx| tx.amount())
        .sum();
    let net_amount = gross - return_amount;

    // Temporal
    let dows: Vec<f64> = history
        .iter()
        .map(|tx| tx.timestamp.weekday().num_days_from_monday() as f64)
        .collect();
    let months: Vec<f64> = history.iter().map(|tx| tx.timestamp.month() as f64).collect();
    let avg_day_of_week = dows.clone().mean();
    let std_day_of_week = population_std(&dows);
    let avg_month = months.clone().mean();
    let std_month = population_std(&months);
    let weekend_ratio = dows.iter().filter(|&&d| d >= 5.0).count() as f64 / total_rows;
    let customer_lifetime_days = (last_ts - first_ts).num_days() as f64;

    let mut values = vec![
        recency_days,
        frequency,
        monetary,
        products.len() as f64,
        descriptions.len() as f64,
        avg_basket_size,
        avg_basket_value,
        spend_30d,
        spend_90d,
        spend_ratio_30d_90d,
        spend_ratio_90d_180d,
        freq_30d,
        freq_90d,
        total_returns,
        return_rate,
        return_amount,
        net_amount,
        avg_day_of_week,
        std_day_of_week,
        avg_month,
        std_month,
        weekend_ratio,
        customer_lifetime_days,
    ];

    // Geographic: one-hot of the modal country; lexicographic tie-break via
    // the ordered map.
    let mut country_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tx in &history {
        *country_counts.entry(tx.country.as_str()).or_insert(0) += 1;
    }
    let mut modal_country = "";
    let mut modal_count = 0usize;
    for (country, count) in &country_counts {
        if *count > modal_count {
            modal_country = *country;
            modal_count = *count;
        }
    }
    let mut one_hot = vec![0.0; vocabulary.encoded_width()];
    one_hot[vocabulary.encode(modal_country)] = 1.0;
    values.extend(one_hot);

    Ok(values)
}

/// Ratio with an explicit zero-denominator policy: exactly zero denominators
/// yield 0.0 rather than NaN or an error, at train and inference alike.
fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Population standard deviation; a single observation has no spread, so the
/// result is 0.0 rather than NaN.
fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.to_vec().mean();
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn tx(customer: u32, day: i64, quantity: i64, price: f64, country: &str) -> Transaction {
        Transaction {
            invoice_id: format!("c{customer}-d{day}"),
            product_code: format!("P{day}"),
            description: format!("item {day}"),
            quantity,
            unit_price: price,
            timestamp: base() + Duration::days(day),
            customer_id: customer,
            country: country.to_string(),
        }
    }

    #[test]
    fn feature_names_are_fixed_and_include_unknown_bucket() {
        let vocab = CountryVocabulary::from_countries(vec![
            "France".to_string(),
            "United Kingdom".to_string(),
        ]);
        let names = feature_names(&vocab);
        assert_eq!(names.len(), NUMERIC_FEATURES.len() + 3);
        assert_eq!(names[0], "recency_days");
        assert_eq!(names[names.len() - 3], "country_France");
        assert_eq!(names[names.len() - 2], "country_United_Kingdom");
        assert_eq!(names[names.len() - 1], "country_unknown");
    }

    #[test]
    fn unseen_country_maps_to_unknown_bucket() {
        let vocab = CountryVocabulary::from_countries(vec!["France".to_string()]);
        assert_eq!(vocab.encode("France"), 0);
        assert_eq!(vocab.encode("Narnia"), 1);
        assert_eq!(vocab.encoded_width(), 2);
    }

    #[test]
    fn recency_and_lifetime_follow_the_cutoff() {
        let vocab = CountryVocabulary::from_countries(vec!["France".to_string()]);
        let txs = vec![tx(1, 10, 1, 5.0, "France")];
        let refs: Vec<&Transaction> = txs.iter().collect();
        let cutoff = base() + Duration::days(100);
        let values = compute_customer(1, &refs, cutoff, &vocab).unwrap();
        let names = feature_names(&vocab);
        let idx = |name: &str| names.iter().position(|n| n == name).unwrap();
        assert_eq!(values[idx("recency_days")], 90.0);
        assert_eq!(values[idx("customer_lifetime_days")], 0.0);
        assert_eq!(values[idx("std_day_of_week")], 0.0);
    }

    #[test]
    fn zero_90_day_spend_gives_zero_ratio() {
        let vocab = CountryVocabulary::from_countries(vec!["France".to_string()]);
        // Only old history, far outside every momentum window.
        let txs = vec![tx(1, 0, 2, 3.0, "France")];
        let refs: Vec<&Transaction> = txs.iter().collect();
        let cutoff = base() + Duration::days(400);
        let values = compute_customer(1, &refs, cutoff, &vocab).unwrap();
        let names = feature_names(&vocab);
        let idx = |name: &str| names.iter().position(|n| n == name).unwrap();
        assert_eq!(values[idx("spend_30d")], 0.0);
        assert_eq!(values[idx("spend_90d")], 0.0);
        assert_eq!(values[idx("spend_ratio_30d_90d")], 0.0);
        assert_eq!(values[idx("spend_ratio_90d_180d")], 0.0);
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn return_only_customer_has_negative_net_amount() {
        let vocab = CountryVocabulary::from_countries(vec!["France".to_string()]);
        let txs = vec![tx(4, 20, -2, 4.0, "France"), tx(4, 30, -1, 6.0, "France")];
        let refs: Vec<&Transaction> = txs.iter().collect();
        let cutoff = base() + Duration::days(100);
        let values = compute_customer(4, &refs, cutoff, &vocab).unwrap();
        let names = feature_names(&vocab);
        let idx = |name: &str| names.iter().position(|n| n == name).unwrap();
        assert_eq!(values[idx("total_returns")], 2.0);
        assert_eq!(values[idx("return_rate")], 1.0);
        assert_eq!(values[idx("return_amount")], 14.0);
        assert_eq!(values[idx("net_amount")], -14.0);
    }

    #[test]
    fn no_pre_cutoff_history_is_insufficient() {
        let vocab = CountryVocabulary::from_countries(vec!["France".to_string()]);
        let txs = vec![tx(3, 105, 1, 2.0, "France")];
        let refs: Vec<&Transaction> = txs.iter().collect();
        let cutoff = base() + Duration::days(100);
        let err = compute_customer(3, &refs, cutoff, &vocab).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::InsufficientHistory { customer_id: 3 }
        ));
    }

    #[test]
    fn batch_compute_skips_and_reports_late_customers() {
        let txs = vec![
            tx(1, 10, 1, 2.0, "France"),
            tx(2, 105, 1, 2.0, "France"),
            tx(3, 50, 2, 3.0, "Germany"),
        ];
        let cutoff = base() + Duration::days(100);
        let vocab = CountryVocabulary::fit(&txs, cutoff);
        let report = compute(&txs, cutoff, &vocab).unwrap();
        assert_eq!(report.table.customer_ids(), vec![1, 3]);
        assert_eq!(report.skipped, vec![2]);
    }

    #[test]
    fn repeated_computation_is_identical() {
        let txs = vec![
            tx(1, 10, 1, 2.0, "France"),
            tx(1, 40, 3, 1.5, "France"),
            tx(2, 50, 2, 3.0, "Germany"),
            tx(2, 60, -1, 3.0, "Germany"),
        ];
        let cutoff = base() + Duration::days(100);
        let vocab = CountryVocabulary::fit(&txs, cutoff);
        let first = compute(&txs, cutoff, &vocab).unwrap();
        let second = compute(&txs, cutoff, &vocab).unwrap();
        for (a, b) in first.table.rows.iter().zip(second.table.rows.iter()) {
            assert_eq!(a.customer_id, b.customer_id);
            assert_eq!(a.values, b.values);
        }
    }

    #[test]
    fn post_cutoff_rows_never_change_features() {
        let mut txs = vec![tx(1, 10, 1, 2.0, "France"), tx(1, 40, 3, 1.5, "France")];
        let cutoff = base() + Duration::days(100);
        let vocab = CountryVocabulary::fit(&txs, cutoff);
        let before = compute(&txs, cutoff, &vocab).unwrap();
        // Heavy post-cutoff activity for the same customer.
        txs.push(tx(1, 101, 500, 99.0, "Japan"));
        txs.push(tx(1, 120, -500, 99.0, "Japan"));
        let after = compute(&txs, cutoff, &vocab).unwrap();
        assert_eq!(before.table.rows[0].values, after.table.rows[0].values);
    }
}
