use crate::error::SchemaError;
use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A raw transaction row as delivered by the external loader. Rows may carry
/// a null customer id; those never reach the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub invoice_id: String,
    pub product_code: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub timestamp: DateTime<Utc>,
    pub customer_id: Option<u32>,
    pub country: String,
}

/// A cleaned transaction. `quantity < 0` marks a return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub invoice_id: String,
    pub product_code: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub timestamp: DateTime<Utc>,
    pub customer_id: u32,
    pub country: String,
}

impl Transaction {
    pub fn is_return(&self) -> bool {
        self.quantity < 0
    }

    /// Signed line amount; negative for returns.
    pub fn amount(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

/// Serialized container for transaction tables exchanged with outer tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub created_at: DateTime<Utc>,
    pub rows: Vec<RawTransaction>,
}

impl TransactionSnapshot {
    pub fn new(rows: Vec<RawTransaction>, created_at: DateTime<Utc>) -> Self {
        Self { created_at, rows }
    }

    pub fn save(&self, path: &Path) -> AnyResult<()> {
        let encoded = bincode::serialize(self)
            .with_context(|| format!("Failed to encode snapshot for {}", path.display()))?;
        fs::write(path, encoded)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> AnyResult<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("Failed to decode snapshot at {}", path.display()))
    }
}

/// Filters raw rows down to the cleaned form the core operates on.
///
/// Dropped: rows without a customer id, rows with zero quantity, and rows
/// with a non-positive unit price that are not explicit returns. Non-finite
/// monetary values are a schema fault, not a filter.
pub fn clean_transactions(rows: &[RawTransaction]) -> Result<Vec<Transaction>, SchemaError> {
    if rows.is_empty() {
        return Err(SchemaError::EmptyTable);
    }

    let mut cleaned = Vec::with_capacity(rows.len());
    for row in rows {
        if !row.unit_price.is_finite() {
            return Err(SchemaError::NonFiniteValue {
                column: "unit_price",
                invoice_id: row.invoice_id.clone(),
            });
        }
        let customer_id = match row.customer_id {
            Some(id) => id,
            None => continue,
        };
        if row.quantity == 0 {
            continue;
        }
        if row.unit_price <= 0.0 && row.quantity > 0 {
            continue;
        }
        cleaned.push(Transaction {
            invoice_id: row.invoice_id.clone(),
            product_code: row.product_code.clone(),
            description: row.description.clone(),
            quantity: row.quantity,
            unit_price: row.unit_price,
            timestamp: row.timestamp,
            customer_id,
            country: row.country.clone(),
        });
    }

    if cleaned.is_empty() {
        return Err(SchemaError::NoIdentifiedCustomers);
    }
    Ok(cleaned)
}

/// Row-major feature matrix fed to the learners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            debug_assert_eq!(row.len(), n_cols);
            data.extend(row);
        }
        Self {
            rows: n_rows,
            cols: n_cols,
            data,
        }
    }

    pub fn with_cols(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        let start = idx * self.cols;
        &self.data[start..start + self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |idx| self.row(idx))
    }

    pub fn push_row(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.cols);
        self.data.extend_from_slice(row);
        self.rows += 1;
    }

    /// Copies the selected rows into a new matrix.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &idx in indices {
            data.extend_from_slice(self.row(idx));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(invoice: &str, quantity: i64, unit_price: f64, customer: Option<u32>) -> RawTransaction {
        RawTransaction {
            invoice_id: invoice.to_string(),
            product_code: "P1".to_string(),
            description: "widget".to_string(),
            quantity,
            unit_price,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            customer_id: customer,
            country: "United Kingdom".to_string(),
        }
    }

    #[test]
    fn cleaning_drops_null_customers_and_free_rows() {
        let rows = vec![
            raw("i1", 2, 3.5, Some(10)),
            raw("i2", 1, 1.0, None),
            raw("i3", 5, 0.0, Some(10)),
            raw("i4", -1, 2.0, Some(11)),
            raw("i5", 0, 2.0, Some(11)),
        ];
        let cleaned = clean_transactions(&rows).unwrap();
        let invoices: Vec<&str> = cleaned.iter().map(|t| t.invoice_id.as_str()).collect();
        assert_eq!(invoices, vec!["i1", "i4"]);
        assert!(cleaned[1].is_return());
        assert!((cleaned[1].amount() + 2.0).abs() < 1e-12);
    }

    #[test]
    fn cleaning_rejects_non_finite_prices() {
        let rows = vec![raw("i1", 1, f64::NAN, Some(1))];
        assert!(matches!(
            clean_transactions(&rows),
            Err(SchemaError::NonFiniteValue {
                column: "unit_price",
                ..
            })
        ));
    }

    #[test]
    fn empty_table_is_a_schema_error() {
        assert!(matches!(
            clean_transactions(&[]),
            Err(SchemaError::EmptyTable)
        ));
    }

    #[test]
    fn matrix_select_copies_rows() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        let picked = m.select(&[2, 0]);
        assert_eq!(picked.rows, 2);
        assert_eq!(picked.row(0), &[5.0, 6.0]);
        assert_eq!(picked.row(1), &[1.0, 2.0]);
    }
}
