use thiserror::Error;

/// Fatal input-table problems. These abort the pipeline run immediately.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("transaction table is empty")]
    EmptyTable,
    #[error("transaction table has no rows with a customer id")]
    NoIdentifiedCustomers,
    #[error("non-finite value in column {column} (invoice {invoice_id})")]
    NonFiniteValue {
        column: &'static str,
        invoice_id: String,
    },
    #[error(
        "history spans {available_days} day(s); need a feature window plus a full {horizon_days}-day label window"
    )]
    InfeasibleWindow {
        available_days: i64,
        horizon_days: i64,
    },
}

/// Per-customer feature computation failures.
///
/// `InsufficientHistory` is recoverable: batch callers skip the customer and
/// record the skip, single-customer callers surface it.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("customer {customer_id} has no transactions at or before the cutoff")]
    InsufficientHistory { customer_id: u32 },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Training failures.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("learner {learner} diverged: {reason}")]
    Divergence { learner: &'static str, reason: String },
    #[error("all base learners diverged; nothing left to combine")]
    NoSurvivingLearners,
    #[error("training requires both label classes; got only class {class}")]
    SingleClass { class: u8 },
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("need at least {required} rows for {folds}-fold stacking; got {rows}")]
    TooFewRowsForFolds {
        rows: usize,
        folds: usize,
        required: usize,
    },
}

/// Scoring failures. Fatal for the scoring call, never for the process.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("feature set does not match the artifact (missing: [{}], unexpected: [{}])",
        missing.join(", "), unexpected.join(", "))]
    FeatureMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("non-finite feature value for {feature}")]
    NonFiniteInput { feature: String },
}
