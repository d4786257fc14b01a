//! Pipeline error taxonomy.
//!
//! Every stage below the orchestrator catches its own failures and returns
//! either a degraded-but-valid result or an explicit "unavailable" signal;
//! the only caller-visible failure mode is the orchestrator's outermost
//! `{success: false}` boundary.

use thiserror::Error;

use super::types::Modality;

/// Model registry failures. `NotAvailable` is a routing signal, never
/// surfaced to the caller.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no trained model available for modality '{0}'")]
    NotAvailable(Modality),

    #[error("model initialization failed: {0}")]
    Init(String),

    #[error("model inference failed: {0}")]
    Inference(String),
}

/// Reference dataset failures. An unavailable dataset is skipped; the
/// remaining datasets are still searched.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("reference dataset '{key}' unavailable: {reason}")]
    Unavailable { key: String, reason: String },
}

/// Why a fallback tier declined to produce an outcome.
#[derive(Error, Debug)]
pub enum TierFailure {
    #[error("tier unavailable: {0}")]
    Unavailable(String),

    #[error("tier failed: {0}")]
    Failed(String),

    #[error("degraded input: {0}")]
    Degraded(String),

    #[error("no findings above the minimum confidence threshold")]
    NoMatches,
}

/// Top-level analysis failure, rendered into the `{success: false}` boundary.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("malformed raw result: {0}")]
    Format(String),

    #[error("analysis task failed: {0}")]
    Task(String),
}
