//! Medical file triage pipeline.
//!
//! Takes an uploaded medical file (scan image, waveform CSV, clinical
//! feature row, or report text), detects its clinical modality, and
//! analyzes it through three tiers — trained classifier, reference
//! dataset similarity, rule-based heuristics — falling forward until one
//! produces a result. Every outcome is normalized into a single canonical
//! shape with risk assessment and patient/clinician summaries.

pub mod config;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `RUST_LOG`, defaulting to this crate at INFO.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
