pub mod types;
pub mod error;
pub mod features;
pub mod modality;
pub mod registry;
pub mod datasets;
pub mod rules;
pub mod format;
pub mod orchestrator;

pub use error::{AnalysisError, DatasetError, RegistryError, TierFailure};
pub use orchestrator::Orchestrator;
pub use types::*;
