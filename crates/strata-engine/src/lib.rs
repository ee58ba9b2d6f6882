//! Config resolution, manifest loading and run orchestration for strata.

#![warn(clippy::pedantic)]

pub mod config;
pub mod csv_source;
pub mod errors;
pub mod manifest;
pub mod orchestrator;
pub mod relay;
pub mod result;
pub mod transform;

// Re-export public API for convenience
pub use errors::{ConfigError, PipelineError, RunFailure};
pub use manifest::{load_manifest, Manifest, ViewExport};
pub use orchestrator::{run_pipeline, BackendConnector, Orchestrator, StoreConnector};
pub use relay::FileRelay;
pub use result::{PipelineStage, RunReport};
pub use transform::{DbtRunner, TransformOutcome, TransformRunner};
