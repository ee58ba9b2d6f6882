//! Pipeline error model.

use std::fmt;
use std::path::PathBuf;

use strata_store::StoreError;
use strata_types::{Environment, UnknownEnvironment};

use crate::result::{PipelineStage, RunReport};
use crate::transform::TransformError;

/// Bad environment, profile, config document or manifest. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownEnvironment(#[from] UnknownEnvironment),

    #[error("unknown profile '{name}', expected one of: {}", .available.join(", "))]
    UnknownProfile {
        name: String,
        available: Vec<String>,
    },

    #[error("profile '{profile}' has no output for environment '{environment}'")]
    MissingOutput {
        profile: String,
        environment: Environment,
    },

    #[error("profile '{profile}' needs upstream profile '{upstream}', which is not usable: {reason}")]
    MissingUpstream {
        profile: String,
        upstream: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing environment variable(s): {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Expected versus observed row count for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCountMismatch {
    pub table: String,
    pub expected: u64,
    /// `None` when the live count couldn't be read.
    pub actual: Option<u64>,
}

impl fmt::Display for RowCountMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "{}: expected {} rows, found {actual}",
                self.table, self.expected
            ),
            None => write!(
                f,
                "{}: expected {} rows, count unavailable",
                self.table, self.expected
            ),
        }
    }
}

/// Categorized fatal error of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("{0}")]
    Connection(#[source] StoreError),

    #[error("{0}")]
    Schema(#[source] StoreError),

    #[error("failed to load '{table}': {source:#}")]
    Load {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    History(#[source] StoreError),

    #[error("row count verification failed: {}", join_mismatches(.0))]
    VerificationMismatch(Vec<RowCountMismatch>),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

fn join_mismatches(mismatches: &[RowCountMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Stable kind label used in the terminal failure message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Connection(_) => "ConnectionError",
            Self::Schema(_) => "SchemaError",
            Self::Load { .. } => "LoadError",
            Self::History(_) => "HistoryError",
            Self::VerificationMismatch(_) => "VerificationMismatch",
            Self::Transform(_) => "TransformError",
        }
    }

    pub(crate) fn load(table: &str, source: impl Into<anyhow::Error>) -> Self {
        Self::Load {
            table: table.to_string(),
            source: source.into(),
        }
    }
}

/// Terminal failure of a run: the stage that could not be reached, the
/// error that stopped it, and what had completed before.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: PipelineStage,
    pub error: PipelineError,
    pub report: Box<RunReport>,
}

impl RunFailure {
    /// Failure before a store was ever contacted.
    pub(crate) fn configuration(environment: Environment, profile: &str, error: ConfigError) -> Self {
        let mut report = RunReport::new(environment, profile);
        report.enter(PipelineStage::Failed);
        let error = PipelineError::Configuration(error);
        tracing::error!(kind = error.kind(), error = %error, "Pipeline configuration rejected");
        Self {
            stage: PipelineStage::Init,
            error,
            report: Box::new(report),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline failed at stage {} ({}): {}",
            self.stage,
            self.error.kind(),
            self.error
        )
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_lists_available() {
        let err = ConfigError::UnknownProfile {
            name: "Ghost".into(),
            available: vec!["Helios".into(), "Staging".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown profile 'Ghost', expected one of: Helios, Staging"
        );
    }

    #[test]
    fn invalid_lists_every_problem() {
        let err = ConfigError::Invalid(vec!["a is bad".into(), "b is bad".into()]);
        let msg = err.to_string();
        assert!(msg.contains("a is bad") && msg.contains("b is bad"), "got: {msg}");
    }

    #[test]
    fn mismatch_display_names_table() {
        let err = PipelineError::VerificationMismatch(vec![
            RowCountMismatch {
                table: "patients".into(),
                expected: 3,
                actual: Some(2),
            },
            RowCountMismatch {
                table: "visits".into(),
                expected: 1,
                actual: None,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("patients: expected 3 rows, found 2"), "got: {msg}");
        assert!(msg.contains("visits: expected 1 rows, count unavailable"), "got: {msg}");
        assert_eq!(err.kind(), "VerificationMismatch");
    }

    #[test]
    fn load_error_keeps_context_chain() {
        let source = anyhow::anyhow!("bad field").context("line 4");
        let err = PipelineError::load("patients", source);
        let msg = err.to_string();
        assert!(msg.contains("patients"), "got: {msg}");
        assert!(msg.contains("line 4") && msg.contains("bad field"), "got: {msg}");
        assert_eq!(err.kind(), "LoadError");
    }

    #[test]
    fn configuration_error_converts() {
        let err: PipelineError = ConfigError::MissingEnvVars(vec!["PG_PASSWORD".into()]).into();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(err.to_string().contains("PG_PASSWORD"));
    }
}
