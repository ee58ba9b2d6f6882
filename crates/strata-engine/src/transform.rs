//! External SQL-view transform step.
//!
//! The orchestrator only sees [`TransformRunner`]; [`DbtRunner`] is the
//! production implementation that shells out to `dbt`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::config::TransformSettings;

/// Lock file `dbt deps` writes once packages are installed.
const PACKAGE_LOCK: &str = "package-lock.yml";

/// Captured result of one transform invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl TransformOutcome {
    fn from_output(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// Outcome of a no-op or simulated run.
    #[must_use]
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transform exited with {}: {}", exit_label(.exit_code.as_ref()), .stderr.trim())]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: Option<&i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

impl TransformError {
    /// Failure for an outcome whose `success` flag is false.
    #[must_use]
    pub fn from_outcome(outcome: &TransformOutcome) -> Self {
        let stderr = if outcome.stderr.trim().is_empty() {
            outcome.stdout.clone()
        } else {
            outcome.stderr.clone()
        };
        Self::Failed {
            exit_code: outcome.exit_code,
            stderr,
        }
    }
}

/// Builds every view for the active profile.
pub trait TransformRunner {
    /// Run the transformation to completion.
    ///
    /// A process that starts and exits non-zero is an `Ok` outcome with
    /// `success == false`; the caller decides fatality.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Spawn`] when the tool can't be started.
    fn run(&mut self) -> Result<TransformOutcome, TransformError>;
}

/// Runs `dbt deps` (when needed) then `dbt run` for one profile.
#[derive(Debug, Clone)]
pub struct DbtRunner {
    settings: TransformSettings,
}

impl DbtRunner {
    #[must_use]
    pub fn new(settings: TransformSettings) -> Self {
        Self { settings }
    }

    fn project_dir(&self) -> PathBuf {
        absolute(&self.settings.project_dir)
    }

    fn needs_deps(&self) -> bool {
        !self.project_dir().join(PACKAGE_LOCK).exists()
    }

    fn deps_args(&self) -> Vec<OsString> {
        vec![
            "deps".into(),
            "--project-dir".into(),
            self.project_dir().into(),
        ]
    }

    /// Arguments passed to `dbt run`.
    #[must_use]
    pub fn run_args(&self) -> Vec<OsString> {
        vec![
            "run".into(),
            "--project-dir".into(),
            self.project_dir().into(),
            "--profiles-dir".into(),
            absolute(&self.settings.profiles_dir).into(),
            "--profile".into(),
            self.settings.profile.clone().into(),
            "--target".into(),
            self.settings.target.clone().into(),
            "--select".into(),
            self.settings.select.clone().into(),
        ]
    }

    fn invoke(&self, args: &[OsString]) -> Result<TransformOutcome, TransformError> {
        let program = &self.settings.executable;
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| TransformError::Spawn {
                program: program.clone(),
                source,
            })?;
        Ok(TransformOutcome::from_output(&output))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl TransformRunner for DbtRunner {
    fn run(&mut self) -> Result<TransformOutcome, TransformError> {
        if self.needs_deps() {
            tracing::info!(project = %self.settings.project_dir.display(), "Installing dbt packages");
            let deps = self.invoke(&self.deps_args())?;
            if !deps.success {
                tracing::error!(exit_code = ?deps.exit_code, "dbt deps failed");
                return Ok(deps);
            }
        }

        tracing::info!(
            profile = %self.settings.profile,
            target = %self.settings.target,
            select = %self.settings.select,
            "Running dbt"
        );
        let outcome = self.invoke(&self.run_args())?;
        if outcome.success {
            tracing::info!("dbt run finished");
            tracing::debug!(stdout = %outcome.stdout, "dbt output");
        } else {
            tracing::error!(exit_code = ?outcome.exit_code, stdout = %outcome.stdout, "dbt run failed");
        }
        Ok(outcome)
    }
}
