//! Pipeline stages and run result types.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use strata_types::{Environment, TableSource};

/// Orchestrator states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Init,
    Connected,
    SchemaReady,
    Loaded,
    Historized,
    Verified,
    Transformed,
    Exported,
    Closed,
    Failed,
}

impl PipelineStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Connected => "Connected",
            Self::SchemaReady => "SchemaReady",
            Self::Loaded => "Loaded",
            Self::Historized => "Historized",
            Self::Verified => "Verified",
            Self::Transformed => "Transformed",
            Self::Exported => "Exported",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table ingestion counts.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub table: String,
    pub source: TableSource,
    pub rows_loaded: u64,
    pub ingested_at: NaiveDateTime,
    /// Rows appended to the history table; `None` until historized.
    pub history_appended: Option<u64>,
}

/// One exported view file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub view: String,
    pub path: PathBuf,
    pub rows: u64,
    pub published: bool,
}

/// A view that could not be exported. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub view: String,
    pub error: String,
}

/// What a run did, stage by stage.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub environment: Environment,
    pub profile: String,
    /// Stages reached, in order.
    pub stages: Vec<PipelineStage>,
    pub tables: Vec<TableReport>,
    pub exports: Vec<ExportReport>,
    pub export_failures: Vec<ExportFailure>,
    pub duration_secs: f64,
}

impl RunReport {
    #[must_use]
    pub fn new(environment: Environment, profile: impl Into<String>) -> Self {
        Self {
            environment,
            profile: profile.into(),
            stages: vec![PipelineStage::Init],
            tables: Vec::new(),
            exports: Vec::new(),
            export_failures: Vec::new(),
            duration_secs: 0.0,
        }
    }

    pub(crate) fn enter(&mut self, stage: PipelineStage) {
        tracing::debug!(stage = %stage, "Stage reached");
        self.stages.push(stage);
    }

    /// Last stage reached.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Init)
    }

    #[must_use]
    pub fn reached(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }

    #[must_use]
    pub fn rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }
}
