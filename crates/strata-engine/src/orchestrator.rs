//! Ingestion orchestrator: connects, creates tables, loads, historizes,
//! verifies, transforms, exports, and always closes the store.

use std::path::Path;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use strata_store::{BackendTarget, ExportDestination, StoreBackend, StoreResult};
use strata_types::{Environment, IngestionRecord, TableDefinition, TableSource};

use crate::config::{self, ResolvedConfig};
use crate::csv_source::{read_csv, unknown_columns};
use crate::errors::{ConfigError, PipelineError, RowCountMismatch, RunFailure};
use crate::manifest::{load_manifest, Manifest};
use crate::relay::FileRelay;
use crate::result::{ExportFailure, ExportReport, PipelineStage, RunReport, TableReport};
use crate::transform::{DbtRunner, TransformError, TransformRunner};

/// Load `strata.yml` and the profile's manifest, then run the pipeline with
/// the real stores and `dbt`.
///
/// # Errors
///
/// Returns a [`RunFailure`] at stage `Init` for configuration problems, or
/// the failure reported by [`Orchestrator::run`].
pub fn run_pipeline(
    config_path: &Path,
    environment: Environment,
    profile: &str,
) -> Result<RunReport, RunFailure> {
    let config = config::load(config_path, environment.as_str(), profile)
        .map_err(|e| RunFailure::configuration(environment, profile, e))?;
    let manifest = load_manifest(
        &config.manifest_path,
        &config.create_table_sql_dir,
        config.kind,
    )
    .map_err(|e| RunFailure::configuration(environment, profile, e))?;
    tracing::debug!(
        manifest = %config.manifest_path.display(),
        tables = manifest.tables.len(),
        "Manifest loaded"
    );

    let transform = DbtRunner::new(config.transform.clone());
    Orchestrator::new(config, manifest, StoreConnector, transform).run()
}

type StageResult<T> = Result<T, (PipelineStage, PipelineError)>;

/// Opens store sessions for the orchestrator.
pub trait BackendConnector {
    /// # Errors
    ///
    /// Returns the store's connection error.
    fn connect(&self, target: &BackendTarget) -> StoreResult<Box<dyn StoreBackend>>;

    /// Session on the upstream staging store, which is only read.
    ///
    /// # Errors
    ///
    /// Returns the store's connection error.
    fn connect_upstream(&self, target: &BackendTarget) -> StoreResult<Box<dyn StoreBackend>> {
        self.connect(target)
    }
}

/// Connects through [`strata_store::connect`], and upstream stores through
/// [`strata_store::connect_read_only`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreConnector;

impl BackendConnector for StoreConnector {
    fn connect(&self, target: &BackendTarget) -> StoreResult<Box<dyn StoreBackend>> {
        strata_store::connect(target)
    }

    fn connect_upstream(&self, target: &BackendTarget) -> StoreResult<Box<dyn StoreBackend>> {
        strata_store::connect_read_only(target)
    }
}

impl<F> BackendConnector for F
where
    F: Fn(&BackendTarget) -> StoreResult<Box<dyn StoreBackend>>,
{
    fn connect(&self, target: &BackendTarget) -> StoreResult<Box<dyn StoreBackend>> {
        self(target)
    }
}

/// Drives one pipeline run for a resolved profile.
///
/// The orchestrator owns the single store handle of the run and closes it
/// exactly once, whatever the outcome.
pub struct Orchestrator {
    config: ResolvedConfig,
    manifest: Manifest,
    connector: Box<dyn BackendConnector>,
    transform: Box<dyn TransformRunner>,
    relay: Option<Box<dyn FileRelay>>,
    export_date: NaiveDate,
}

impl Orchestrator {
    pub fn new(
        config: ResolvedConfig,
        manifest: Manifest,
        connector: impl BackendConnector + 'static,
        transform: impl TransformRunner + 'static,
    ) -> Self {
        Self {
            config,
            manifest,
            connector: Box::new(connector),
            transform: Box::new(transform),
            relay: None,
            export_date: Local::now().date_naive(),
        }
    }

    /// Fetch inputs from and publish exports to a remote store. Only used in
    /// the remote environment.
    #[must_use]
    pub fn with_relay(mut self, relay: impl FileRelay + 'static) -> Self {
        self.relay = Some(Box::new(relay));
        self
    }

    /// Date stamped into export file names (defaults to today).
    #[must_use]
    pub fn with_export_date(mut self, date: NaiveDate) -> Self {
        self.export_date = date;
        self
    }

    /// Run the pipeline to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] naming the stage that could not be reached.
    /// The store is already closed when it is returned.
    pub fn run(mut self) -> Result<RunReport, RunFailure> {
        let start = Instant::now();
        let mut report = RunReport::new(self.config.environment, &self.config.profile);
        tracing::info!(
            profile = self.config.profile,
            environment = %self.config.environment,
            target = %self.config.target.describe(),
            tables = self.manifest.tables.len(),
            views = self.manifest.views.len(),
            "Starting pipeline run"
        );

        let mut store = match self.connector.connect(&self.config.target) {
            Ok(store) => store,
            Err(e) => {
                return Err(failure(
                    report,
                    start,
                    PipelineStage::Connected,
                    PipelineError::Connection(e),
                ))
            }
        };
        report.enter(PipelineStage::Connected);

        let outcome = self.drive(store.as_mut(), &mut report);
        if let Err(e) = store.close() {
            tracing::warn!(error = %e, "Failed to close store connection");
        }

        match outcome {
            Ok(()) => {
                report.enter(PipelineStage::Closed);
                report.duration_secs = start.elapsed().as_secs_f64();
                tracing::info!(
                    profile = report.profile,
                    tables = report.tables.len(),
                    rows = report.rows_loaded(),
                    exports = report.exports.len(),
                    export_failures = report.export_failures.len(),
                    duration_secs = report.duration_secs,
                    "Pipeline run completed"
                );
                Ok(report)
            }
            Err((stage, error)) => Err(failure(report, start, stage, error)),
        }
    }

    fn drive(&mut self, store: &mut dyn StoreBackend, report: &mut RunReport) -> StageResult<()> {
        self.ensure_schema(store)?;
        report.enter(PipelineStage::SchemaReady);

        if self.manifest.is_empty() {
            tracing::info!(profile = self.config.profile, "Manifest declares no tables");
            for stage in [
                PipelineStage::Loaded,
                PipelineStage::Historized,
                PipelineStage::Verified,
                PipelineStage::Transformed,
                PipelineStage::Exported,
            ] {
                report.enter(stage);
            }
            return Ok(());
        }

        self.load(store, report)?;
        report.enter(PipelineStage::Loaded);

        self.historize(store, report)?;
        report.enter(PipelineStage::Historized);

        self.verify(store, report)?;
        report.enter(PipelineStage::Verified);

        let missing_views = self.transform(store)?;
        report.enter(PipelineStage::Transformed);

        self.export(store, report, &missing_views);
        report.enter(PipelineStage::Exported);
        Ok(())
    }

    fn ensure_schema(&self, store: &mut dyn StoreBackend) -> StageResult<()> {
        for table in &self.manifest.tables {
            store
                .ensure_table(table)
                .map_err(|e| (PipelineStage::SchemaReady, PipelineError::Schema(e)))?;
        }
        Ok(())
    }

    fn load(&mut self, store: &mut dyn StoreBackend, report: &mut RunReport) -> StageResult<()> {
        let stage = PipelineStage::Loaded;
        self.fetch_inputs().map_err(|e| (stage, e))?;

        let mut upstream = None;
        let result = self.load_tables(store, &mut upstream, report);
        if let Some(mut upstream) = upstream {
            if let Err(e) = upstream.close() {
                tracing::warn!(error = %e, "Failed to close upstream connection");
            }
        }
        result.map_err(|e| (stage, e))
    }

    fn fetch_inputs(&mut self) -> Result<(), PipelineError> {
        if self.config.environment != Environment::Remote {
            return Ok(());
        }
        let Some(relay) = self.relay.as_mut() else {
            tracing::debug!("No file relay configured, expecting inputs on disk");
            return Ok(());
        };
        for table in &self.manifest.tables {
            if let TableSource::Csv(csv) = table.source() {
                let file = format!("{csv}.csv");
                let path = relay
                    .download(&file, &self.config.input_dir)
                    .map_err(|e| PipelineError::load(table.name(), e.context(format!("fetch {file}"))))?;
                tracing::info!(file, path = %path.display(), "Input fetched");
            }
        }
        Ok(())
    }

    fn load_tables(
        &self,
        store: &mut dyn StoreBackend,
        upstream: &mut Option<Box<dyn StoreBackend>>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let copies_from_staging = self
            .manifest
            .tables
            .iter()
            .any(|t| matches!(t.source(), TableSource::Staging(_)));
        if copies_from_staging {
            *upstream = Some(self.open_upstream()?);
        }

        for table in &self.manifest.tables {
            let rows = match table.source() {
                TableSource::Csv(csv) => self.csv_rows(store, table, csv)?,
                TableSource::Staging(source) => {
                    let Some(staging) = upstream.as_deref_mut() else {
                        return Err(self.missing_upstream());
                    };
                    let rows = staging
                        .fetch_rows(source)
                        .map_err(|e| PipelineError::load(table.name(), e))?;
                    tracing::info!(
                        table = table.name(),
                        source = %source,
                        rows = rows.len(),
                        "Rows copied from staging"
                    );
                    rows
                }
            };
            let receipt = store
                .load_rows(table, &rows)
                .map_err(|e| PipelineError::load(table.name(), e))?;
            report.tables.push(TableReport {
                table: table.name().to_string(),
                source: table.source().clone(),
                rows_loaded: receipt.rows,
                ingested_at: receipt.ingested_at,
                history_appended: None,
            });
        }
        Ok(())
    }

    fn open_upstream(&self) -> Result<Box<dyn StoreBackend>, PipelineError> {
        let target = self
            .config
            .upstream
            .as_ref()
            .ok_or_else(|| self.missing_upstream())?;
        tracing::info!(target = %target.describe(), "Connecting to upstream staging store");
        self.connector
            .connect_upstream(target)
            .map_err(PipelineError::Connection)
    }

    fn missing_upstream(&self) -> PipelineError {
        PipelineError::Configuration(ConfigError::Invalid(vec![format!(
            "Profile '{}' copies tables from staging but has no upstream store",
            self.config.profile
        )]))
    }

    fn csv_rows(
        &self,
        store: &mut dyn StoreBackend,
        table: &TableDefinition,
        csv: &str,
    ) -> Result<Vec<IngestionRecord>, PipelineError> {
        let path = self.config.input_dir.join(format!("{csv}.csv"));
        let parsed = read_csv(&path).map_err(|e| PipelineError::load(table.name(), e))?;
        let table_columns = store
            .column_names(table.name())
            .map_err(|e| PipelineError::load(table.name(), e))?;
        let unknown = unknown_columns(&parsed.columns, &table_columns);
        if !unknown.is_empty() {
            tracing::warn!(
                table = table.name(),
                columns = %unknown.join(", "),
                "CSV columns missing from table are ignored"
            );
        }
        tracing::info!(
            table = table.name(),
            path = %path.display(),
            rows = parsed.rows.len(),
            "CSV read"
        );
        Ok(parsed.rows)
    }

    fn historize(&self, store: &mut dyn StoreBackend, report: &mut RunReport) -> StageResult<()> {
        for (table, entry) in self.manifest.tables.iter().zip(report.tables.iter_mut()) {
            let appended = store
                .historize(table, entry.rows_loaded, entry.ingested_at)
                .map_err(|e| (PipelineStage::Historized, PipelineError::History(e)))?;
            entry.history_appended = Some(appended);
        }
        Ok(())
    }

    fn verify(&self, store: &mut dyn StoreBackend, report: &RunReport) -> StageResult<()> {
        let mut mismatches = Vec::new();
        for (table, entry) in self.manifest.tables.iter().zip(&report.tables) {
            if !store.verify(table, entry.rows_loaded) {
                mismatches.push(RowCountMismatch {
                    table: table.name().to_string(),
                    expected: entry.rows_loaded,
                    actual: store.row_count(table.name()).ok(),
                });
            }
        }
        if !mismatches.is_empty() {
            return Err((
                PipelineStage::Verified,
                PipelineError::VerificationMismatch(mismatches),
            ));
        }
        tracing::info!(tables = report.tables.len(), "Row counts verified");
        Ok(())
    }

    /// Run the transform with the store detached. Returns the configured
    /// views it did not create.
    fn transform(&mut self, store: &mut dyn StoreBackend) -> StageResult<Vec<String>> {
        let stage = PipelineStage::Transformed;
        store
            .detach()
            .map_err(|e| (stage, PipelineError::Connection(e)))?;
        let outcome = self.transform.run();
        let reattached = store.reattach();

        let outcome = outcome.map_err(|e| (stage, PipelineError::from(e)))?;
        if !outcome.success {
            return Err((stage, TransformError::from_outcome(&outcome).into()));
        }
        reattached.map_err(|e| (stage, PipelineError::Connection(e)))?;

        let mut missing = Vec::new();
        for export in &self.manifest.views {
            match store.relation_exists(&export.view) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(view = export.view, "View not created by transform");
                    missing.push(export.view.clone());
                }
                Err(e) => {
                    tracing::warn!(view = export.view, error = %e, "View lookup failed");
                    missing.push(export.view.clone());
                }
            }
        }
        Ok(missing)
    }

    fn export(&mut self, store: &mut dyn StoreBackend, report: &mut RunReport, missing: &[String]) {
        let publish = self.config.environment == Environment::Remote;
        for export in &self.manifest.views {
            if missing.contains(&export.view) {
                report.export_failures.push(ExportFailure {
                    view: export.view.clone(),
                    error: format!("view '{}' does not exist", export.view),
                });
                continue;
            }

            let path = self.config.output_dir.join(export.file_name(self.export_date));
            let destination = ExportDestination::new(&path, self.config.export_delimiter);
            let rows = match store.export_view(&export.view, &destination) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(view = export.view, error = %e, "View export failed");
                    report.export_failures.push(ExportFailure {
                        view: export.view.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let mut published = false;
            if let (true, Some(relay)) = (publish, self.relay.as_mut()) {
                match relay.upload(&path) {
                    Ok(()) => {
                        published = true;
                        tracing::info!(view = export.view, path = %path.display(), "Export published");
                    }
                    Err(e) => {
                        tracing::warn!(view = export.view, error = %e, "Export publish failed");
                        report.export_failures.push(ExportFailure {
                            view: export.view.clone(),
                            error: format!("publish failed: {e:#}"),
                        });
                    }
                }
            }
            report.exports.push(ExportReport {
                view: export.view.clone(),
                path,
                rows,
                published,
            });
        }
    }
}

fn failure(
    mut report: RunReport,
    start: Instant,
    stage: PipelineStage,
    error: PipelineError,
) -> RunFailure {
    report.enter(PipelineStage::Failed);
    report.duration_secs = start.elapsed().as_secs_f64();
    tracing::error!(
        stage = %stage,
        kind = error.kind(),
        error = %error,
        "Pipeline run failed"
    );
    RunFailure {
        stage,
        error,
        report: Box::new(report),
    }
}
