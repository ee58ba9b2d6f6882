//! Integration tests for the ingestion orchestrator.
//!
//! The DuckDB tests run the whole stage sequence against a real database
//! file; the fake-store tests pin down stage transitions, failure reporting
//! and connection release.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use strata_engine::config::{ProfileKind, ResolvedConfig, TransformSettings};
use strata_engine::transform::TransformError;
use strata_engine::{
    run_pipeline, FileRelay, Manifest, Orchestrator, PipelineError, PipelineStage,
    StoreConnector, TransformOutcome, TransformRunner, ViewExport,
};
use strata_store::{
    BackendTarget, DuckDbTarget, ExportDestination, LoadReceipt, StoreBackend, StoreError,
    StoreResult,
};
use strata_types::{BackendKind, Environment, IngestionRecord, TableDefinition, TableSource};

fn export_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn duckdb_target(path: &Path) -> BackendTarget {
    BackendTarget::DuckDb(DuckDbTarget {
        path: path.to_path_buf(),
        schema: "main".into(),
    })
}

fn resolved(root: &Path, environment: Environment, target: BackendTarget) -> ResolvedConfig {
    ResolvedConfig {
        environment,
        profile: "Staging".into(),
        kind: ProfileKind::Staging,
        target,
        upstream: None,
        manifest_path: root.join("manifest.yml"),
        input_dir: root.join("input"),
        output_dir: root.join("output"),
        create_table_sql_dir: root.join("sql"),
        export_delimiter: b';',
        transform: TransformSettings {
            executable: "dbt".into(),
            project_dir: root.join("models"),
            profiles_dir: root.to_path_buf(),
            profile: "Staging".into(),
            target: environment.as_str().into(),
            select: "+models".into(),
        },
    }
}

fn patients(source: TableSource) -> TableDefinition {
    TableDefinition::new(
        "patients",
        "CREATE TABLE patients (id INTEGER, name VARCHAR)",
        source,
    )
}

fn patients_manifest(views: &[&str]) -> Manifest {
    Manifest {
        tables: vec![patients(TableSource::Csv("patients".into()))],
        views: views
            .iter()
            .map(|v| ViewExport {
                view: (*v).to_string(),
                radical: (*v).to_string(),
            })
            .collect(),
    }
}

fn write_csv(root: &Path, content: &str) {
    let input = root.join("input");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("patients.csv"), content).unwrap();
}

fn count(conn: &duckdb::Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// Transform that builds views through its own connection, the way the
/// external tool does while the pipeline's handle is detached.
struct SqlTransform {
    database: PathBuf,
    sql: String,
    calls: Rc<Cell<usize>>,
}

impl SqlTransform {
    fn new(database: &Path, sql: &str) -> Self {
        Self {
            database: database.to_path_buf(),
            sql: sql.to_string(),
            calls: Rc::default(),
        }
    }
}

impl TransformRunner for SqlTransform {
    fn run(&mut self) -> Result<TransformOutcome, TransformError> {
        self.calls.set(self.calls.get() + 1);
        let conn = duckdb::Connection::open(&self.database).unwrap();
        conn.execute_batch(&self.sql).unwrap();
        drop(conn);
        Ok(TransformOutcome::succeeded("1 of 1 OK"))
    }
}

/// Transform returning a canned outcome and counting invocations.
struct CannedTransform {
    outcome: TransformOutcome,
    calls: Rc<Cell<usize>>,
}

impl CannedTransform {
    fn ok() -> Self {
        Self {
            outcome: TransformOutcome::succeeded(""),
            calls: Rc::default(),
        }
    }

    fn failing(stderr: &str) -> Self {
        Self {
            outcome: TransformOutcome {
                success: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
            calls: Rc::default(),
        }
    }
}

impl TransformRunner for CannedTransform {
    fn run(&mut self) -> Result<TransformOutcome, TransformError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.outcome.clone())
    }
}

// ---------------------------------------------------------------------------
// DuckDB end to end
// ---------------------------------------------------------------------------

#[test]
fn patients_csv_is_loaded_historized_and_exported() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("staging.duckdb");
    write_csv(dir.path(), "Id;Name\n1;Ana\n2;Bruno\n3;Chloé\n");

    let transform = SqlTransform::new(
        &db,
        "CREATE OR REPLACE VIEW v_patients AS SELECT id, name FROM patients",
    );
    let calls = Rc::clone(&transform.calls);
    let config = resolved(dir.path(), Environment::Local, duckdb_target(&db));
    let report = Orchestrator::new(config, patients_manifest(&["v_patients"]), StoreConnector, transform)
        .with_export_date(export_date())
        .run()
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(report.stage(), PipelineStage::Closed);
    assert_eq!(
        report.stages,
        vec![
            PipelineStage::Init,
            PipelineStage::Connected,
            PipelineStage::SchemaReady,
            PipelineStage::Loaded,
            PipelineStage::Historized,
            PipelineStage::Verified,
            PipelineStage::Transformed,
            PipelineStage::Exported,
            PipelineStage::Closed,
        ]
    );
    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.tables[0].rows_loaded, 3);
    assert_eq!(report.tables[0].history_appended, Some(3));
    assert!(report.export_failures.is_empty());

    let export = dir.path().join("output/v_patients_2026_10_14.csv");
    assert_eq!(report.exports.len(), 1);
    assert_eq!(report.exports[0].path, export);
    assert_eq!(report.exports[0].rows, 3);
    assert!(!report.exports[0].published);
    let content = std::fs::read_to_string(&export).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4, "header plus 3 rows, got: {content}");
    assert_eq!(lines[0], "id;name");
    assert_eq!(lines[3], "3;Chloé");

    // The run closed its handle, so the file can be opened again.
    let conn = duckdb::Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT count(*) FROM patients"), 3);
    assert_eq!(count(&conn, "SELECT count(*) FROM zpatients"), 3);
    assert_eq!(
        count(&conn, "SELECT count(DISTINCT date_ingestion) FROM zpatients"),
        1
    );
}

#[test]
fn rerun_appends_a_second_history_batch() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("staging.duckdb");
    write_csv(dir.path(), "id;name\n1;Ana\n2;Bruno\n3;Chloé\n");

    for _ in 0..2 {
        let config = resolved(dir.path(), Environment::Local, duckdb_target(&db));
        Orchestrator::new(config, patients_manifest(&[]), StoreConnector, CannedTransform::ok())
            .run()
            .unwrap();
    }

    let conn = duckdb::Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT count(*) FROM patients"), 3);
    assert_eq!(count(&conn, "SELECT count(*) FROM zpatients"), 6);
    assert_eq!(
        count(&conn, "SELECT count(DISTINCT date_ingestion) FROM zpatients"),
        2
    );
}

#[test]
fn malformed_row_fails_load_and_leaves_table_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("staging.duckdb");
    write_csv(dir.path(), "id;name\n1;Ana\nnot-a-number;Bruno\n");

    let transform = CannedTransform::ok();
    let calls = Rc::clone(&transform.calls);
    let config = resolved(dir.path(), Environment::Local, duckdb_target(&db));
    let failure = Orchestrator::new(config, patients_manifest(&[]), StoreConnector, transform)
        .run()
        .unwrap_err();

    assert_eq!(failure.stage, PipelineStage::Loaded);
    assert_eq!(failure.error.kind(), "LoadError");
    assert_eq!(failure.report.stage(), PipelineStage::Failed);
    assert!(failure.report.reached(PipelineStage::SchemaReady));
    assert!(failure
        .to_string()
        .starts_with("pipeline failed at stage Loaded (LoadError)"));
    assert_eq!(calls.get(), 0);

    let conn = duckdb::Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT count(*) FROM patients"), 0);
}

#[test]
fn missing_csv_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("staging.duckdb");
    let config = resolved(dir.path(), Environment::Local, duckdb_target(&db));

    let failure = Orchestrator::new(config, patients_manifest(&[]), StoreConnector, CannedTransform::ok())
        .run()
        .unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Loaded);
    assert!(
        failure.to_string().contains("patients.csv"),
        "got: {failure}"
    );
}

#[test]
fn project_profile_copies_tables_from_staging_store() {
    let dir = tempfile::tempdir().unwrap();
    let staging_db = dir.path().join("staging.duckdb");
    let project_db = dir.path().join("project.duckdb");
    write_csv(dir.path(), "id;name\n1;Ana\n2;Bruno\n3;Chloé\n");

    let staging = resolved(dir.path(), Environment::Local, duckdb_target(&staging_db));
    Orchestrator::new(staging, patients_manifest(&[]), StoreConnector, CannedTransform::ok())
        .run()
        .unwrap();

    let mut project = resolved(dir.path(), Environment::Local, duckdb_target(&project_db));
    project.profile = "Helios".into();
    project.kind = ProfileKind::Project;
    project.upstream = Some(duckdb_target(&staging_db));
    let manifest = Manifest {
        tables: vec![patients(TableSource::Staging("patients".into()))],
        views: Vec::new(),
    };
    let report = Orchestrator::new(project, manifest, StoreConnector, CannedTransform::ok())
        .run()
        .unwrap();

    assert_eq!(report.rows_loaded(), 3);
    assert_eq!(report.tables[0].source, TableSource::Staging("patients".into()));
    let conn = duckdb::Connection::open(&project_db).unwrap();
    assert_eq!(count(&conn, "SELECT count(*) FROM patients"), 3);
    assert_eq!(count(&conn, "SELECT count(*) FROM zpatients"), 3);
    assert_eq!(
        count(&conn, "SELECT count(*) FROM patients WHERE id = 2 AND name = 'Bruno'"),
        1
    );
}

#[test]
fn missing_upstream_store_fails_load_without_creating_it() {
    let dir = tempfile::tempdir().unwrap();
    let staging_db = dir.path().join("missing/staging.duckdb");
    let project_db = dir.path().join("project.duckdb");

    let mut project = resolved(dir.path(), Environment::Local, duckdb_target(&project_db));
    project.profile = "Helios".into();
    project.kind = ProfileKind::Project;
    project.upstream = Some(duckdb_target(&staging_db));
    let manifest = Manifest {
        tables: vec![patients(TableSource::Staging("patients".into()))],
        views: Vec::new(),
    };
    let failure = Orchestrator::new(project, manifest, StoreConnector, CannedTransform::ok())
        .run()
        .unwrap_err();

    assert_eq!(failure.stage, PipelineStage::Loaded);
    assert_eq!(failure.error.kind(), "ConnectionError");
    assert!(failure.to_string().contains("does not exist"), "got: {failure}");
    assert!(!staging_db.exists());
    assert!(!dir.path().join("missing").exists());
}

#[test]
fn upstream_store_is_left_unchanged_by_project_run() {
    let dir = tempfile::tempdir().unwrap();
    let staging_db = dir.path().join("staging.duckdb");
    let project_db = dir.path().join("project.duckdb");
    write_csv(dir.path(), "id;name\n1;Ana\n2;Bruno\n");

    let staging = resolved(dir.path(), Environment::Local, duckdb_target(&staging_db));
    Orchestrator::new(staging, patients_manifest(&[]), StoreConnector, CannedTransform::ok())
        .run()
        .unwrap();

    let mut project = resolved(dir.path(), Environment::Local, duckdb_target(&project_db));
    project.profile = "Helios".into();
    project.kind = ProfileKind::Project;
    project.upstream = Some(BackendTarget::DuckDb(DuckDbTarget {
        path: staging_db.clone(),
        schema: "helios".into(),
    }));
    let manifest = Manifest {
        tables: vec![patients(TableSource::Staging("patients".into()))],
        views: Vec::new(),
    };
    let failure = Orchestrator::new(project, manifest, StoreConnector, CannedTransform::ok())
        .run()
        .unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Loaded);

    let conn = duckdb::Connection::open(&staging_db).unwrap();
    assert_eq!(
        count(
            &conn,
            "SELECT count(*) FROM information_schema.schemata WHERE schema_name = 'helios'"
        ),
        0
    );
}

#[cfg(unix)]
#[test]
fn run_pipeline_resolves_config_file() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_csv(root, "id,name\n1,Ana\n2,Bruno\n");
    std::fs::create_dir_all(root.join("sql")).unwrap();
    std::fs::write(
        root.join("sql/patients.sql"),
        "CREATE TABLE patients (id INTEGER, name VARCHAR)",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("models")).unwrap();
    std::fs::write(root.join("models/package-lock.yml"), "packages: []\n").unwrap();
    std::fs::write(root.join("manifest.yml"), "tables:\n  - name: patients\n").unwrap();
    let dbt = root.join("dbt");
    std::fs::write(&dbt, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&dbt, std::fs::Permissions::from_mode(0o755)).unwrap();

    let r = root.display();
    let yaml = format!(
        "transform:\n  executable: {r}/dbt\n  profiles_dir: {r}\nprofiles:\n  Staging:\n    manifest: {r}/manifest.yml\n    directories:\n      input: {r}/input\n      output: {r}/output\n      create_table_sql: {r}/sql\n      models: {r}/models\n    outputs:\n      local:\n        type: duckdb\n        path: {r}/staging.duckdb\n"
    );
    let config_path = root.join("strata.yml");
    std::fs::write(&config_path, yaml).unwrap();

    let report = run_pipeline(&config_path, Environment::Local, "Staging").unwrap();
    assert_eq!(report.stage(), PipelineStage::Closed);
    assert_eq!(report.rows_loaded(), 2);

    let failure = run_pipeline(&config_path, Environment::Local, "Ghost").unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Init);
    assert_eq!(failure.error.kind(), "ConfigurationError");
    assert!(failure.to_string().contains("Staging"), "got: {failure}");
}

// ---------------------------------------------------------------------------
// Fake store: stage transitions and connection release
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct FakeStore {
    calls: Arc<Mutex<Vec<String>>>,
    views: Vec<String>,
    fail_schema: bool,
    fail_export: bool,
    /// Added to the live row count to simulate a lost or duplicated row.
    count_skew: u64,
    loaded: u64,
}

impl FakeStore {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn closes(&self) -> usize {
        self.calls().iter().filter(|c| *c == "close").count()
    }

    fn connector(&self) -> impl Fn(&BackendTarget) -> StoreResult<Box<dyn StoreBackend>> + 'static {
        let store = self.clone();
        move |_: &BackendTarget| -> StoreResult<Box<dyn StoreBackend>> { Ok(Box::new(store.clone())) }
    }
}

fn timestamp() -> NaiveDateTime {
    export_date().and_hms_opt(8, 30, 0).unwrap()
}

impl StoreBackend for FakeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    fn ensure_table(&mut self, table: &TableDefinition) -> StoreResult<()> {
        self.record(format!("ensure_table:{}", table.name()));
        if self.fail_schema {
            return Err(StoreError::Schema {
                table: table.name().to_string(),
                source: "syntax error at or near \"TABLE\"".into(),
            });
        }
        Ok(())
    }

    fn load_rows(
        &mut self,
        table: &TableDefinition,
        rows: &[IngestionRecord],
    ) -> StoreResult<LoadReceipt> {
        self.record(format!("load_rows:{}:{}", table.name(), rows.len()));
        self.loaded = rows.len() as u64;
        Ok(LoadReceipt {
            rows: self.loaded,
            ingested_at: timestamp(),
        })
    }

    fn historize(
        &mut self,
        table: &TableDefinition,
        row_count: u64,
        _ingested_at: NaiveDateTime,
    ) -> StoreResult<u64> {
        self.record(format!("historize:{}", table.name()));
        Ok(row_count)
    }

    fn row_count(&mut self, _relation: &str) -> StoreResult<u64> {
        Ok(self.loaded + self.count_skew)
    }

    fn relation_exists(&mut self, name: &str) -> StoreResult<bool> {
        Ok(self.views.iter().any(|v| v == name))
    }

    fn column_names(&mut self, _relation: &str) -> StoreResult<Vec<String>> {
        Ok(vec!["id".into(), "name".into()])
    }

    fn fetch_rows(&mut self, _relation: &str) -> StoreResult<Vec<IngestionRecord>> {
        Ok(Vec::new())
    }

    fn export_view(&mut self, view: &str, destination: &ExportDestination) -> StoreResult<u64> {
        self.record(format!("export_view:{view}"));
        if self.fail_export {
            return Err(StoreError::Export {
                view: view.to_string(),
                source: "disk full".into(),
            });
        }
        std::fs::create_dir_all(destination.path.parent().unwrap()).unwrap();
        std::fs::write(&destination.path, "id;name\n1;Ana\n").unwrap();
        Ok(1)
    }

    fn detach(&mut self) -> StoreResult<()> {
        self.record("detach");
        Ok(())
    }

    fn reattach(&mut self) -> StoreResult<()> {
        self.record("reattach");
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.record("close");
        Ok(())
    }
}

fn fake_run(
    root: &Path,
    store: &FakeStore,
    manifest: Manifest,
    transform: CannedTransform,
) -> Result<strata_engine::RunReport, strata_engine::RunFailure> {
    let config = resolved(root, Environment::Local, duckdb_target(&root.join("unused.duckdb")));
    Orchestrator::new(config, manifest, store.connector(), transform)
        .with_export_date(export_date())
        .run()
}

#[test]
fn store_is_closed_once_after_success() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "id;name\n1;Ana\n");
    let store = FakeStore {
        views: vec!["v_patients".into()],
        ..FakeStore::default()
    };

    let report = fake_run(dir.path(), &store, patients_manifest(&["v_patients"]), CannedTransform::ok()).unwrap();
    assert_eq!(report.stage(), PipelineStage::Closed);
    assert_eq!(
        store.calls(),
        vec![
            "ensure_table:patients",
            "load_rows:patients:1",
            "historize:patients",
            "detach",
            "reattach",
            "export_view:v_patients",
            "close",
        ]
    );
}

#[test]
fn schema_failure_stops_before_loading_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FakeStore {
        fail_schema: true,
        ..FakeStore::default()
    };

    let failure = fake_run(dir.path(), &store, patients_manifest(&[]), CannedTransform::ok()).unwrap_err();
    assert_eq!(failure.stage, PipelineStage::SchemaReady);
    assert!(matches!(failure.error, PipelineError::Schema(_)));
    assert_eq!(store.calls(), vec!["ensure_table:patients", "close"]);
}

#[test]
fn connection_failure_has_nothing_to_close() {
    let dir = tempfile::tempdir().unwrap();
    let config = resolved(dir.path(), Environment::Local, duckdb_target(&dir.path().join("x.duckdb")));
    let refuse = |_: &BackendTarget| -> StoreResult<Box<dyn StoreBackend>> {
        Err(StoreError::Connection("connection refused".into()))
    };

    let failure = Orchestrator::new(config, patients_manifest(&[]), refuse, CannedTransform::ok())
        .run()
        .unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Connected);
    assert_eq!(failure.error.kind(), "ConnectionError");
    assert_eq!(
        failure.report.stages,
        vec![PipelineStage::Init, PipelineStage::Failed]
    );
    assert!(failure.to_string().contains("connection refused"));
}

#[test]
fn count_mismatch_fails_verification_before_transform() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "id;name\n1;Ana\n2;Bruno\n3;Chloé\n");
    let store = FakeStore {
        count_skew: 1,
        ..FakeStore::default()
    };
    let transform = CannedTransform::ok();
    let calls = Rc::clone(&transform.calls);

    let failure = fake_run(dir.path(), &store, patients_manifest(&[]), transform).unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Verified);
    let PipelineError::VerificationMismatch(mismatches) = &failure.error else {
        panic!("expected mismatch, got: {}", failure.error);
    };
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].expected, 3);
    assert_eq!(mismatches[0].actual, Some(4));
    assert_eq!(calls.get(), 0);
    assert_eq!(store.closes(), 1);
}

#[test]
fn transform_failure_is_fatal_and_reattaches() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "id;name\n1;Ana\n");
    let store = FakeStore::default();

    let failure = fake_run(
        dir.path(),
        &store,
        patients_manifest(&["v_patients"]),
        CannedTransform::failing("Compilation Error in model v_patients"),
    )
    .unwrap_err();
    assert_eq!(failure.stage, PipelineStage::Transformed);
    assert_eq!(failure.error.kind(), "TransformError");
    assert!(failure.to_string().contains("Compilation Error"), "got: {failure}");

    let calls = store.calls();
    let tail: Vec<&str> = calls.iter().rev().take(3).rev().map(String::as_str).collect();
    assert_eq!(tail, vec!["detach", "reattach", "close"]);
    assert!(!calls.iter().any(|c| c.starts_with("export_view")));
}

#[test]
fn export_failures_are_collected_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "id;name\n1;Ana\n");
    let store = FakeStore {
        views: vec!["v_patients".into()],
        ..FakeStore::default()
    };

    let report = fake_run(
        dir.path(),
        &store,
        patients_manifest(&["v_patients", "v_ghost"]),
        CannedTransform::ok(),
    )
    .unwrap();
    assert_eq!(report.stage(), PipelineStage::Closed);
    assert_eq!(report.exports.len(), 1);
    assert_eq!(report.exports[0].view, "v_patients");
    assert_eq!(report.export_failures.len(), 1);
    assert_eq!(report.export_failures[0].view, "v_ghost");
    assert!(report.export_failures[0].error.contains("does not exist"));

    let broken = FakeStore {
        views: vec!["v_patients".into()],
        fail_export: true,
        ..FakeStore::default()
    };
    let report = fake_run(dir.path(), &broken, patients_manifest(&["v_patients"]), CannedTransform::ok()).unwrap();
    assert!(report.exports.is_empty());
    assert!(report.export_failures[0].error.contains("disk full"));
    assert_eq!(broken.closes(), 1);
}

#[test]
fn empty_manifest_reaches_closed_without_work() {
    let dir = tempfile::tempdir().unwrap();
    let store = FakeStore::default();
    let transform = CannedTransform::ok();
    let calls = Rc::clone(&transform.calls);

    let report = fake_run(dir.path(), &store, Manifest::default(), transform).unwrap();
    assert_eq!(report.stage(), PipelineStage::Closed);
    assert!(report.reached(PipelineStage::Exported));
    assert!(report.tables.is_empty());
    assert_eq!(calls.get(), 0);
    assert_eq!(store.calls(), vec!["close"]);
}

#[derive(Clone, Default)]
struct RecordingRelay {
    downloads: Rc<std::cell::RefCell<Vec<String>>>,
    uploads: Rc<std::cell::RefCell<Vec<PathBuf>>>,
    reject_uploads: bool,
}

impl FileRelay for RecordingRelay {
    fn download(&mut self, file_name: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        self.downloads.borrow_mut().push(file_name.to_string());
        std::fs::create_dir_all(local_dir)?;
        let path = local_dir.join(file_name);
        std::fs::write(&path, "id;name\n1;Ana\n2;Bruno\n")?;
        Ok(path)
    }

    fn upload(&mut self, local_path: &Path) -> anyhow::Result<()> {
        if self.reject_uploads {
            anyhow::bail!("permission denied");
        }
        self.uploads.borrow_mut().push(local_path.to_path_buf());
        Ok(())
    }
}

#[test]
fn remote_run_fetches_inputs_and_publishes_exports() {
    let dir = tempfile::tempdir().unwrap();
    let store = FakeStore {
        views: vec!["v_patients".into()],
        ..FakeStore::default()
    };
    let relay = RecordingRelay::default();
    let config = resolved(dir.path(), Environment::Remote, duckdb_target(&dir.path().join("x.duckdb")));

    let report = Orchestrator::new(config, patients_manifest(&["v_patients"]), store.connector(), CannedTransform::ok())
        .with_relay(relay.clone())
        .with_export_date(export_date())
        .run()
        .unwrap();

    assert_eq!(*relay.downloads.borrow(), vec!["patients.csv"]);
    assert_eq!(report.rows_loaded(), 2);
    assert!(report.exports[0].published);
    assert_eq!(
        *relay.uploads.borrow(),
        vec![dir.path().join("output/v_patients_2026_10_14.csv")]
    );
}

#[test]
fn publish_failure_keeps_local_export() {
    let dir = tempfile::tempdir().unwrap();
    let store = FakeStore {
        views: vec!["v_patients".into()],
        ..FakeStore::default()
    };
    let relay = RecordingRelay {
        reject_uploads: true,
        ..RecordingRelay::default()
    };
    let config = resolved(dir.path(), Environment::Remote, duckdb_target(&dir.path().join("x.duckdb")));

    let report = Orchestrator::new(config, patients_manifest(&["v_patients"]), store.connector(), CannedTransform::ok())
        .with_relay(relay)
        .with_export_date(export_date())
        .run()
        .unwrap();

    assert_eq!(report.stage(), PipelineStage::Closed);
    assert_eq!(report.exports.len(), 1);
    assert!(!report.exports[0].published);
    assert!(report.exports[0].path.exists());
    assert!(report.export_failures[0].error.contains("permission denied"));
}
