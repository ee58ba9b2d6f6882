//! DuckDB-backed implementation of [`StoreBackend`].
//!
//! One embedded database file per target. DuckDB holds an exclusive file
//! lock while a connection is open, which is why [`StoreBackend::detach`]
//! actually closes the session here.

use std::path::{Path, PathBuf};

use ::duckdb::{params_from_iter, AccessMode, Config, Connection};
use chrono::NaiveDateTime;
use pg_escape::quote_literal;
use strata_types::{BackendKind, IngestionRecord, TableDefinition};

use crate::backend::{batch_timestamp, ensure_parent_dir, LoadReceipt, StoreBackend};
use crate::error::{self, StoreError};
use crate::export::{ExportDestination, ExportWriter};
use crate::sql::{self, Column, Placeholders};

/// Text form bound into `CAST(? AS TIMESTAMP)`.
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Schema every DuckDB database starts with.
const DEFAULT_SCHEMA: &str = "main";

/// DuckDB-backed storage.
///
/// Create with [`DuckDbBackend::open`] for a file or
/// [`DuckDbBackend::in_memory`] for tests.
pub struct DuckDbBackend {
    /// `None` for in-memory databases, which can't be detached.
    path: Option<PathBuf>,
    schema: String,
    read_only: bool,
    conn: Option<Connection>,
}

impl DuckDbBackend {
    /// Open or create the database file at `path` and select `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created, or
    /// [`StoreError::Connection`] if the file can't be opened (for example
    /// because another process holds its lock).
    pub fn open(path: &Path, schema: &str) -> error::Result<Self> {
        ensure_parent_dir(path)?;
        if !path.exists() {
            tracing::info!(path = %path.display(), "Creating DuckDB database");
        }
        let conn = open_file(path, schema)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            schema: schema.to_string(),
            read_only: false,
            conn: Some(conn),
        })
    }

    /// Open an existing database file for reading only.
    ///
    /// Nothing is created: a missing file, directory or schema is an error
    /// and the session rejects writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the file doesn't exist, can't be
    /// opened, or lacks `schema`.
    pub fn open_read_only(path: &Path, schema: &str) -> error::Result<Self> {
        if !path.is_file() {
            return Err(StoreError::connection(format!(
                "DuckDB database '{}' does not exist",
                path.display()
            )));
        }
        let conn = open_file_read_only(path, schema)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            schema: schema.to_string(),
            read_only: true,
            conn: Some(conn),
        })
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if DuckDB can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::connection)?;
        Ok(Self {
            path: None,
            schema: DEFAULT_SCHEMA.to_string(),
            read_only: false,
            conn: Some(conn),
        })
    }

    /// Database file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn session(&mut self) -> error::Result<(&mut Connection, &str)> {
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;
        Ok((conn, &self.schema))
    }
}

fn open_file(path: &Path, schema: &str) -> error::Result<Connection> {
    let conn = Connection::open(path).map_err(StoreError::connection)?;
    init_schema(&conn, schema)?;
    Ok(conn)
}

fn open_file_read_only(path: &Path, schema: &str) -> error::Result<Connection> {
    let config = Config::default()
        .access_mode(AccessMode::ReadOnly)
        .map_err(StoreError::connection)?;
    let conn = Connection::open_with_flags(path, config).map_err(StoreError::connection)?;
    if schema != DEFAULT_SCHEMA {
        conn.execute_batch(&format!("SET schema = {};", quote_literal(schema)))
            .map_err(StoreError::connection)?;
    }
    Ok(conn)
}

fn init_schema(conn: &Connection, schema: &str) -> error::Result<()> {
    if schema == DEFAULT_SCHEMA {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS {}; SET schema = {};",
        sql::quote(schema),
        quote_literal(schema)
    ))
    .map_err(StoreError::connection)
}

fn relation_exists(conn: &Connection, schema: &str, name: &str) -> error::Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = ? AND table_name = ?",
            [schema, name],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::query(format!("look up '{name}'"), e))?;
    Ok(count > 0)
}

/// Live columns of `relation` in ordinal order; empty if it doesn't exist.
fn describe(conn: &Connection, schema: &str, relation: &str) -> error::Result<Vec<Column>> {
    let context = || format!("describe '{relation}'");
    let mut stmt = conn
        .prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
        )
        .map_err(|e| StoreError::query(context(), e))?;
    let columns = stmt
        .query_map([schema, relation], |row| {
            Ok(Column {
                name: row.get(0)?,
                data_type: row.get(1)?,
            })
        })
        .map_err(|e| StoreError::query(context(), e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::query(context(), e))?;
    Ok(columns)
}

fn read_text_rows(
    conn: &Connection,
    relation: &str,
    columns: &[Column],
) -> Result<Vec<Vec<Option<String>>>, ::duckdb::Error> {
    let mut stmt = conn.prepare(&sql::select_as_text(relation, columns))?;
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn to_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

impl StoreBackend for DuckDbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    fn ensure_table(&mut self, table: &TableDefinition) -> error::Result<()> {
        let (conn, schema) = self.session()?;
        let name = table.name();
        if relation_exists(conn, schema, name)? {
            tracing::debug!(table = name, "Table already exists");
            return Ok(());
        }
        match conn.execute_batch(table.ddl()) {
            Ok(()) => {}
            Err(e) if sql::is_already_exists(&e.to_string()) => {
                tracing::debug!(table = name, "Table created concurrently");
            }
            Err(e) => return Err(StoreError::schema(name, e)),
        }
        if !relation_exists(conn, schema, name)? {
            return Err(StoreError::schema(
                name,
                format!("DDL did not create table '{name}'"),
            ));
        }
        tracing::info!(table = name, "Table ready");
        Ok(())
    }

    fn load_rows(
        &mut self,
        table: &TableDefinition,
        rows: &[IngestionRecord],
    ) -> error::Result<LoadReceipt> {
        let (conn, schema) = self.session()?;
        let name = table.name();
        let columns = describe(conn, schema, name).map_err(|e| e.into_load(name))?;
        if columns.is_empty() {
            return Err(StoreError::load(name, format!("table '{name}' does not exist")));
        }

        let ingested_at = batch_timestamp();
        let tx = conn.transaction().map_err(|e| StoreError::load(name, e))?;
        tx.execute_batch(&sql::delete_all(name))
            .map_err(|e| StoreError::load(name, e))?;
        {
            let mut stmt = tx
                .prepare(&sql::insert_cast_row(name, &columns, Placeholders::Question))
                .map_err(|e| StoreError::load(name, e))?;
            for (i, row) in rows.iter().enumerate() {
                stmt.execute(params_from_iter(sql::bind_values(row, &columns)))
                    .map_err(|e| StoreError::load(name, format!("row {}: {e}", i + 1)))?;
            }
        }
        tx.commit().map_err(|e| StoreError::load(name, e))?;

        let receipt = LoadReceipt {
            rows: rows.len() as u64,
            ingested_at,
        };
        tracing::info!(table = name, rows = receipt.rows, "Rows loaded");
        Ok(receipt)
    }

    fn historize(
        &mut self,
        table: &TableDefinition,
        row_count: u64,
        ingested_at: NaiveDateTime,
    ) -> error::Result<u64> {
        let (conn, schema) = self.session()?;
        let name = table.name();
        let history = table.history_name();
        let tx = conn.transaction().map_err(|e| StoreError::history(name, e))?;

        tx.execute_batch(&sql::create_history_table(&history, name))
            .map_err(|e| StoreError::history(name, e))?;
        let table_cols = describe(&tx, schema, name).map_err(|e| e.into_history(name))?;
        let history_cols = describe(&tx, schema, &history).map_err(|e| e.into_history(name))?;
        for column in sql::missing_in_history(&table_cols, &history_cols) {
            tx.execute_batch(&sql::add_column(&history, column))
                .map_err(|e| StoreError::history(name, e))?;
            tracing::info!(table = %history, column = %column.name, "History column added");
        }

        let stamp = ingested_at.format(TIMESTAMP_FMT).to_string();
        let appended = tx
            .execute(
                &sql::append_history(&history, name, &table_cols, "CAST(? AS TIMESTAMP)"),
                [stamp],
            )
            .map_err(|e| StoreError::history(name, e))? as u64;
        if appended != row_count {
            return Err(StoreError::history(
                name,
                format!("appended {appended} rows to '{history}', expected {row_count}"),
            ));
        }
        tx.commit().map_err(|e| StoreError::history(name, e))?;

        tracing::info!(table = %history, rows = appended, "History appended");
        Ok(appended)
    }

    fn row_count(&mut self, relation: &str) -> error::Result<u64> {
        let (conn, _) = self.session()?;
        let count: i64 = conn
            .query_row(&sql::count_rows(relation), [], |row| row.get(0))
            .map_err(|e| StoreError::query(format!("count rows of '{relation}'"), e))?;
        Ok(to_count(count))
    }

    fn relation_exists(&mut self, name: &str) -> error::Result<bool> {
        let (conn, schema) = self.session()?;
        relation_exists(conn, schema, name)
    }

    fn column_names(&mut self, relation: &str) -> error::Result<Vec<String>> {
        let (conn, schema) = self.session()?;
        Ok(describe(conn, schema, relation)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    fn fetch_rows(&mut self, relation: &str) -> error::Result<Vec<IngestionRecord>> {
        let (conn, schema) = self.session()?;
        let columns = describe(conn, schema, relation)?;
        if columns.is_empty() {
            return Err(StoreError::query(
                format!("read '{relation}'"),
                "relation does not exist",
            ));
        }
        let rows = read_text_rows(conn, relation, &columns)
            .map_err(|e| StoreError::query(format!("read '{relation}'"), e))?;
        Ok(rows
            .into_iter()
            .map(|cells| sql::text_record(&columns, cells))
            .collect())
    }

    fn export_view(&mut self, view: &str, destination: &ExportDestination) -> error::Result<u64> {
        let (conn, schema) = self.session()?;
        let columns = describe(conn, schema, view).map_err(|e| StoreError::export(view, e))?;
        if columns.is_empty() {
            return Err(StoreError::export(view, format!("view '{view}' does not exist")));
        }
        let rows =
            read_text_rows(conn, view, &columns).map_err(|e| StoreError::export(view, e))?;
        let header: Vec<String> = columns.into_iter().map(|c| c.name).collect();
        let mut writer = ExportWriter::create(view, destination, &header)?;
        for row in &rows {
            writer.write_row(row)?;
        }
        writer.finish()
    }

    fn detach(&mut self) -> error::Result<()> {
        if self.path.is_none() {
            tracing::debug!("In-memory DuckDB stays attached");
            return Ok(());
        }
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::connection(e))?;
            tracing::debug!("DuckDB session detached");
        }
        Ok(())
    }

    fn reattach(&mut self) -> error::Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let Some(path) = self.path.as_deref() else {
            return Err(StoreError::NotConnected);
        };
        let conn = if self.read_only {
            open_file_read_only(path, &self.schema)?
        } else {
            open_file(path, &self.schema)?
        };
        self.conn = Some(conn);
        tracing::debug!("DuckDB session reattached");
        Ok(())
    }

    fn close(&mut self) -> error::Result<()> {
        // Clear the path so a closed handle can't be revived by `reattach`.
        self.path = None;
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| StoreError::connection(e)),
            None => Ok(()),
        }
    }
}
