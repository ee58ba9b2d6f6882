//! Storage backend trait definition.
//!
//! [`StoreBackend`] is the ingestion contract shared by the DuckDB and
//! Postgres backends. An open backend *is* the connection handle: it is
//! owned by one orchestrator for one run and released with
//! [`StoreBackend::close`].

use std::path::Path;

use chrono::{Local, NaiveDateTime, Timelike};
use strata_types::{BackendKind, IngestionRecord, TableDefinition};

use crate::error;
use crate::export::ExportDestination;

/// Outcome of a successful [`StoreBackend::load_rows`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReceipt {
    /// Rows committed to the target table.
    pub rows: u64,
    /// Timestamp shared by every row of the batch.
    pub ingested_at: NaiveDateTime,
}

/// Storage contract for one pipeline run.
///
/// Implementations must be `Send` so a handle can move into the thread that
/// drives the run; no method is ever called concurrently.
pub trait StoreBackend: Send {
    /// Engine behind this handle.
    fn kind(&self) -> BackendKind;

    /// Execute the table's DDL unless the table already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`](crate::StoreError::Schema) when the DDL
    /// fails for any reason other than the table already existing.
    fn ensure_table(&mut self, table: &TableDefinition) -> error::Result<()>;

    /// Replace the contents of `table` with `rows` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`](crate::StoreError::Load) when any row
    /// fails; nothing from the batch is committed in that case.
    fn load_rows(
        &mut self,
        table: &TableDefinition,
        rows: &[IngestionRecord],
    ) -> error::Result<LoadReceipt>;

    /// Append the rows just loaded into `table` to its history table,
    /// stamped with `ingested_at`. Returns the number of rows appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::History`](crate::StoreError::History) when the
    /// history table can't be created or extended, or when the appended row
    /// count differs from `row_count`.
    fn historize(
        &mut self,
        table: &TableDefinition,
        row_count: u64,
        ingested_at: NaiveDateTime,
    ) -> error::Result<u64>;

    /// Live row count of a table or view.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation doesn't exist or the query fails.
    fn row_count(&mut self, relation: &str) -> error::Result<u64>;

    /// Whether a table or view named `name` exists in the active schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    fn relation_exists(&mut self, name: &str) -> error::Result<bool>;

    /// Column names of `relation` in ordinal order; empty when it doesn't
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    fn column_names(&mut self, relation: &str) -> error::Result<Vec<String>>;

    /// Read every row of `relation` as text values.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation can't be read.
    fn fetch_rows(&mut self, relation: &str) -> error::Result<Vec<IngestionRecord>>;

    /// Write every row of `view` to a delimited file. Returns the data row
    /// count (header excluded).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Export`](crate::StoreError::Export) on query or
    /// file failure.
    fn export_view(&mut self, view: &str, destination: &ExportDestination) -> error::Result<u64>;

    /// Release engine-level locks so an external process can open the same
    /// store. The handle keeps its target and stays owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the session can't be shut down cleanly.
    fn detach(&mut self) -> error::Result<()>;

    /// Re-open a session released by [`detach`](Self::detach). No-op when
    /// the session is already open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`](crate::StoreError::Connection).
    fn reattach(&mut self) -> error::Result<()>;

    /// Release the session. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reports a failure while closing; the
    /// session is released either way.
    fn close(&mut self) -> error::Result<()>;

    /// Compare the live row count of `table` with `expected`.
    ///
    /// Never fails: a count that can't be read is reported as a mismatch.
    fn verify(&mut self, table: &TableDefinition, expected: u64) -> bool {
        match self.row_count(table.name()) {
            Ok(actual) if actual == expected => true,
            Ok(actual) => {
                tracing::warn!(
                    table = table.name(),
                    expected,
                    actual,
                    "Row count mismatch"
                );
                false
            }
            Err(e) => {
                tracing::warn!(table = table.name(), error = %e, "Row count unavailable");
                false
            }
        }
    }
}

/// Wall-clock timestamp for a load batch, truncated to microseconds so it
/// survives a round trip through either engine's `TIMESTAMP` type.
pub(crate) fn batch_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

/// Create the parent directory of `path` if it doesn't exist yet.
pub(crate) fn ensure_parent_dir(path: &Path) -> error::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
