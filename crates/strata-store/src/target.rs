//! Connection targets and backend dispatch.

use std::path::PathBuf;

use serde::Deserialize;
use strata_types::BackendKind;

use crate::backend::StoreBackend;
use crate::duckdb::DuckDbBackend;
use crate::error;
use crate::postgres::PostgresBackend;

/// Embedded DuckDB file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DuckDbTarget {
    pub path: PathBuf,
    #[serde(default = "default_duckdb_schema")]
    pub schema: String,
}

/// Networked Postgres server.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,
    #[serde(default = "default_pg_schema")]
    pub schema: String,
    /// Transport-level connect timeout; unset means the driver default.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for PostgresTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("schema", &self.schema)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_duckdb_schema() -> String {
    "main".to_string()
}

fn default_pg_schema() -> String {
    "public".to_string()
}

fn default_port() -> u16 {
    5432
}

/// A resolved storage target, as written under a profile's `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendTarget {
    #[serde(rename = "duckdb")]
    DuckDb(DuckDbTarget),
    Postgres(PostgresTarget),
}

impl BackendTarget {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::DuckDb(_) => BackendKind::DuckDb,
            Self::Postgres(_) => BackendKind::Postgres,
        }
    }

    /// Human-readable location for logs (never includes credentials).
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::DuckDb(t) => format!("duckdb:{} (schema {})", t.path.display(), t.schema),
            Self::Postgres(t) => format!(
                "postgres:{}:{}/{} (schema {})",
                t.host, t.port, t.dbname, t.schema
            ),
        }
    }
}

/// Open a session against `target`.
///
/// This is the only place that chooses a concrete backend; callers hold the
/// returned handle for the whole run.
///
/// # Errors
///
/// Returns [`StoreError::Connection`](crate::StoreError::Connection) when the
/// store is unreachable, or [`StoreError::Io`](crate::StoreError::Io) when the
/// DuckDB directory can't be created.
pub fn connect(target: &BackendTarget) -> error::Result<Box<dyn StoreBackend>> {
    tracing::info!(target = %target.describe(), "Connecting to store");
    match target {
        BackendTarget::DuckDb(t) => Ok(Box::new(DuckDbBackend::open(&t.path, &t.schema)?)),
        BackendTarget::Postgres(t) => Ok(Box::new(PostgresBackend::open(t)?)),
    }
}

/// Open a read-only session against `target`, for reading an upstream store.
///
/// Unlike [`connect`] this never creates a DuckDB file, directory or schema.
///
/// # Errors
///
/// Returns [`StoreError::Connection`](crate::StoreError::Connection) when the
/// store is unreachable or the DuckDB file doesn't exist.
pub fn connect_read_only(target: &BackendTarget) -> error::Result<Box<dyn StoreBackend>> {
    tracing::info!(target = %target.describe(), "Connecting to store read-only");
    match target {
        BackendTarget::DuckDb(t) => Ok(Box::new(DuckDbBackend::open_read_only(
            &t.path, &t.schema,
        )?)),
        BackendTarget::Postgres(t) => Ok(Box::new(PostgresBackend::open_read_only(t)?)),
    }
}
