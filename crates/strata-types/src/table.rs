//! Table descriptors loaded from a profile manifest.

use serde::{Deserialize, Serialize};

/// Column appended to every history table.
pub const HISTORY_TIMESTAMP_COLUMN: &str = "date_ingestion";

/// Name of the append-only history table shadowing `table`.
#[must_use]
pub fn history_table_name(table: &str) -> String {
    format!("z{table}")
}

/// Where a table's rows come from during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    /// Parse `{input_dir}/{name}.csv`.
    Csv(String),
    /// Copy the named table from the upstream staging store.
    Staging(String),
}

/// Immutable description of one target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    name: String,
    ddl: String,
    source: TableSource,
}

impl TableDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, ddl: impl Into<String>, source: TableSource) -> Self {
        Self {
            name: name.into(),
            ddl: ddl.into(),
            source,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw `CREATE TABLE` text, executed verbatim.
    #[must_use]
    pub fn ddl(&self) -> &str {
        &self.ddl
    }

    #[must_use]
    pub fn source(&self) -> &TableSource {
        &self.source
    }

    #[must_use]
    pub fn history_name(&self) -> String {
        history_table_name(&self.name)
    }
}
