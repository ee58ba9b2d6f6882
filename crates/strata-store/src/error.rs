//! Storage backend error types.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by [`StoreBackend`](crate::StoreBackend) operations.
///
/// Variants follow the operation that failed so the orchestrator can report
/// the failing stage without inspecting driver errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session could not be opened (or re-opened).
    #[error("connection failed: {0}")]
    Connection(#[source] BoxError),

    /// DDL execution failed for a reason other than "already exists".
    #[error("schema error on '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: BoxError,
    },

    /// Row insertion failed; the batch was rolled back.
    #[error("load error on '{table}': {source}")]
    Load {
        table: String,
        #[source]
        source: BoxError,
    },

    /// Appending to the history table failed.
    #[error("history error on '{table}': {source}")]
    History {
        table: String,
        #[source]
        source: BoxError,
    },

    /// Writing a view to disk failed.
    #[error("export error on '{view}': {source}")]
    Export {
        view: String,
        #[source]
        source: BoxError,
    },

    /// Read-side query failure outside the operations above.
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: BoxError,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The handle was closed or detached.
    #[error("connection is not open")]
    NotConnected,
}

impl StoreError {
    pub(crate) fn connection(e: impl Into<BoxError>) -> Self {
        Self::Connection(e.into())
    }

    pub(crate) fn schema(table: &str, e: impl Into<BoxError>) -> Self {
        Self::Schema {
            table: table.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn load(table: &str, e: impl Into<BoxError>) -> Self {
        Self::Load {
            table: table.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn history(table: &str, e: impl Into<BoxError>) -> Self {
        Self::History {
            table: table.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn export(view: &str, e: impl Into<BoxError>) -> Self {
        Self::Export {
            view: view.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn query(context: impl Into<String>, e: impl Into<BoxError>) -> Self {
        Self::Query {
            context: context.into(),
            source: e.into(),
        }
    }

    /// Re-tag a lower-level failure as a history error, keeping its message.
    pub(crate) fn into_history(self, table: &str) -> Self {
        match self {
            e @ Self::History { .. } => e,
            other => Self::history(table, other.to_string()),
        }
    }

    /// Re-tag a lower-level failure as a load error, keeping its message.
    pub(crate) fn into_load(self, table: &str) -> Self {
        match self {
            e @ Self::Load { .. } => e,
            other => Self::load(table, other.to_string()),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
