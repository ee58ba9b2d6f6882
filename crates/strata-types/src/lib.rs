//! Shared strata data types.
//!
//! Pure data with no I/O: table descriptors read from the manifest, the
//! record shape handed to storage backends, and the environment/backend
//! selectors resolved from configuration.

#![warn(clippy::pedantic)]

pub mod environment;
pub mod record;
pub mod table;

pub use environment::{BackendKind, Environment, UnknownEnvironment};
pub use record::{IngestionRecord, Value};
pub use table::{history_table_name, TableDefinition, TableSource, HISTORY_TIMESTAMP_COLUMN};
