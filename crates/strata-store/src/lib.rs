//! Storage backends for the strata pipeline.
//!
//! Provides the [`StoreBackend`] trait with a [`DuckDbBackend`] for local
//! single-file databases and a [`PostgresBackend`] for the managed server.
//! [`connect`] is the single dispatch point from a resolved
//! [`BackendTarget`] to an open handle; [`connect_read_only`] is its
//! counterpart for upstream stores.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod duckdb;
pub mod error;
pub mod export;
pub mod postgres;
pub(crate) mod sql;
pub mod target;

pub use backend::{LoadReceipt, StoreBackend};
pub use self::duckdb::DuckDbBackend;
pub use error::{Result as StoreResult, StoreError};
pub use export::ExportDestination;
pub use self::postgres::PostgresBackend;
pub use target::{connect, connect_read_only, BackendTarget, DuckDbTarget, PostgresTarget};
