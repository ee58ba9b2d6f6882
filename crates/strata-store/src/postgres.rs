//! `PostgreSQL`-backed implementation of [`StoreBackend`].
//!
//! Uses the sync `postgres` crate with one owned [`Client`]. Every session
//! pins `search_path` to the target schema, so table names stay unqualified
//! in generated SQL.

use std::time::Duration;

use ::postgres::error::SqlState;
use ::postgres::types::ToSql;
use ::postgres::{Client, Config, GenericClient, NoTls};
use chrono::NaiveDateTime;
use strata_types::{BackendKind, IngestionRecord, TableDefinition};

use crate::backend::{batch_timestamp, LoadReceipt, StoreBackend};
use crate::error::{self, StoreError};
use crate::export::{ExportDestination, ExportWriter};
use crate::sql::{self, Column, Placeholders};
use crate::target::PostgresTarget;

/// `PostgreSQL`-backed storage.
pub struct PostgresBackend {
    schema: String,
    client: Option<Client>,
}

impl PostgresBackend {
    /// Connect using a resolved profile target.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the server is unreachable, the
    /// credentials are rejected, or the schema can't be prepared.
    pub fn open(target: &PostgresTarget) -> error::Result<Self> {
        Self::open_with_config(&driver_config(target), &target.schema)
    }

    /// Connect for reading only.
    ///
    /// The schema is selected but never created, and every transaction in
    /// the session defaults to read-only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the server is unreachable or
    /// the credentials are rejected.
    pub fn open_read_only(target: &PostgresTarget) -> error::Result<Self> {
        let mut client = driver_config(target)
            .connect(NoTls)
            .map_err(StoreError::connection)?;
        client
            .batch_execute(&format!(
                "SET search_path TO {}; SET default_transaction_read_only = on;",
                sql::quote(&target.schema)
            ))
            .map_err(StoreError::connection)?;
        Ok(Self {
            schema: target.schema.clone(),
            client: Some(client),
        })
    }

    /// Connect with an explicit driver config.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] on any connect or setup failure.
    pub fn open_with_config(config: &Config, schema: &str) -> error::Result<Self> {
        let mut client = config.connect(NoTls).map_err(StoreError::connection)?;
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}; SET search_path TO {};",
                sql::quote(schema),
                sql::quote(schema)
            ))
            .map_err(StoreError::connection)?;
        Ok(Self {
            schema: schema.to_string(),
            client: Some(client),
        })
    }

    fn session(&mut self) -> error::Result<(&mut Client, &str)> {
        let client = self.client.as_mut().ok_or(StoreError::NotConnected)?;
        Ok((client, &self.schema))
    }
}

fn driver_config(target: &PostgresTarget) -> Config {
    let mut config = Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .user(&target.user)
        .password(&target.password)
        .dbname(&target.dbname);
    if let Some(secs) = target.connect_timeout_secs {
        config.connect_timeout(Duration::from_secs(secs));
    }
    config
}

fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", sql::quote(schema), sql::quote(name))
}

fn relation_exists(
    client: &mut impl GenericClient,
    schema: &str,
    name: &str,
) -> error::Result<bool> {
    let row = client
        .query_one(
            "SELECT to_regclass($1::text) IS NOT NULL",
            &[&qualified(schema, name)],
        )
        .map_err(|e| StoreError::query(format!("look up '{name}'"), e))?;
    Ok(row.get(0))
}

/// Live columns of `relation` in ordinal order; empty if it doesn't exist.
fn describe(
    client: &mut impl GenericClient,
    schema: &str,
    relation: &str,
) -> error::Result<Vec<Column>> {
    let rows = client
        .query(
            "SELECT a.attname, format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1::text) AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            &[&qualified(schema, relation)],
        )
        .map_err(|e| StoreError::query(format!("describe '{relation}'"), e))?;
    Ok(rows
        .iter()
        .map(|row| Column {
            name: row.get(0),
            data_type: row.get(1),
        })
        .collect())
}

fn read_text_rows(
    client: &mut Client,
    relation: &str,
    columns: &[Column],
) -> Result<Vec<Vec<Option<String>>>, ::postgres::Error> {
    let rows = client.query(&sql::select_as_text(relation, columns), &[])?;
    Ok(rows
        .iter()
        .map(|row| (0..columns.len()).map(|i| row.get(i)).collect())
        .collect())
}

fn is_duplicate_table(e: &::postgres::Error) -> bool {
    e.code() == Some(&SqlState::DUPLICATE_TABLE) || sql::is_already_exists(&e.to_string())
}

impl StoreBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn ensure_table(&mut self, table: &TableDefinition) -> error::Result<()> {
        let (client, schema) = self.session()?;
        let name = table.name();
        if relation_exists(client, schema, name)? {
            tracing::debug!(table = name, "Table already exists");
            return Ok(());
        }
        match client.batch_execute(table.ddl()) {
            Ok(()) => {}
            Err(e) if is_duplicate_table(&e) => {
                tracing::debug!(table = name, "Table created concurrently");
            }
            Err(e) => return Err(StoreError::schema(name, e)),
        }
        if !relation_exists(client, schema, name)? {
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
        let (client, schema) = self.session()?;
        let name = table.name();
        let columns = describe(client, schema, name).map_err(|e| e.into_load(name))?;
        if columns.is_empty() {
            return Err(StoreError::load(name, format!("table '{name}' does not exist")));
        }

        let ingested_at = batch_timestamp();
        let mut tx = client.transaction().map_err(|e| StoreError::load(name, e))?;
        tx.batch_execute(&sql::delete_all(name))
            .map_err(|e| StoreError::load(name, e))?;
        let stmt = tx
            .prepare(&sql::insert_cast_row(name, &columns, Placeholders::Dollar))
            .map_err(|e| StoreError::load(name, e))?;
        for (i, row) in rows.iter().enumerate() {
            let values = sql::bind_values(row, &columns);
            let params: Vec<&(dyn ToSql + Sync)> =
                values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            tx.execute(&stmt, &params)
                .map_err(|e| StoreError::load(name, format!("row {}: {e}", i + 1)))?;
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
        let (client, schema) = self.session()?;
        let name = table.name();
        let history = table.history_name();
        let mut tx = client
            .transaction()
            .map_err(|e| StoreError::history(name, e))?;

        tx.batch_execute(&sql::create_history_table(&history, name))
            .map_err(|e| StoreError::history(name, e))?;
        let table_cols = describe(&mut tx, schema, name).map_err(|e| e.into_history(name))?;
        let history_cols =
            describe(&mut tx, schema, &history).map_err(|e| e.into_history(name))?;
        for column in sql::missing_in_history(&table_cols, &history_cols) {
            tx.batch_execute(&sql::add_column(&history, column))
                .map_err(|e| StoreError::history(name, e))?;
            tracing::info!(table = %history, column = %column.name, "History column added");
        }

        let appended = tx
            .execute(
                &sql::append_history(&history, name, &table_cols, "$1::timestamp"),
                &[&ingested_at],
            )
            .map_err(|e| StoreError::history(name, e))?;
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
        let (client, _) = self.session()?;
        let row = client
            .query_one(&sql::count_rows(relation), &[])
            .map_err(|e| StoreError::query(format!("count rows of '{relation}'"), e))?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn relation_exists(&mut self, name: &str) -> error::Result<bool> {
        let (client, schema) = self.session()?;
        relation_exists(client, schema, name)
    }

    fn column_names(&mut self, relation: &str) -> error::Result<Vec<String>> {
        let (client, schema) = self.session()?;
        Ok(describe(client, schema, relation)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    fn fetch_rows(&mut self, relation: &str) -> error::Result<Vec<IngestionRecord>> {
        let (client, schema) = self.session()?;
        let columns = describe(client, schema, relation)?;
        if columns.is_empty() {
            return Err(StoreError::query(
                format!("read '{relation}'"),
                "relation does not exist",
            ));
        }
        let rows = read_text_rows(client, relation, &columns)
            .map_err(|e| StoreError::query(format!("read '{relation}'"), e))?;
        Ok(rows
            .into_iter()
            .map(|cells| sql::text_record(&columns, cells))
            .collect())
    }

    fn export_view(&mut self, view: &str, destination: &ExportDestination) -> error::Result<u64> {
        let (client, schema) = self.session()?;
        let columns = describe(client, schema, view).map_err(|e| StoreError::export(view, e))?;
        if columns.is_empty() {
            return Err(StoreError::export(view, format!("view '{view}' does not exist")));
        }
        let rows =
            read_text_rows(client, view, &columns).map_err(|e| StoreError::export(view, e))?;
        let header: Vec<String> = columns.into_iter().map(|c| c.name).collect();
        let mut writer = ExportWriter::create(view, destination, &header)?;
        for row in &rows {
            writer.write_row(row)?;
        }
        writer.finish()
    }

    fn detach(&mut self) -> error::Result<()> {
        // The server arbitrates concurrent sessions; nothing to release.
        Ok(())
    }

    fn reattach(&mut self) -> error::Result<()> {
        if self.client.is_some() {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn close(&mut self) -> error::Result<()> {
        match self.client.take() {
            Some(client) => client.close().map_err(StoreError::connection),
            None => Ok(()),
        }
    }
}
