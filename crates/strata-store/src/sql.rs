//! SQL text shared by both backends.
//!
//! DuckDB and Postgres agree on quoting, `CAST`, and `CREATE TABLE ... AS`;
//! they differ on bind placeholders, which [`Placeholders`] abstracts.

use pg_escape::quote_identifier;
use strata_types::{IngestionRecord, Value, HISTORY_TIMESTAMP_COLUMN};

/// A live column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Column {
    pub name: String,
    pub data_type: String,
}

/// Bind placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placeholders {
    /// DuckDB `?`.
    Question,
    /// Postgres `$1, $2, ...`. Text binds need an explicit `::text` so the
    /// server doesn't infer the cast target as the parameter type.
    Dollar,
}

impl Placeholders {
    fn text_param(self, index: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${index}::text"),
        }
    }
}

pub(crate) fn quote(name: &str) -> String {
    quote_identifier(name).to_string()
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a Column>) -> String {
    columns
        .into_iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT` binding one text parameter per column, cast to the column type.
pub(crate) fn insert_cast_row(table: &str, columns: &[Column], params: Placeholders) -> String {
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("CAST({} AS {})", params.text_param(i + 1), c.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({values})",
        quote(table),
        column_list(columns)
    )
}

/// Empty copy of `table` plus the timestamp column; no-op if it exists.
pub(crate) fn create_history_table(history: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} AS SELECT *, CAST(NULL AS TIMESTAMP) AS {} FROM {} LIMIT 0",
        quote(history),
        quote(HISTORY_TIMESTAMP_COLUMN),
        quote(table)
    )
}

pub(crate) fn add_column(table: &str, column: &Column) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(&column.name),
        column.data_type
    )
}

/// Copy `columns` from `table` into `history`, stamping each row with the
/// bound timestamp expression.
pub(crate) fn append_history(
    history: &str,
    table: &str,
    columns: &[Column],
    timestamp_expr: &str,
) -> String {
    let cols = column_list(columns);
    format!(
        "INSERT INTO {} ({cols}, {}) SELECT {cols}, {timestamp_expr} FROM {}",
        quote(history),
        quote(HISTORY_TIMESTAMP_COLUMN),
        quote(table)
    )
}

/// Every column rendered as text, in catalog order.
pub(crate) fn select_as_text(relation: &str, columns: &[Column]) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("CAST({} AS TEXT)", quote(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {cols} FROM {}", quote(relation))
}

pub(crate) fn count_rows(relation: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote(relation))
}

pub(crate) fn delete_all(table: &str) -> String {
    format!("DELETE FROM {}", quote(table))
}

/// Columns of `table` that the history table lacks.
pub(crate) fn missing_in_history<'a>(table: &'a [Column], history: &[Column]) -> Vec<&'a Column> {
    table
        .iter()
        .filter(|c| !history.iter().any(|h| h.name == c.name))
        .collect()
}

/// Bind text for each column of `row`, in column order.
///
/// Catalog names may keep the DDL's casing while records carry normalized
/// lower-case keys, so an exact miss falls back to the lower-cased name.
pub(crate) fn bind_values(row: &IngestionRecord, columns: &[Column]) -> Vec<Option<String>> {
    columns
        .iter()
        .map(|c| {
            row.get(&c.name)
                .or_else(|| row.get(&c.name.to_lowercase()))
                .and_then(Value::to_sql_text)
        })
        .collect()
}

/// Build a text-valued record from one fetched row.
pub(crate) fn text_record(columns: &[Column], cells: Vec<Option<String>>) -> IngestionRecord {
    columns
        .iter()
        .zip(cells)
        .map(|(c, cell)| (c.name.clone(), Value::from(cell)))
        .collect()
}

/// Case-insensitive "already exists" detection for catalog errors.
pub(crate) fn is_already_exists(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already exists")
}
