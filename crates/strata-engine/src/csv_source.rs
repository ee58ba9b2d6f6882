//! CSV input: delimiter sniffing, header normalization, row parsing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use strata_types::{IngestionRecord, Value};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Delimiters tried by [`sniff_delimiter`], in tie-break order.
pub const DELIMITER_CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];

const BOM: char = '\u{feff}';

/// A parsed CSV file with normalized column names.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub path: PathBuf,
    pub delimiter: u8,
    pub columns: Vec<String>,
    pub rows: Vec<IngestionRecord>,
}

/// Pick the candidate delimiter occurring most often in `header_line`.
///
/// Ties go to the earlier candidate; a line with none of them is treated as
/// a single comma-separated column.
#[must_use]
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut best = (b',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Normalize a header to a column name: accents stripped, lower-cased, every
/// run of non-alphanumerics collapsed to one `_`, no leading/trailing `_`.
///
/// `"Date de naissance"` becomes `date_de_naissance`, `"N° Étab."` becomes
/// `n_etab`.
#[must_use]
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Columns of the CSV that the target table doesn't have.
#[must_use]
pub fn unknown_columns<'a>(csv_columns: &'a [String], table_columns: &[String]) -> Vec<&'a str> {
    csv_columns
        .iter()
        .filter(|c| !table_columns.iter().any(|t| t.eq_ignore_ascii_case(c)))
        .map(String::as_str)
        .collect()
}

/// Read and parse a CSV file.
///
/// Empty fields become [`Value::Null`]; every other field is kept as text
/// and cast by the store to the column type.
///
/// # Errors
///
/// Returns an error if the file can't be read, is empty, has blank or
/// duplicate headers after normalization, or has a row whose field count
/// differs from the header.
pub fn read_csv(path: &Path) -> Result<CsvTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    parse_csv(&content, path)
}

fn parse_csv(content: &str, path: &Path) -> Result<CsvTable> {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let Some(header_line) = content.lines().find(|l| !l.trim().is_empty()) else {
        bail!("CSV file is empty: {}", path.display());
    };
    let delimiter = sniff_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers: {}", path.display()))?;
    let columns: Vec<String> = headers.iter().map(normalize_header).collect();

    let mut seen = HashSet::new();
    for (raw, column) in headers.iter().zip(&columns) {
        if column.is_empty() {
            bail!("CSV header '{raw}' normalizes to an empty name");
        }
        if !seen.insert(column.as_str()) {
            bail!("CSV header '{raw}' duplicates column '{column}' after normalization");
        }
    }

    let mut rows: Vec<IngestionRecord> = Vec::new();
    for record in reader.records() {
        let record = record
            .with_context(|| format!("Failed to read CSV record: {}", path.display()))?;
        let row: IngestionRecord = columns
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::from(cell)
                };
                (column.clone(), value)
            })
            .collect();
        rows.push(row);
    }

    tracing::debug!(
        path = %path.display(),
        delimiter = %char::from(delimiter).escape_default(),
        columns = columns.len(),
        rows = rows.len(),
        "CSV parsed"
    );
    Ok(CsvTable {
        path: path.to_path_buf(),
        delimiter,
        columns,
        rows,
    })
}
