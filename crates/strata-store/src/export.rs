//! Delimited-file writer shared by the `export_view` implementations.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::backend::ensure_parent_dir;
use crate::error::{self, StoreError};

/// Where and how a view is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDestination {
    pub path: PathBuf,
    pub delimiter: u8,
}

impl ExportDestination {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }
}

/// Streams rows into `<path>.part` and renames over `path` on
/// [`finish`](Self::finish), so a failed export never leaves a truncated
/// artifact under the final name.
pub(crate) struct ExportWriter {
    view: String,
    writer: csv::Writer<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    rows: u64,
}

impl ExportWriter {
    pub(crate) fn create(
        view: &str,
        destination: &ExportDestination,
        header: &[String],
    ) -> error::Result<Self> {
        ensure_parent_dir(&destination.path).map_err(|e| StoreError::export(view, e.to_string()))?;
        let part_path = part_path(&destination.path);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(destination.delimiter)
            .from_path(&part_path)
            .map_err(|e| StoreError::export(view, e))?;
        writer
            .write_record(header)
            .map_err(|e| StoreError::export(view, e))?;
        Ok(Self {
            view: view.to_string(),
            writer,
            part_path,
            final_path: destination.path.clone(),
            rows: 0,
        })
    }

    /// `NULL` cells are written as empty fields.
    pub(crate) fn write_row(&mut self, cells: &[Option<String>]) -> error::Result<()> {
        self.writer
            .write_record(cells.iter().map(|c| c.as_deref().unwrap_or("")))
            .map_err(|e| StoreError::export(&self.view, e))?;
        self.rows += 1;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> error::Result<u64> {
        self.writer
            .flush()
            .map_err(|e| StoreError::export(&self.view, e))?;
        drop(self.writer);
        std::fs::rename(&self.part_path, &self.final_path)
            .map_err(|e| StoreError::export(&self.view, e))?;
        tracing::info!(
            view = self.view,
            rows = self.rows,
            path = %self.final_path.display(),
            "View exported"
        );
        Ok(self.rows)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
