//! Table manifest loading.
//!
//! A manifest lists the tables a profile ingests and the views it exports:
//!
//! ```yaml
//! tables:
//!   - name: patients            # DDL read from {create_table_sql}/patients.sql
//!   - name: visits
//!     ddl: visits_v2.sql
//!     csv: visites              # {input}/visites.csv
//!   - name: establishments
//!     staging_table: etab       # copied from the upstream store
//!     export: true              # exported as establishments_{YYYY_MM_DD}.csv
//! views:
//!   - view: v_patients          # exported as v_patients_{YYYY_MM_DD}.csv
//!   - view: v_visits_by_month
//!     radical: visits_monthly
//! ```
//!
//! Table names must be lower case: unquoted identifiers in the DDL fold to
//! lower case on Postgres, while the loader always quotes the manifest name.
//! Tables flagged `export` are written out before the views, under their own
//! name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strata_types::{TableDefinition, TableSource};

use crate::config::ProfileKind;
use crate::errors::ConfigError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDoc {
    #[serde(default)]
    tables: Vec<TableEntry>,
    #[serde(default)]
    views: Vec<ViewEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableEntry {
    name: String,
    #[serde(default)]
    ddl: Option<PathBuf>,
    #[serde(default)]
    csv: Option<String>,
    #[serde(default)]
    staging_table: Option<String>,
    #[serde(default)]
    export: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ViewEntry {
    view: String,
    #[serde(default)]
    radical: Option<String>,
}

/// A view to export after the transform step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewExport {
    pub view: String,
    /// File name stem; the run date is appended.
    pub radical: String,
}

impl ViewExport {
    /// `{radical}_{YYYY_MM_DD}.csv`
    #[must_use]
    pub fn file_name(&self, date: chrono::NaiveDate) -> String {
        format!("{}_{}.csv", self.radical, date.format("%Y_%m_%d"))
    }
}

/// Tables and views of one profile, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub tables: Vec<TableDefinition>,
    pub views: Vec<ViewExport>,
}

impl Manifest {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Load the manifest at `path`, reading each table's DDL from `ddl_dir`.
///
/// Tables without an explicit source read `{name}.csv` in staging profiles
/// and copy the upstream table of the same name in project profiles.
///
/// # Errors
///
/// Returns [`ConfigError`] if the manifest or a DDL file can't be read, the
/// YAML is invalid, or entries are inconsistent.
pub fn load_manifest(
    path: &Path,
    ddl_dir: &Path,
    kind: ProfileKind,
) -> Result<Manifest, ConfigError> {
    let content = read(path)?;
    let doc: ManifestDoc = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut tables = Vec::with_capacity(doc.tables.len());
    let mut views = Vec::new();
    for entry in doc.tables {
        if entry.name.trim().is_empty() {
            errors.push("Table entry has an empty name".to_string());
            continue;
        }
        if entry.name != entry.name.to_lowercase() {
            errors.push(format!(
                "Table '{}' must be lower case to match its unquoted DDL name",
                entry.name
            ));
            continue;
        }
        if !seen.insert(entry.name.clone()) {
            errors.push(format!("Table '{}' is declared more than once", entry.name));
            continue;
        }
        let source = match (entry.csv, entry.staging_table, kind) {
            (Some(_), Some(_), _) => {
                errors.push(format!(
                    "Table '{}' sets both csv and staging_table",
                    entry.name
                ));
                continue;
            }
            (Some(csv), None, _) => TableSource::Csv(csv),
            (None, Some(_), ProfileKind::Staging) => {
                errors.push(format!(
                    "Table '{}' copies from staging but the profile has no upstream",
                    entry.name
                ));
                continue;
            }
            (None, Some(upstream), ProfileKind::Project) => TableSource::Staging(upstream),
            (None, None, ProfileKind::Staging) => TableSource::Csv(entry.name.clone()),
            (None, None, ProfileKind::Project) => TableSource::Staging(entry.name.clone()),
        };
        let ddl_path = ddl_dir.join(
            entry
                .ddl
                .unwrap_or_else(|| PathBuf::from(format!("{}.sql", entry.name))),
        );
        let ddl = read(&ddl_path)?;
        if entry.export {
            views.push(ViewExport {
                view: entry.name.clone(),
                radical: entry.name.clone(),
            });
        }
        tables.push(TableDefinition::new(entry.name, ddl, source));
    }

    let mut seen_views: HashSet<String> = views.iter().map(|v| v.view.clone()).collect();
    for entry in doc.views {
        if !seen_views.insert(entry.view.clone()) {
            errors.push(format!("View '{}' is declared more than once", entry.view));
            continue;
        }
        let radical = entry.radical.unwrap_or_else(|| entry.view.clone());
        views.push(ViewExport {
            view: entry.view,
            radical,
        });
    }

    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors));
    }
    tracing::info!(
        manifest = %path.display(),
        tables = tables.len(),
        views = views.len(),
        "Manifest loaded"
    );
    Ok(Manifest { tables, views })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
