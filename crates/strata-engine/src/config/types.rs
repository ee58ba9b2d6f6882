//! Configuration document types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use strata_store::BackendTarget;
use strata_types::Environment;

/// Top-level `strata.yml` document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// Settings for the external SQL-view build tool, shared by all profiles.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Directory holding the tool's `profiles.yml`.
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            profiles_dir: default_profiles_dir(),
        }
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("dbt")
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Whether a profile ingests CSVs itself or derives from an upstream store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Staging,
    Project,
}

/// One named profile section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub kind: ProfileKind,
    /// Profile whose output (same environment) is copied from.
    #[serde(default)]
    pub upstream: Option<String>,
    /// Table manifest for this profile.
    pub manifest: PathBuf,
    pub directories: DirectoriesConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// Tool-side profile name; defaults to the profile's own name.
    #[serde(default)]
    pub dbt_profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoriesConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub create_table_sql: PathBuf,
    /// Transform project directory; also the `--select` root.
    pub models: PathBuf,
}

/// Storage target per environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsConfig {
    #[serde(default)]
    pub local: Option<BackendTarget>,
    #[serde(default)]
    pub remote: Option<BackendTarget>,
}

impl OutputsConfig {
    #[must_use]
    pub fn get(&self, environment: Environment) -> Option<&BackendTarget> {
        match environment {
            Environment::Local => self.local.as_ref(),
            Environment::Remote => self.remote.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

fn default_delimiter() -> String {
    ";".to_string()
}

/// Everything one run needs, resolved for a single environment and profile.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub environment: Environment,
    pub profile: String,
    pub kind: ProfileKind,
    pub target: BackendTarget,
    /// Staging store to copy from (project profiles only).
    pub upstream: Option<BackendTarget>,
    pub manifest_path: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub create_table_sql_dir: PathBuf,
    pub export_delimiter: u8,
    pub transform: TransformSettings,
}

/// Resolved invocation settings for the transform tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSettings {
    pub executable: PathBuf,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub profile: String,
    pub target: String,
    pub select: String,
}
