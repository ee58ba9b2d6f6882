//! `strata.yml` loading: parse, validate, resolve.

pub mod parser;
pub mod resolver;
pub mod types;
pub mod validator;

use std::path::Path;

pub use resolver::resolve;
pub use types::{
    DirectoriesConfig, ExportConfig, OutputsConfig, ProfileConfig, ProfileKind, ResolvedConfig,
    StrataConfig, TransformConfig, TransformSettings,
};

use crate::errors::ConfigError;

/// Read, validate and resolve the config file for one run.
///
/// # Errors
///
/// Returns the first [`ConfigError`] encountered; validation problems are
/// reported together.
pub fn load(path: &Path, environment: &str, profile: &str) -> Result<ResolvedConfig, ConfigError> {
    let config = parser::parse_config(path)?;
    validator::validate_config(&config, profile)?;
    resolve(&config, environment, profile)
}
