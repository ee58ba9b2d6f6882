//! Resolve (environment, profile) against a config document.

use strata_types::Environment;

use crate::config::types::{ProfileKind, ResolvedConfig, StrataConfig, TransformSettings};
use crate::config::validator::delimiter_byte;
use crate::errors::ConfigError;

/// Build the runtime configuration for one run.
///
/// Pure: reads nothing beyond `config`. Paths are returned as written.
///
/// # Errors
///
/// Returns [`ConfigError`] when the environment name is not recognized, the
/// profile has no section, the profile has no output for the environment, or
/// a project profile's upstream can't supply one.
pub fn resolve(
    config: &StrataConfig,
    environment: &str,
    profile: &str,
) -> Result<ResolvedConfig, ConfigError> {
    let environment: Environment = environment.parse()?;
    let section = config
        .profiles
        .get(profile)
        .ok_or_else(|| ConfigError::UnknownProfile {
            name: profile.to_string(),
            available: config.profiles.keys().cloned().collect(),
        })?;

    let target = section
        .outputs
        .get(environment)
        .cloned()
        .ok_or_else(|| ConfigError::MissingOutput {
            profile: profile.to_string(),
            environment,
        })?;

    let upstream = match (section.kind, section.upstream.as_deref()) {
        (ProfileKind::Staging, _) => None,
        (ProfileKind::Project, None) => {
            return Err(ConfigError::MissingUpstream {
                profile: profile.to_string(),
                upstream: String::new(),
                reason: "no upstream configured".to_string(),
            })
        }
        (ProfileKind::Project, Some(name)) => {
            let up = config
                .profiles
                .get(name)
                .ok_or_else(|| ConfigError::MissingUpstream {
                    profile: profile.to_string(),
                    upstream: name.to_string(),
                    reason: "no such profile".to_string(),
                })?;
            let target =
                up.outputs
                    .get(environment)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingUpstream {
                        profile: profile.to_string(),
                        upstream: name.to_string(),
                        reason: format!("no output for environment '{environment}'"),
                    })?;
            Some(target)
        }
    };

    let export_delimiter = delimiter_byte(&section.export.delimiter).ok_or_else(|| {
        ConfigError::Invalid(vec![format!(
            "Profile '{profile}': export delimiter '{}' must be a single ASCII character",
            section.export.delimiter
        )])
    })?;

    let dirs = &section.directories;
    let transform = TransformSettings {
        executable: config.transform.executable.clone(),
        project_dir: dirs.models.clone(),
        profiles_dir: config.transform.profiles_dir.clone(),
        profile: section
            .dbt_profile
            .clone()
            .unwrap_or_else(|| profile.to_string()),
        target: environment.as_str().to_string(),
        select: format!("+{}", dirs.models.display()),
    };

    tracing::debug!(
        profile,
        environment = %environment,
        target = %target.describe(),
        "Configuration resolved"
    );

    Ok(ResolvedConfig {
        environment,
        profile: profile.to_string(),
        kind: section.kind,
        target,
        upstream,
        manifest_path: section.manifest.clone(),
        input_dir: dirs.input.clone(),
        output_dir: dirs.output.clone(),
        create_table_sql_dir: dirs.create_table_sql.clone(),
        export_delimiter,
        transform,
    })
}
