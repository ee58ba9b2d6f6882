//! Semantic validation for parsed config documents.

use crate::config::types::{ProfileConfig, ProfileKind, StrataConfig};
use crate::errors::ConfigError;

/// Parse an export delimiter setting into the single byte the CSV writer
/// expects.
pub(crate) fn delimiter_byte(raw: &str) -> Option<u8> {
    match raw {
        "\\t" | "\t" => Some(b'\t'),
        s if s.len() == 1 && s.is_ascii() => s.bytes().next(),
        _ => None,
    }
}

fn validate_profile(
    name: &str,
    profile: &ProfileConfig,
    config: &StrataConfig,
    errors: &mut Vec<String>,
) {
    if name.trim().is_empty() {
        errors.push("Profile name must not be empty".to_string());
    }

    match (profile.kind, profile.upstream.as_deref()) {
        (ProfileKind::Project, None) => {
            errors.push(format!("Profile '{name}' is a project but names no upstream"));
        }
        (ProfileKind::Staging, Some(up)) => {
            errors.push(format!(
                "Profile '{name}' is a staging profile and cannot have upstream '{up}'"
            ));
        }
        (ProfileKind::Project, Some(up)) if up == name => {
            errors.push(format!("Profile '{name}' cannot be its own upstream"));
        }
        (ProfileKind::Project, Some(up)) => match config.profiles.get(up) {
            None => errors.push(format!("Profile '{name}' names unknown upstream '{up}'")),
            Some(upstream) if upstream.kind != ProfileKind::Staging => errors.push(format!(
                "Profile '{name}' upstream '{up}' is not a staging profile"
            )),
            Some(_) => {}
        },
        (ProfileKind::Staging, None) => {}
    }

    if profile.outputs.local.is_none() && profile.outputs.remote.is_none() {
        errors.push(format!("Profile '{name}' defines no outputs"));
    }

    if delimiter_byte(&profile.export.delimiter).is_none() {
        errors.push(format!(
            "Profile '{name}': export delimiter '{}' must be a single ASCII character",
            profile.export.delimiter
        ));
    }

    if matches!(&profile.dbt_profile, Some(p) if p.trim().is_empty()) {
        errors.push(format!("Profile '{name}': dbt_profile must not be empty"));
    }
}

/// Validate a parsed config document for a run of `selected`.
/// Returns `Ok(())` if valid, `Err` with all validation errors if not.
///
/// Problems in profiles other than `selected` are logged and do not fail
/// the run.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] listing every problem found in the
/// shared settings or the selected profile.
pub fn validate_config(config: &StrataConfig, selected: &str) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.profiles.is_empty() {
        errors.push("Config must define at least one profile".to_string());
    }

    if config.transform.executable.as_os_str().is_empty() {
        errors.push("transform.executable must not be empty".to_string());
    }

    for (name, profile) in &config.profiles {
        if name == selected {
            validate_profile(name, profile, config, &mut errors);
            continue;
        }
        let mut problems = Vec::new();
        validate_profile(name, profile, config, &mut problems);
        if !problems.is_empty() {
            tracing::warn!(
                profile = name,
                problems = %problems.join("; "),
                "Ignoring invalid profile not selected for this run"
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}
