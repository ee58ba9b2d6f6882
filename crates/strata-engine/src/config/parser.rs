//! Config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::types::StrataConfig;
use crate::errors::ConfigError;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVars`] naming every referenced variable
/// that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        if let Ok(value) = std::env::var(name) {
            value
        } else {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }
    Ok(result.into_owned())
}

/// Parse a config YAML string (after env var substitution).
///
/// `origin` only labels parse errors.
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml: &str, origin: &Path) -> Result<StrataConfig, ConfigError> {
    let substituted = substitute_env_vars(yaml)?;
    serde_yaml::from_str(&substituted).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

/// Parse a config YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<StrataConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&content, path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use strata_store::BackendTarget;

    use super::*;

    const MINIMAL: &str = r"
profiles:
  Staging:
    manifest: metadata/staging.yml
    directories:
      input: input/staging
      output: output/staging
      create_table_sql: sql/staging
      models: dbt/staging
    outputs:
      local:
        type: duckdb
        path: data/staging.duckdb
";

    #[test]
    fn env_var_substitution() {
        std::env::set_var("STRATA_TEST_HOST", "db.example.org");
        let result = substitute_env_vars("host: ${STRATA_TEST_HOST}\nport: 5432").unwrap();
        assert_eq!(result, "host: db.example.org\nport: 5432");
        std::env::remove_var("STRATA_TEST_HOST");
    }

    #[test]
    fn no_env_vars_passthrough() {
        let input = "host: localhost\nport: 5432";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn every_missing_var_is_reported_once() {
        let input = "${STRATA_MISSING_X} ${STRATA_MISSING_Y} ${STRATA_MISSING_X}";
        match substitute_env_vars(input).unwrap_err() {
            ConfigError::MissingEnvVars(names) => {
                assert_eq!(names, vec!["STRATA_MISSING_X", "STRATA_MISSING_Y"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_minimal_profile_with_defaults() {
        let config = parse_config_str(MINIMAL, Path::new("strata.yml")).unwrap();
        let staging = &config.profiles["Staging"];
        assert_eq!(staging.kind, crate::config::ProfileKind::Staging);
        assert_eq!(staging.export.delimiter, ";");
        assert!(staging.outputs.remote.is_none());
        assert!(matches!(
            staging.outputs.local,
            Some(BackendTarget::DuckDb(_))
        ));
        assert_eq!(config.transform.executable, Path::new("dbt"));
    }

    #[test]
    fn substitutes_password_before_parsing() {
        std::env::set_var("STRATA_TEST_PG_PASSWORD", "s3cret");
        let yaml = format!(
            "{MINIMAL}      remote:\n        type: postgres\n        host: pg\n        user: etl\n        \
             password: ${{STRATA_TEST_PG_PASSWORD}}\n        dbname: staging\n"
        );
        let config = parse_config_str(&yaml, Path::new("strata.yml")).unwrap();
        match config.profiles["Staging"].outputs.remote.as_ref().unwrap() {
            BackendTarget::Postgres(pg) => assert_eq!(pg.password, "s3cret"),
            BackendTarget::DuckDb(_) => panic!("expected postgres"),
        }
        std::env::remove_var("STRATA_TEST_PG_PASSWORD");
    }

    #[test]
    fn rejects_unknown_keys() {
        let yaml = MINIMAL.replace("manifest:", "manifset:");
        let err = parse_config_str(&yaml, Path::new("strata.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = parse_config(file.path()).unwrap();
        assert!(config.profiles.contains_key("Staging"));
    }

    #[test]
    fn missing_file_names_path() {
        let err = parse_config(Path::new("/nonexistent/strata.yml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/strata.yml"));
    }
}
