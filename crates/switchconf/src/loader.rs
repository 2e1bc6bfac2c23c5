//! Config file discovery, deep merge, and environment variable overlay.

use crate::{ConfigError, SwitchConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// A `cli_path` replaces the local `./switchboard.toml`. It is returned even
/// if it does not exist, so loading reports the missing file instead of
/// silently running on defaults.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/switchboard/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("switchboard/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("switchboard.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file as a raw table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // Type-check the file on its own so errors name the file at fault.
    toml::Value::Table(table.clone())
        .try_into::<SwitchConfig>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(table)
}

/// Merge `overlay` into `base`. Tables merge key by key; any other value in
/// `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides read through `lookup`.
///
/// Later variables in each group win, so `SWITCHBOARD_PORT` beats `PORT`
/// and `RUST_LOG` beats `SWITCHBOARD_LOG_LEVEL`.
pub fn apply_env_overrides_with<F>(
    config: &mut SwitchConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut var = |name: &str| -> Option<String> {
        let value = lookup(name)?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    // Bind
    for name in ["HOST", "SWITCHBOARD_HOST"] {
        if let Some(v) = var(name) {
            config.bind.host = v;
        }
    }
    for name in ["PORT", "SWITCHBOARD_PORT"] {
        if let Some(v) = var(name) {
            config.bind.port = parse_env(name, &v)?;
        }
    }

    // Telemetry
    for name in ["SWITCHBOARD_LOG_LEVEL", "RUST_LOG"] {
        if let Some(v) = var(name) {
            config.telemetry.log_level = v;
        }
    }
    for name in ["SWITCHBOARD_OTLP_ENDPOINT", "OTEL_EXPORTER_OTLP_ENDPOINT"] {
        if let Some(v) = var(name) {
            config.telemetry.otlp_endpoint = Some(v).filter(|v| !v.trim().is_empty());
        }
    }

    // Sessions
    if let Some(v) = var("SWITCHBOARD_RESUMABLE") {
        config.sessions.resumable = parse_bool("SWITCHBOARD_RESUMABLE", &v)?;
    }
    if let Some(v) = var("SWITCHBOARD_EVENT_STORE_CAPACITY") {
        config.sessions.event_store_capacity = parse_env("SWITCHBOARD_EVENT_STORE_CAPACITY", &v)?;
    }
    if let Some(v) = var("SWITCHBOARD_CLOSE_TIMEOUT_MS") {
        config.sessions.close_timeout_ms = parse_env("SWITCHBOARD_CLOSE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = var("SWITCHBOARD_KEEP_ALIVE_SECS") {
        config.sessions.keep_alive_secs = parse_env("SWITCHBOARD_KEEP_ALIVE_SECS", &v)?;
    }

    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: name.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var: name.to_string(),
            value: value.to_string(),
            message: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_cli_path_replaces_local() {
        let files = discover_config_files_with_override(Some(Path::new("/no/such/file.toml")));
        assert_eq!(files.last(), Some(&PathBuf::from("/no/such/file.toml")));
        assert!(!files.contains(&PathBuf::from("switchboard.toml")));
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = r#"
[bind]
host = "127.0.0.1"
port = 4000

[sessions]
resumable = false
"#
        .parse()
        .unwrap();

        let overlay: toml::Table = r#"
[bind]
port = 5000
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);

        assert_eq!(base["bind"]["host"].as_str(), Some("127.0.0.1"));
        assert_eq!(base["bind"]["port"].as_integer(), Some(5000));
        assert_eq!(base["sessions"]["resumable"].as_bool(), Some(false));
    }

    #[test]
    fn test_env_precedence() {
        let mut config = SwitchConfig::default();
        let mut sources = ConfigSources::default();

        apply_env_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[
                ("PORT", "8080"),
                ("SWITCHBOARD_PORT", "9090"),
                ("SWITCHBOARD_LOG_LEVEL", "debug"),
                ("RUST_LOG", "switchboard=trace"),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind.port, 9090);
        assert_eq!(config.telemetry.log_level, "switchboard=trace");
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(sources.env_overrides.len(), 5);
    }

    #[test]
    fn test_env_sessions() {
        let mut config = SwitchConfig::default();
        let mut sources = ConfigSources::default();

        apply_env_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[
                ("SWITCHBOARD_RESUMABLE", "off"),
                ("SWITCHBOARD_EVENT_STORE_CAPACITY", "16"),
                ("SWITCHBOARD_CLOSE_TIMEOUT_MS", "250"),
            ]),
        )
        .unwrap();

        assert!(!config.sessions.resumable);
        assert_eq!(config.sessions.event_store_capacity, 16);
        assert_eq!(config.sessions.close_timeout_ms, 250);
    }

    #[test]
    fn test_empty_otlp_endpoint_disables_export() {
        let mut config = SwitchConfig::default();
        config.telemetry.otlp_endpoint = Some("http://old:4317".into());
        let mut sources = ConfigSources::default();

        apply_env_overrides_with(&mut config, &mut sources, lookup(&[("SWITCHBOARD_OTLP_ENDPOINT", "")]))
            .unwrap();

        assert_eq!(config.telemetry.otlp_endpoint, None);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = SwitchConfig::default();
        let mut sources = ConfigSources::default();

        let err = apply_env_overrides_with(&mut config, &mut sources, lookup(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "PORT"));

        let err = apply_env_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[("SWITCHBOARD_RESUMABLE", "maybe")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SWITCHBOARD_RESUMABLE"));
    }
}
