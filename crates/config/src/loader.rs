use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::RelayConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["relay.toml", "relay.yaml", "relay.yml", "relay.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./relay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relay/relay.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `RelayConfig::default()` if no file is found or it fails to
/// parse.
pub fn discover_and_load() -> RelayConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RelayConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            RelayConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/relay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relay").map(|d| d.config_dir().to_path_buf())
}

/// Apply direct environment overrides on top of file values.
///
/// | variable            | field              |
/// |---------------------|--------------------|
/// | `ANTHROPIC_API_KEY` | `provider.api_key` |
/// | `RELAY_MODEL`       | `provider.model`   |
/// | `RELAY_BIND`        | `server.bind`      |
/// | `RELAY_PORT`        | `server.port`      |
pub fn apply_env_overrides(config: &mut RelayConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = lookup("ANTHROPIC_API_KEY") {
        config.provider.api_key = Some(Secret::new(key));
    }
    if let Some(model) = lookup("RELAY_MODEL") {
        config.provider.model = model;
    }
    if let Some(bind) = lookup("RELAY_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("RELAY_PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => config.server.port = p,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid RELAY_PORT"),
        }
    }
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::collections::HashMap};

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[provider]\nmodel = \"claude-test\"\nmax_tokens = 1024\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.provider.model, "claude-test");
        assert_eq!(cfg.provider.max_tokens, 1024);
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("relay.yaml");
        std::fs::write(&yaml, "server:\n  port: 9100\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().server.port, 9100);

        let json = dir.path().join("relay.json");
        std::fs::write(&json, r#"{"chat": {"default_session": "team"}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().chat.default_session, "team");
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/definitely/not/here/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here/relay.toml"));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-env"),
            ("RELAY_MODEL", "claude-env"),
            ("RELAY_PORT", "9001"),
            ("RELAY_BIND", ""),
        ]);
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(&mut cfg, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.provider.api_key.as_ref().unwrap().expose_secret(), "sk-env");
        assert_eq!(cfg.provider.model, "claude-env");
        assert_eq!(cfg.server.port, 9001);
        // Blank values are ignored.
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "RELAY_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.server.port, 8000);
    }
}
