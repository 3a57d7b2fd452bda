//! Configuration loading, validation, and env substitution.
//!
//! Config files: `relay.toml`, `relay.yaml`, `relay.yml`, or `relay.json`,
//! searched in `./` then `~/.config/relay/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw
//! file, plus a handful of direct environment overrides (see
//! [`loader::apply_env_overrides`]).

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{ChatConfig, MediaConfig, ProviderConfig, RelayConfig, ServerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
