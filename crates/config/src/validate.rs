//! Configuration validation.
//!
//! Detects unknown/misspelled fields, type errors, and settings that would
//! make the relay misbehave at runtime (missing API key, budgets of zero).

use std::{collections::HashMap, path::Path};

use crate::schema::RelayConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "provider", "media",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "provider.temprature"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let fields = |names: &[&'static str]| Struct(names.iter().map(|n| (*n, Leaf)).collect());

    Struct(HashMap::from([
        ("server", fields(&["bind", "port", "cors_origins"])),
        (
            "provider",
            fields(&[
                "api_key",
                "model",
                "base_url",
                "max_tokens",
                "temperature",
                "timeout_secs",
                "max_retries",
                "retry_backoff_ms",
            ]),
        ),
        (
            "media",
            fields(&[
                "max_image_bytes",
                "jpeg_start_quality",
                "jpeg_min_quality",
                "jpeg_quality_step",
                "downscale_factor",
                "max_recompress_iterations",
                "min_dimension",
                "max_upload_bytes",
                "max_extracted_chars",
            ]),
        ),
        ("chat", fields(&["default_session", "max_sessions"])),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered default file
/// if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let format = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_string();

    let mut result = match std::fs::read_to_string(actual_path) {
        Ok(content) => validate_str(&crate::env_subst::substitute_env(&content), &format),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate raw config text of the given format (`toml`, `yaml`, `yml`, `json`).
#[must_use]
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let parsed: Result<serde_json::Value, String> = match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        other => Err(format!("unsupported config format: .{other}")),
    };

    let value = match parsed {
        Ok(v) => v,
        Err(message) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message,
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<RelayConfig>(value) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Validate an already-loaded config (env overrides applied).
#[must_use]
pub fn validate_config(config: &RelayConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_semantics(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(map), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            },
        }
    }
}

fn check_semantics(config: &RelayConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, category, path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message,
        });
    };

    let provider = &config.provider;
    if !provider.has_api_key() {
        push(
            Severity::Warning,
            "provider",
            "provider.api_key",
            "no API key configured; set provider.api_key or ANTHROPIC_API_KEY".into(),
        );
    }
    if !(0.0..=1.0).contains(&provider.temperature) {
        push(
            Severity::Error,
            "provider",
            "provider.temperature",
            format!("temperature {} is outside 0.0..=1.0", provider.temperature),
        );
    }
    if provider.max_tokens == 0 {
        push(
            Severity::Error,
            "provider",
            "provider.max_tokens",
            "max_tokens must be greater than zero".into(),
        );
    }
    if provider.timeout_secs == 0 {
        push(
            Severity::Error,
            "provider",
            "provider.timeout_secs",
            "timeout_secs must be greater than zero".into(),
        );
    }

    let media = &config.media;
    if media.max_image_bytes == 0 {
        push(
            Severity::Error,
            "media",
            "media.max_image_bytes",
            "image budget must be greater than zero".into(),
        );
    }
    if media.jpeg_min_quality == 0 || media.jpeg_min_quality > media.jpeg_start_quality {
        push(
            Severity::Error,
            "media",
            "media.jpeg_min_quality",
            format!(
                "quality floor {} must be within 1..={}",
                media.jpeg_min_quality, media.jpeg_start_quality
            ),
        );
    }
    if media.jpeg_start_quality > 100 {
        push(
            Severity::Error,
            "media",
            "media.jpeg_start_quality",
            "JPEG quality cannot exceed 100".into(),
        );
    }
    if media.jpeg_quality_step == 0 {
        push(
            Severity::Error,
            "media",
            "media.jpeg_quality_step",
            "quality step must be greater than zero".into(),
        );
    }
    if !(media.downscale_factor > 0.0 && media.downscale_factor < 1.0) {
        push(
            Severity::Error,
            "media",
            "media.downscale_factor",
            format!(
                "downscale factor {} must be strictly between 0 and 1",
                media.downscale_factor
            ),
        );
    }
    if media.max_recompress_iterations == 0 {
        push(
            Severity::Error,
            "media",
            "media.max_recompress_iterations",
            "at least one recompression attempt is required".into(),
        );
    }

    if config.chat.max_sessions == 0 {
        push(
            Severity::Error,
            "chat",
            "chat.max_sessions",
            "max_sessions must be greater than zero".into(),
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_config_has_no_errors() {
        let result = validate_str("[provider]\napi_key = \"sk-1\"\n", "toml");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn typo_gets_a_suggestion() {
        let result = validate_str("[provider]\ntemprature = 0.5\n", "toml");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(diag.path, "provider.temprature");
        assert!(diag.message.contains("temperature"));
    }

    #[test]
    fn unknown_section_is_error() {
        let result = validate_str("{\"plugins\": {}}", "json");
        assert!(result.has_errors());
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_str("[provider\n", "toml");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_reported() {
        let result = validate_str("server:\n  port: \"eighty\"\n", "yaml");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn missing_key_is_warning() {
        let result = validate_config(&RelayConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn bad_media_settings_are_errors() {
        let mut cfg = RelayConfig::default();
        cfg.media.jpeg_min_quality = 99;
        cfg.media.downscale_factor = 1.5;
        cfg.provider.temperature = 3.0;
        let result = validate_config(&cfg);
        let paths: Vec<_> = result.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"media.jpeg_min_quality"));
        assert!(paths.contains(&"media.downscale_factor"));
        assert!(paths.contains(&"provider.temperature"));
    }

    #[test]
    fn zero_session_cap_is_error() {
        let result = validate_str("[chat]\nmax_sessions = 0\n", "toml");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "chat.max_sessions" && d.severity == Severity::Error)
        );
    }

    #[test]
    fn suggest_prefers_closest() {
        assert_eq!(suggest("prot", &["port", "bind"], 3), Some("port"));
        assert_eq!(suggest("zzzzzzzz", &["port", "bind"], 3), None);
    }
}
