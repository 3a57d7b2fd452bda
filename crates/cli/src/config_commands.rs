use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use relay_config::{
    RelayConfig,
    validate::{self, Diagnostic, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (secrets redacted).
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>, effective: &RelayConfig) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, effective, verbose),
        ConfigAction::Show => {
            println!("{}", serde_display(effective)?);
            Ok(())
        },
    }
}

fn serde_display(config: &RelayConfig) -> Result<String> {
    let mut value = serde_json::to_value(config)?;
    if let Some(key) = value.pointer_mut("/provider/api_key")
        && !key.is_null()
    {
        *key = serde_json::Value::String("[redacted]".into());
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// File diagnostics, minus the missing-key warning when the key arrives from
/// the environment instead.
fn relevant_diagnostics(file: Vec<Diagnostic>, effective: &RelayConfig) -> Vec<Diagnostic> {
    file.into_iter()
        .filter(|d| !(d.path == "provider.api_key" && effective.provider.has_api_key()))
        .collect()
}

fn check(path: Option<&Path>, effective: &RelayConfig, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    // Print which file we're checking
    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut diagnostics = relevant_diagnostics(result.diagnostics, effective);
    if result.config_path.is_none() {
        diagnostics.extend(validate::validate_config(effective).diagnostics);
    }

    let mut shown = 0;
    for d in &diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count();

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    fn missing_key() -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            category: "provider",
            path: "provider.api_key".into(),
            message: "no API key configured".into(),
        }
    }

    #[test]
    fn env_key_silences_missing_key_warning() {
        let mut config = RelayConfig::default();
        assert_eq!(relevant_diagnostics(vec![missing_key()], &config).len(), 1);

        config.provider.api_key = Some(Secret::new("sk-ant-test".into()));
        assert!(relevant_diagnostics(vec![missing_key()], &config).is_empty());
    }

    #[test]
    fn show_redacts_api_key() {
        let mut config = RelayConfig::default();
        config.provider.api_key = Some(Secret::new("sk-ant-secret".into()));
        let out = serde_display(&config).unwrap();
        assert!(!out.contains("sk-ant-secret"));
        assert!(out.contains("[redacted]"));
    }
}
