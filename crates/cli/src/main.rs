mod ask_command;
mod config_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    relay_config::RelayConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "relay", about = "Relay: chat gateway for the Anthropic Messages API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    // Gateway arguments (used when no subcommand is provided, or with `gateway` subcommand)
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Config file (overrides discovery in ./ and ~/.config/relay/).
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Send one message to the model and stream the reply to stdout.
    Ask {
        #[arg(short, long)]
        message: String,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config file (explicit or discovered), then environment, then CLI flags.
fn load_effective_config(
    path: Option<&Path>,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<RelayConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = relay_config::load_config(path)
                .with_context(|| format!("loading {}", path.display()))?;
            relay_config::apply_env_overrides(&mut config);
            config
        },
        None => relay_config::discover_and_load(),
    };
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_effective_config(cli.config.as_deref(), cli.bind.clone(), cli.port)?;

    match cli.command {
        None | Some(Commands::Gateway) => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                bind = %config.server.bind,
                port = config.server.port,
                "starting relay"
            );
            relay_gateway::start_gateway(config).await
        },
        Some(Commands::Ask { message }) => ask_command::handle_ask(&config, message).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref(), &config)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory, std::io::Write};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0\"\nport = 9000").unwrap();

        let config = load_effective_config(Some(file.path()), None, Some(9100)).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_effective_config(Some(Path::new("/nonexistent/relay.toml")), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn ask_requires_message() {
        assert!(Cli::try_parse_from(["relay", "ask"]).is_err());
        let cli = Cli::try_parse_from(["relay", "ask", "-m", "hi"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Ask { ref message }) if message == "hi"));
    }
}
