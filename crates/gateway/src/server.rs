use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{DefaultBodyLimit, State},
        http::HeaderValue,
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    relay_config::RelayConfig,
    tower_http::cors::{AllowOrigin, Any, CorsLayer},
    tracing::{info, warn},
};

use crate::{
    chat_routes::{prompt_handler, reset_handler, stream_handler, upload_handler},
    state::GatewayState,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let upload_limit = DefaultBodyLimit::max(state.config.media.max_upload_bytes);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/claude", post(prompt_handler))
        .route("/api/claude/stream", post(stream_handler))
        .route("/api/claude/upload", post(upload_handler).layer(upload_limit))
        .route("/api/claude/reset", post(reset_handler))
        .layer(cors)
        .with_state(AppState { gateway: state })
}

/// Configured origins, any method, any header. `*` allows every origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start_gateway(config: RelayConfig) -> anyhow::Result<()> {
    let provider = relay_agents::build_provider(&config.provider)?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = GatewayState::new(config, provider)?;

    info!(
        version = %state.version,
        model = state.chat.provider().id(),
        default_session = %state.default_session,
        "relay gateway starting"
    );

    let app = build_gateway_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("relay gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "model": state.gateway.chat.provider().id(),
        "sessions": state.gateway.chat.sessions().len(),
    }))
}
