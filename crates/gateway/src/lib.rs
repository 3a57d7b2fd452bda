//! HTTP surface for the relay: JSON, SSE and multipart endpoints over a
//! shared [`relay_chat::ChatService`].

pub mod chat_error;
pub mod chat_routes;
pub mod server;
pub mod state;

pub use {
    server::{AppState, build_gateway_app, start_gateway},
    state::GatewayState,
};
