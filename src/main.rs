//! Tense Master · English tense quiz backend
//!
//! - Axum HTTP + WebSocket API
//! - Challenge generation through an OpenAI-compatible chat API (Groq by default)
//!   with bounded retries and a static fallback bank
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   GROQ_API_KEY      : bearer token for generation; without it every challenge is a fallback
//!   GROQ_BASE_URL     : default "https://api.groq.com/openai/v1"
//!   GROQ_MODEL        : default "llama3-70b-8192"
//!   AGENT_CONFIG_PATH : path to TOML config (prompts, retry policy, fallback overrides)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod acquire;
mod config;
mod domain;
mod error;
mod logic;
mod openai;
mod protocol;
mod routes;
mod seeds;
mod state;
mod telemetry;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::new()?);
  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "tense_master", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "tense_master", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "tense_master", "Shutdown signal received");
}
