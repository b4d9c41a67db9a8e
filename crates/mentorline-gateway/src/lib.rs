//! HTTP surface for the SLA engine.
//!
//! Exposes the creation triggers, an on-demand sweep and account
//! administration as JSON endpoints over a shared [`AppContext`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use mentorline_sla::AppContext;
use tokio::net::TcpListener;

mod handlers;
mod types;

pub use types::ApiError;

pub const HEALTHZ_ENDPOINT: &str = "/healthz";
pub const MESSAGE_CREATED_ENDPOINT: &str = "/v1/triggers/message-created";
pub const ANNOUNCEMENT_CREATED_ENDPOINT: &str = "/v1/triggers/announcement-created";
pub const SLA_SWEEP_ENDPOINT: &str = "/v1/triggers/sla-sweep";
pub const ACCOUNT_DISABLED_ENDPOINT: &str = "/v1/admin/accounts/disabled";
/// Header carrying the caller for administrative routes. Honored only when
/// a bearer token is configured; without one the admin routes answer 403.
pub const CALLER_UID_HEADER: &str = "x-caller-uid";

pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: String,
    /// When set, every request must present `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_GATEWAY_BIND.to_string(),
            bearer_token: None,
        }
    }
}

pub struct GatewayState {
    pub(crate) context: AppContext,
    pub(crate) bearer_token: Option<String>,
}

impl GatewayState {
    pub fn new(context: AppContext, config: &GatewayConfig) -> Self {
        Self {
            context,
            bearer_token: config
                .bearer_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
        }
    }
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(HEALTHZ_ENDPOINT, get(handlers::handle_healthz))
        .route(
            MESSAGE_CREATED_ENDPOINT,
            post(handlers::handle_message_created),
        )
        .route(
            ANNOUNCEMENT_CREATED_ENDPOINT,
            post(handlers::handle_announcement_created),
        )
        .route(SLA_SWEEP_ENDPOINT, post(handlers::handle_sla_sweep))
        .route(
            ACCOUNT_DISABLED_ENDPOINT,
            post(handlers::handle_set_account_disabled),
        )
        .with_state(state)
}

/// Serves the gateway until ctrl-c.
pub async fn run_gateway_server(config: GatewayConfig, context: AppContext) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid gateway bind address '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(
        addr = %local_addr,
        auth = config.bearer_token.is_some(),
        "gateway listening"
    );

    let state = Arc::new(GatewayState::new(context, &config));
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;
    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests;
