//! Escrow service entry point.
//!
//! Wires the explorer, the node wallet and the contract compiler into an
//! [`EscrowService`] and exposes it over a small Axum REST API.  Pending
//! transaction confirmations are watched in the background; shutting down
//! releases every reservation they hold.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use escrow_protocol::ContractResolver;
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use escrow_service::api::{self, ApiState};
use escrow_service::config::Config;
use escrow_service::explorer::{ExplorerClient, PollingConfirmationWatcher};
use escrow_service::node::{NodeClient, NodeCompiler, NodeWallet};
use escrow_service::service::ServiceSettings;
use escrow_service::{EscrowService, ReservationGuard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // HTTP client shared by the explorer and node adapters.
    let client = Client::builder().timeout(config.http_timeout()).build()?;

    let explorer = Arc::new(ExplorerClient::new(client.clone(), &config.explorer_url));
    let node = NodeClient::new(client, &config.node_url, config.node_api_key.clone());
    let resolver = ContractResolver::new(Arc::new(NodeCompiler::new(node.clone())), config.network);

    // ─── Confirmation watching ────────────────────────────
    let watcher = Arc::new(PollingConfirmationWatcher::new(
        explorer.clone(),
        config.confirmation_poll(),
    ));
    let guard = ReservationGuard::with_watcher(watcher, config.confirmation_timeout());

    let settings = ServiceSettings::from_config(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let service = EscrowService::new(
        resolver,
        explorer,
        Arc::new(NodeWallet::new(node)),
        guard.clone(),
        settings,
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState { service });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/projects", get(api::list_projects).post(api::create_project))
        .route("/projects/:token_id", get(api::get_project))
        .route("/content/validate", post(api::validate_content))
        .route("/projects/:token_id/contribute", post(api::contribute))
        .route("/projects/:token_id/refund", post(api::refund))
        .route("/projects/:token_id/withdraw", post(api::withdraw))
        .route("/projects/:token_id/rebalance", post(api::rebalance))
        .route("/projects/:token_id/exchange", post(api::exchange))
        .route("/projects/:token_id/withdraw-unsold", post(api::withdraw_unsold))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr} ({:?})", config.network);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down; releasing pending reservations");
            guard.shutdown();
        })
        .await?;

    Ok(())
}
