// rest/mod.rs — Public HTTP API (thin adapters over the core services).
//
// Axum server bound per [server] config. Every handler extracts what it
// needs from AppContext and maps the core error taxonomy to status codes;
// no routing or lifecycle logic lives here.
//
// Endpoints:
//   POST   /v2/inbox/create
//   GET    /v2/inbox?token=...
//   GET    /v2/stats
//   GET    /v2/custom?domain=...&token=... | &password=...
//   POST   /v2/custom
//   POST   /v2/webhook
//   DELETE /v2/webhook
//   GET    /v2/webhook/private?domain=...
//   POST   /v2/webhook/private
//   DELETE /v2/webhook/private?domain=...
//   POST   /v2/community

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!(
        "{}:{}",
        ctx.config.server.bind_address, ctx.config.server.http_port
    );
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("HTTP API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/v2/inbox/create", post(routes::inbox::create_inbox))
        .route("/v2/inbox", get(routes::inbox::fetch_inbox))
        .route("/v2/stats", get(routes::stats::get_stats))
        .route(
            "/v2/custom",
            get(routes::custom::fetch_custom_inbox).post(routes::custom::derive_custom_challenge),
        )
        .route(
            "/v2/webhook",
            post(routes::webhook::set_account_webhook).delete(routes::webhook::delete_account_webhook),
        )
        .route(
            "/v2/webhook/private",
            get(routes::webhook::get_domain_challenge)
                .post(routes::webhook::bind_domain_webhook)
                .delete(routes::webhook::unbind_domain_webhook),
        )
        .route("/v2/community", post(routes::community::publish_domain))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
