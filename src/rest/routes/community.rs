// rest/routes/community.rs — Community-domain publishing.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use super::error_response;
use crate::rest::auth::client_ip;
use crate::AppContext;

#[derive(Deserialize)]
pub struct PublishDomainRequest {
    pub domain: String,
}

pub async fn publish_domain(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<PublishDomainRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let ip = client_ip(&headers, peer);
    ctx.limiter.check_publish(ip).await.map_err(error_response)?;
    ctx.domains
        .publish_candidate(&body.domain)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}
