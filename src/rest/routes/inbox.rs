// rest/routes/inbox.rs — Inbox creation and token-authenticated fetch.

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use super::error_response;
use crate::error::RelayError;
use crate::inbox::lifecycle::GenerateRequest;
use crate::rest::auth::{authenticate, client_ip};
use crate::tier::Tier;
use crate::AppContext;

#[derive(Deserialize, Default)]
pub struct CreateInboxRequest {
    pub domain: Option<String>,
    #[serde(default)]
    pub community: bool,
    pub prefix: Option<String>,
}

pub async fn create_inbox(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<CreateInboxRequest>>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let account = authenticate(&ctx, &headers).await?;
    let ip = client_ip(&headers, peer);

    ctx.limiter
        .check_generate(ip, account.as_ref().map(|a| (a.id.as_str(), a.tier)))
        .await
        .map_err(error_response)?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let record = ctx
        .inboxes
        .generate_address(GenerateRequest {
            domain: body.domain,
            community: body.community,
            prefix: body.prefix,
            tier: account.as_ref().map(|a| a.tier).unwrap_or(Tier::None),
            owner_id: account.map(|a| a.id),
        })
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "address": record.address,
            "token": record.token,
        })),
    ))
}

#[derive(Deserialize)]
pub struct FetchInboxQuery {
    pub token: Option<String>,
}

pub async fn fetch_inbox(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<FetchInboxQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(token) = query.token else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthenticated (missing 'token' query parameter)" })),
        ));
    };

    match ctx.inboxes.get_inbox(&token).await {
        Ok(emails) => Ok(Json(json!({ "emails": emails, "expired": false }))),
        // Expired and never-existed read the same; clients poll until this.
        Err(RelayError::NotFound) => Ok(Json(json!({ "emails": [], "expired": true }))),
        Err(e) => Err(error_response(e)),
    }
}
