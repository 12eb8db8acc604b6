// rest/routes/webhook.rs — Webhook bindings.
//
// Account-level: one sink URL per account, honored for inboxes the account
// creates (Ultra only). Domain-level ("private"): binds a custom domain to
// the account after a DNS ownership proof, so mail for that domain is
// pushed instead of bucketed.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error_response;
use crate::error::RelayError;
use crate::inbox::store::DomainBinding;
use crate::ownership::CHALLENGE_SENTINEL;
use crate::rest::auth::{authenticate, AuthedAccount};
use crate::tier::{Tier, TierPolicy};
use crate::webhook::validate_webhook_url;
use crate::AppContext;

/// How long a fresh domain binding stays deliverable before the owner must
/// re-bind (and re-prove an active subscription).
const BINDING_VALID_MILLIS: i64 = 30 * 24 * 3_600_000;

async fn require_account(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> Result<AuthedAccount, (StatusCode, Json<Value>)> {
    match authenticate(ctx, headers).await? {
        Some(account) => Ok(account),
        None => Err(error_response(RelayError::Validation(
            "you must be logged in to interact with webhooks".into(),
        ))),
    }
}

fn require_webhook_tier(account: &AuthedAccount) -> Result<(), (StatusCode, Json<Value>)> {
    if TierPolicy::for_tier(account.tier).webhook_eligible {
        Ok(())
    } else {
        Err(error_response(RelayError::Authorization(format!(
            "webhooks require the {} tier",
            Tier::Ultra
        ))))
    }
}

// ─── Account-level webhook ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetWebhookRequest {
    pub url: String,
}

pub async fn set_account_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<SetWebhookRequest>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let account = require_account(&ctx, &headers).await?;
    require_webhook_tier(&account)?;

    let url = validate_webhook_url(&body.url).map_err(error_response)?;
    ctx.store
        .set_account_webhook(&account.id, &url)
        .await
        .map_err(|e| error_response(RelayError::Storage(e)))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_account_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let account = require_account(&ctx, &headers).await?;
    ctx.store
        .delete_account_webhook(&account.id)
        .await
        .map_err(|e| error_response(RelayError::Storage(e)))?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Domain-level webhook ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DomainQuery {
    pub domain: Option<String>,
}

fn require_domain(query: DomainQuery) -> Result<String, (StatusCode, Json<Value>)> {
    query.domain.filter(|d| !d.is_empty()).ok_or_else(|| {
        error_response(RelayError::Validation(
            "missing 'domain' query parameter".into(),
        ))
    })
}

/// GET — the TXT record pair to publish before POSTing a binding.
pub async fn get_domain_challenge(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<DomainQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let account = require_account(&ctx, &headers).await?;
    let domain = require_domain(query)?;
    let txt_name = ctx.ownership.derive_challenge(&account.id, &domain);
    Ok(Json(json!({
        "txt_name": txt_name,
        "txt_value": CHALLENGE_SENTINEL,
    })))
}

#[derive(Deserialize)]
pub struct BindDomainRequest {
    pub domain: String,
    pub url: String,
}

/// POST — verify ownership over DNS, then bind the domain and sink.
pub async fn bind_domain_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<BindDomainRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let account = require_account(&ctx, &headers).await?;
    require_webhook_tier(&account)?;

    let url = validate_webhook_url(&body.url).map_err(error_response)?;

    if !ctx.ownership.verify_current(&account.id, &body.domain).await {
        return Err(error_response(RelayError::Authorization(
            "could not verify ownership of domain".into(),
        )));
    }

    let now = Utc::now().timestamp_millis();
    ctx.store
        .put_domain_binding(&DomainBinding {
            domain: body.domain.to_ascii_lowercase(),
            owner_id: account.id.clone(),
            valid_until: now + BINDING_VALID_MILLIS,
            created_at: now,
        })
        .await
        .map_err(|e| error_response(RelayError::Storage(e)))?;
    ctx.store
        .set_account_webhook(&account.id, &url)
        .await
        .map_err(|e| error_response(RelayError::Storage(e)))?;

    Ok(Json(json!({
        "success": true,
        "message": format!("bound {} to this account", body.domain),
    })))
}

/// DELETE — remove a binding the caller owns. No tier requirement.
pub async fn unbind_domain_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<DomainQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let account = require_account(&ctx, &headers).await?;
    let domain = require_domain(query)?;
    let removed = ctx
        .store
        .delete_domain_binding(&domain.to_ascii_lowercase(), &account.id)
        .await
        .map_err(|e| error_response(RelayError::Storage(e)))?;
    if !removed {
        return Err(error_response(RelayError::Validation(
            "no such domain bound to this account".into(),
        )));
    }
    Ok(Json(json!({ "success": true })))
}
