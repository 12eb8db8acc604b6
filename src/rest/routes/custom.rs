// rest/routes/custom.rs — Custom-domain polling (legacy protocols).
//
// GET drains the holding bucket for a domain after a TXT proof:
//   - `token=` — the `_tmpml.<domain>` record must hold sha512(token)
//   - `password=` — requires login; the TXT record at the derived challenge
//     name must hold sha512(password)
// POST derives the challenge name the password hash belongs at.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error_response;
use crate::error::RelayError;
use crate::rest::auth::authenticate;
use crate::AppContext;

#[derive(Deserialize)]
pub struct CustomInboxQuery {
    pub domain: Option<String>,
    pub token: Option<String>,
    pub password: Option<String>,
}

pub async fn fetch_custom_inbox(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<CustomInboxQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(domain) = query.domain else {
        return Err(error_response(RelayError::Validation(
            "missing 'domain' query parameter".into(),
        )));
    };

    let verified = if let Some(token) = &query.token {
        ctx.ownership.verify_polling_token(&domain, token).await
    } else if let Some(password) = &query.password {
        let Some(account) = authenticate(&ctx, &headers).await? else {
            return Err(error_response(RelayError::Validation(
                "no account credentials provided for the password flow".into(),
            )));
        };
        ctx.ownership
            .verify_legacy_password(&account.id, &domain, password)
            .await
    } else {
        return Err(error_response(RelayError::Validation(
            "provide either 'token' or 'password'".into(),
        )));
    };

    if !verified {
        // Unverifiable is unverified: DNS failures land here too.
        return Err(error_response(RelayError::Authorization(
            "invalid proof for domain; if the record was just set, allow time for the nameserver to update".into(),
        )));
    }

    let emails = ctx.inboxes.drain_custom_domain(&domain).await;
    Ok(Json(json!({ "email": emails })))
}

#[derive(Deserialize)]
pub struct DeriveChallengeRequest {
    pub domain: String,
}

pub async fn derive_custom_challenge(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<DeriveChallengeRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(account) = authenticate(&ctx, &headers).await? else {
        return Err(error_response(RelayError::Validation(
            "account credentials required".into(),
        )));
    };
    if body.domain.is_empty() || body.domain.len() > 128 {
        return Err(error_response(RelayError::Validation("domain too long".into())));
    }
    let challenge = ctx.ownership.derive_challenge(&account.id, &body.domain);
    Ok(Json(json!({ "challenge": challenge })))
}
