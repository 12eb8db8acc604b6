// rest/routes/stats.rs — Service statistics.
//
// The connected count is served from the lifecycle manager's cache; the
// live aggregate is refreshed by a timer, not computed per request.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppContext;

pub async fn get_stats(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "emails_received": ctx.inboxes.received_total().await,
        "clients_connected": ctx.inboxes.active_count(),
    }))
}
