//! HTTP front for key lookups.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tracing::warn;

use chord_ring::{Ring, VNodeSnapshot};

#[derive(Debug, Deserialize)]
pub struct LookupForm {
    key: String,
}

pub fn router(ring: Arc<Ring>) -> Router {
    Router::new()
        .route("/lookup", post(lookup))
        .route("/status", get(status))
        .with_state(ring)
}

/// `POST /lookup` with form field `key`; answers with the owner's address.
async fn lookup(State(ring): State<Arc<Ring>>, Form(form): Form<LookupForm>) -> (StatusCode, String) {
    match ring.lookup(&form.key).await {
        Ok(address) => (StatusCode::OK, format!("{address}\n")),
        Err(e) => {
            warn!(key = %form.key, error = %e, "lookup failed");
            (StatusCode::BAD_GATEWAY, format!("Lookup err: {e}\n"))
        }
    }
}

async fn status(State(ring): State<Arc<Ring>>) -> Json<Vec<VNodeSnapshot>> {
    Json(ring.snapshots().await)
}
