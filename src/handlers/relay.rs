use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use serde::de::DeserializeOwned;

use crate::auth::extract_secret;
use crate::error::GatewayError;
use crate::metrics::REQUESTS_TOTAL;
use crate::models::{CreateRequest, CreateResponse, EditRequest};
use crate::state::AppState;

// POST / - relay a new message
pub async fn create_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<CreateResponse>, GatewayError> {
    REQUESTS_TOTAL.with_label_values(&["create"]).inc();

    let body: CreateRequest = authenticated_body(&state, request).await?;
    state.gateway.create(body).await.map(Json)
}

// PATCH /edit - relay an edit of an existing message
pub async fn edit_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<&'static str, GatewayError> {
    REQUESTS_TOTAL.with_label_values(&["edit"]).inc();

    let body: EditRequest = authenticated_body(&state, request).await?;
    state.gateway.edit(body).await?;
    Ok("OK")
}

// Checks the secret, then buffers and parses the body.
// Unauthenticated requests are answered before the body is read.
async fn authenticated_body<T: DeserializeOwned>(
    state: &AppState,
    request: Request,
) -> Result<T, GatewayError> {
    state.gateway.authenticate(extract_secret(request.headers()))?;

    let bytes = Bytes::from_request(request, state).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
