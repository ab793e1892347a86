//! Handle endpoints: availability, claim, rename, lookups and release.

use axum::extract::{Path as AxumPath, State};
use axum::Json;
use portfoliofy_handle_registry::{fold_handle, BindingKey, Outcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::{ApiError, SharedState};

/// Body of `POST /handles/claim`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimRequest {
    /// Opaque identity from the auth layer (email or OAuth subject).
    pub identity: String,
    pub handle: String,
}

/// Body of `POST /handles/rename`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameRequest {
    pub identity: String,
    pub new_handle: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub handle: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct BindingResponse {
    pub handle: String,
    pub identity: String,
}

#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl MutationResponse {
    fn applied(handle: Option<String>) -> Self {
        Self { ok: true, handle }
    }
}

fn into_response(
    outcome: Outcome,
    handle: Option<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    match outcome {
        Outcome::Applied => Ok(Json(MutationResponse::applied(handle))),
        Outcome::Rejected(reason) => {
            debug!("Request rejected: {}", reason);
            Err(ApiError::rejected(reason))
        }
    }
}

/// GET /handles/:handle/availability
pub async fn handle_availability(
    State(state): State<SharedState>,
    AxumPath(handle): AxumPath<String>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    state.record_request("availability");
    let availability = state.registry.is_available(&handle).await?;
    Ok(Json(AvailabilityResponse {
        handle: fold_handle(&handle),
        available: availability.available,
    }))
}

/// GET /handles/:handle - resolve a public profile
pub async fn handle_resolve(
    State(state): State<SharedState>,
    AxumPath(handle): AxumPath<String>,
) -> Result<Json<BindingResponse>, ApiError> {
    state.record_request("resolve");
    let identity = state
        .registry
        .lookup_identity(&handle)
        .await?
        .ok_or_else(|| ApiError::not_found("no profile for this username"))?;

    Ok(Json(BindingResponse {
        handle: fold_handle(&handle),
        identity: identity.into_string(),
    }))
}

/// GET /identities/:identity/handle
pub async fn handle_lookup_identity(
    State(state): State<SharedState>,
    AxumPath(identity): AxumPath<String>,
) -> Result<Json<BindingResponse>, ApiError> {
    state.record_request("lookup_handle");
    let handle = state
        .registry
        .lookup_handle(&identity)
        .await?
        .ok_or_else(|| ApiError::not_found("no username is bound"))?;

    Ok(Json(BindingResponse {
        handle: handle.into_string(),
        identity,
    }))
}

/// POST /handles/claim
pub async fn handle_claim(
    State(state): State<SharedState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    state.record_request("claim");
    let outcome = state
        .registry
        .claim(&request.identity, &request.handle)
        .await?;
    into_response(outcome, Some(fold_handle(&request.handle)))
}

/// POST /handles/rename
pub async fn handle_rename(
    State(state): State<SharedState>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    state.record_request("rename");
    let outcome = state
        .registry
        .rename(&request.identity, &request.new_handle)
        .await?;
    into_response(outcome, Some(fold_handle(&request.new_handle)))
}

/// DELETE /identities/:identity - administrative user deletion
pub async fn handle_release_identity(
    State(state): State<SharedState>,
    AxumPath(identity): AxumPath<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    state.record_request("release_identity");
    let outcome = state
        .registry
        .release(BindingKey::Identity(identity))
        .await?;
    into_response(outcome, None)
}

/// DELETE /handles/:handle
pub async fn handle_release_handle(
    State(state): State<SharedState>,
    AxumPath(handle): AxumPath<String>,
) -> Result<Json<MutationResponse>, ApiError> {
    state.record_request("release_handle");
    let outcome = state.registry.release(BindingKey::Handle(handle)).await?;
    into_response(outcome, None)
}
