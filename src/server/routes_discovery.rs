//! Trial listings.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::errors::ViewError;
use super::middleware_auth::Requester;
use super::AppState;
use crate::store::TrialQuery;

/// `GET /trials`: open public trials, minus the requester's own.
pub async fn handler_active(
    State(state): State<Arc<AppState>>,
    requester: Requester,
) -> Result<Response, ViewError> {
    let exclude = requester.identity().map(|id| id.user_id.clone());
    let trials = state
        .store
        .list_trials(&TrialQuery::open_recruitment(exclude))
        .await?;
    Ok(Json(json!({ "trials": trials })).into_response())
}

pub async fn handler_mine(
    State(state): State<Arc<AppState>>,
    requester: Requester,
) -> Result<Response, ViewError> {
    let identity = requester
        .identity()
        .ok_or_else(|| ViewError::login(&state.config, &requester.path))?;
    let owned = state.store.owned_trials(&identity.user_id).await?;
    let participating = state.store.participating_trials(&identity.user_id).await?;
    Ok(Json(json!({
        "owned": owned,
        "participating": participating,
    }))
    .into_response())
}

pub async fn handler_featured(State(state): State<Arc<AppState>>) -> Result<Response, ViewError> {
    let trials = state.store.list_trials(&TrialQuery::featured()).await?;
    Ok(Json(json!({ "trials": trials })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

/// `GET /trials/search?q=`: an empty query lists every public trial.
pub async fn handler_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ViewError> {
    let trials = state.store.list_trials(&TrialQuery::search(&params.q)).await?;
    Ok(Json(json!({ "q": params.q, "trials": trials })).into_response())
}
