//! Owner administration: edit, peek, stop, invite.
//!
//! Every handler here runs an owner chain; a non-owner gets 403 before any
//! state changes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::errors::{found, ViewError};
use super::gatekeeper::{guard, load_variable};
use super::middleware_auth::Requester;
use super::AppState;
use crate::access::chains;
use crate::model::TrialForm;
use crate::notify::Notice;
use crate::reporting::{self, CloseReason};

pub async fn handler_edit_form(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::EDIT, &requester, pk).await?;
    let variable = state.store.get_variable(guarded.trial.id).await?;
    Ok(Json(json!({
        "editing": true,
        "form": TrialForm::from(&guarded.trial),
        "trial": guarded.trial,
        "variable": variable,
    }))
    .into_response())
}

/// Ownership, lifecycle and the self-trial flag survive an edit.
pub async fn handler_edit(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
    Json(form): Json<TrialForm>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::EDIT, &requester, pk).await?;
    form.validate(false).map_err(ViewError::Invalid)?;
    let mut trial = guarded.trial;
    form.apply_to(&mut trial);
    state.store.update_trial(&trial).await?;
    info!(trial_id = trial.id, "trial edited");
    Ok(found(&trial.url()))
}

/// Early results per arm.
pub async fn handler_peek(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::OWNER, &requester, pk).await?;
    let variable = load_variable(&state, guarded.trial.id).await?;
    let reports = state.store.recorded_reports(guarded.trial.id).await?;
    let participants = state.store.count_participants(guarded.trial.id).await?;
    Ok(Json(json!({
        "trial": guarded.trial,
        "variable": variable,
        "participants": participants,
        "reports": reports.len(),
        "groups": reporting::summarise(&reports),
    }))
    .into_response())
}

/// Close the trial. Stopping a finished trial changes nothing.
pub async fn handler_stop(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::OWNER, &requester, pk).await?;
    if state.store.stop_trial(guarded.trial.id).await? {
        state.prom_metrics.record_close(CloseReason::Stopped.as_str());
        info!(trial_id = guarded.trial.id, "trial stopped by owner");
    }
    Ok(found(&guarded.trial.url()))
}

#[derive(Debug, Deserialize)]
pub struct InviteForm {
    pub trial_pk: i64,
    #[serde(default)]
    pub email: String,
}

fn refused() -> Response {
    (StatusCode::FORBIDDEN, "NO").into_response()
}

/// `YAY` once the email holds an invitation, `NO` (403) for any refusal.
pub async fn handler_invite(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Form(form): Form<InviteForm>,
) -> Result<Response, ViewError> {
    let guarded = match guard(&state, chains::INVITE, &requester, form.trial_pk).await {
        Ok(guarded) => guarded,
        Err(ViewError::Forbidden(_) | ViewError::Finished | ViewError::AuthenticationRequired { .. }) => {
            return Ok(refused());
        }
        Err(e) => return Err(e),
    };
    let email = form.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ViewError::BadRequest("Enter a valid email address.".into()));
    }

    let trial = guarded.trial;
    let (invitation, created) = state.store.get_or_create_invitation(trial.id, email).await?;
    if created {
        info!(trial_id = trial.id, invitation_id = invitation.id, "invitation created");
        state
            .notifier
            .send(Notice::InvitationCreated {
                trial_id: trial.id,
                trial_title: trial.title.clone(),
                trial_url: trial.url(),
                email: invitation.email.clone(),
            })
            .await;
    }
    Ok("YAY".into_response())
}
