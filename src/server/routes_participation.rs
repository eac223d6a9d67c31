//! Join, leave, randomise and report.
//!
//! | Endpoint | Chain | Success |
//! |----------|-------|---------|
//! | `GET/POST /trial/{pk}/join` | `JOIN` | 200 JSON, errors listed in the body |
//! | `GET/POST /trial/{pk}/leave` | `SIGNED_IN` / `LEAVE` | 200 JSON |
//! | `POST /trial/{pk}/randomise` | `RANDOMISE` | 200 text, the lowercase arm name |
//! | `GET/POST /trial/{pk}/report` | `REPORT` | 200 JSON / 302 to the trial |
//!
//! Join and the leave page also require the trial to be visible to the
//! requester, so a hidden trial answers 401 before any of it is shown.
//! Joining a multi-participant trial allocates the participant's arm.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde_json::json;
use std::sync::Arc;

use super::errors::{found, ViewError};
use super::gatekeeper::{guard, load_variable, visible};
use super::middleware_auth::Requester;
use super::AppState;
use crate::access::chains;
use crate::participation;
use crate::reporting::{self, CycleState, ReportForm};

pub async fn handler_join_page(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::JOIN, &requester, pk).await?;
    visible(&state, &guarded.trial, requester.identity()).await?;
    Ok(Json(json!({
        "trial": guarded.trial,
        "errors": Vec::<String>::new(),
    }))
    .into_response())
}

/// Re-renders the join page whether or not the join succeeded.
pub async fn handler_join(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::JOIN, &requester, pk).await?;
    let identity = requester
        .identity()
        .ok_or_else(|| ViewError::login(&state.config, &requester.path))?;
    visible(&state, &guarded.trial, Some(identity)).await?;

    let mut errors = Vec::new();
    match participation::join(state.store.as_ref(), &guarded.trial, identity).await? {
        Ok(participant) => {
            if !guarded.trial.n1trial {
                participation::allocate(
                    state.store.as_ref(),
                    &state.rng,
                    &guarded.trial,
                    &participant,
                )
                .await?;
            }
            state.prom_metrics.record_join("joined");
        }
        Err(e) => {
            state.prom_metrics.record_join(e.outcome());
            errors.push(e.to_string());
        }
    }
    Ok(Json(json!({
        "trial": guarded.trial,
        "joined": errors.is_empty(),
        "errors": errors,
    }))
    .into_response())
}

pub async fn handler_leave_page(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::SIGNED_IN, &requester, pk).await?;
    visible(&state, &guarded.trial, requester.identity()).await?;
    Ok(Json(json!({ "trial": guarded.trial })).into_response())
}

pub async fn handler_leave(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::LEAVE, &requester, pk).await?;
    participation::leave(state.store.as_ref(), guarded.participant()?).await?;
    Ok(Json(json!({ "trial": guarded.trial, "left": true })).into_response())
}

pub async fn handler_randomise(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::RANDOMISE, &requester, pk).await?;
    let variable = load_variable(&state, guarded.trial.id).await?;
    let group = participation::randomise(
        state.store.as_ref(),
        &state.rng,
        &guarded.trial,
        guarded.participant()?,
        &variable,
    )
    .await?;
    Ok(group.name.as_str().to_lowercase().into_response())
}

pub async fn handler_report_form(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::REPORT, &requester, pk).await?;
    let participant = guarded.participant()?;
    let variable = load_variable(&state, guarded.trial.id).await?;
    let cycle = if guarded.trial.n1trial {
        Some(CycleState::load(state.store.as_ref(), guarded.trial.id, participant.id).await?)
    } else {
        None
    };
    Ok(Json(json!({
        "trial": guarded.trial,
        "variable": variable,
        "date_format": "DD/MM/YYYY",
        "cycle": cycle,
    }))
    .into_response())
}

pub async fn handler_report(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
    Form(form): Form<ReportForm>,
) -> Result<Response, ViewError> {
    let guarded = guard(&state, chains::REPORT, &requester, pk).await?;
    let participant = guarded.participant()?;
    let variable = load_variable(&state, guarded.trial.id).await?;
    let date = reporting::parse_report_date(&form.date)?;
    let measurement = form.measurement(variable.style)?;

    // An unallocated participant draws its arm before the first report.
    let mut participant = participant.clone();
    if !guarded.trial.n1trial && participant.group.is_none() {
        let group =
            participation::allocate(state.store.as_ref(), &state.rng, &guarded.trial, &participant)
                .await?;
        participant.group = Some(group);
    }

    let submission = reporting::submit_report(
        state.store.as_ref(),
        &guarded.trial,
        &participant,
        &variable,
        date,
        measurement,
        state.today(),
    )
    .await?;
    state.prom_metrics.record_report(variable.style.as_str());
    if let Some(reason) = submission.closed {
        state.prom_metrics.record_close(reason.as_str());
    }
    Ok(found(&guarded.trial.url()))
}
