//! Trial creation and reproduction.
//!
//! Creation bodies are JSON [`TrialForm`]s with a nested `variable`. A
//! reproduce POST with an empty body copies the template trial as-is; with a
//! body it creates from the posted form, like a fresh creation.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use super::errors::{found, ViewError};
use super::gatekeeper::{guard, load_variable, visible};
use super::middleware_auth::Requester;
use super::AppState;
use crate::access::{chains, Identity};
use crate::model::{
    derive_draft, InstructionDelivery, ReportingStyle, TrialDraft, TrialForm, VariableDraft,
    VariableForm,
};
use crate::participation;

fn signed_in<'a>(state: &AppState, requester: &'a Requester) -> Result<&'a Identity, ViewError> {
    requester
        .identity()
        .ok_or_else(|| ViewError::login(&state.config, &requester.path))
}

async fn create(
    state: &AppState,
    identity: &Identity,
    form: TrialForm,
    n1: bool,
) -> Result<Response, ViewError> {
    form.validate(true).map_err(ViewError::Invalid)?;
    let (draft, variable) = form.into_draft(&identity.user_id, &identity.email);
    let draft = if n1 { draft.into_n1() } else { draft };
    let trial = participation::launch(state.store.as_ref(), &draft, &variable).await?;
    Ok(found(&trial.url()))
}

/// `GET /trial/new`: anonymous visitors are sent to the tutorial.
pub async fn handler_landing(requester: Requester) -> Response {
    match requester.identity() {
        None => found("/tutorial"),
        Some(_) => Json(json!({
            "create": "/trial/new",
            "create_n1": "/trial/new/n1",
            "tutorial": "/tutorial",
        }))
        .into_response(),
    }
}

pub async fn handler_create(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(form): Json<TrialForm>,
) -> Result<Response, ViewError> {
    let identity = signed_in(&state, &requester)?;
    create(&state, identity, form, false).await
}

pub async fn handler_n1_form(
    State(state): State<Arc<AppState>>,
    requester: Requester,
) -> Result<Response, ViewError> {
    signed_in(&state, &requester)?;
    Ok(Json(json!({
        "n1trial": true,
        "reporting_style": ReportingStyle::Whenever,
        "instruction_delivery": InstructionDelivery::OnDemand,
        "max_participants": 1,
    }))
    .into_response())
}

pub async fn handler_create_n1(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(form): Json<TrialForm>,
) -> Result<Response, ViewError> {
    let identity = signed_in(&state, &requester)?;
    create(&state, identity, form, true).await
}

// ── Reproduce ───────────────────────────────────────────────────

/// The template's settings as a new draft owned by the requester.
async fn derived(
    state: &AppState,
    requester: &Requester,
    pk: i64,
    n1: bool,
) -> Result<(i64, TrialDraft, VariableDraft), ViewError> {
    let template = guard(state, chains::SIGNED_IN, requester, pk).await?.trial;
    let identity = signed_in(state, requester)?;
    // Hidden trials cannot be reproduced.
    visible(state, &template, Some(identity)).await?;
    let variable = load_variable(state, template.id).await?;
    let (draft, variable) = derive_draft(&template, &variable, &identity.user_id, &identity.email);
    let draft = if n1 { draft.into_n1() } else { draft };
    Ok((template.id, draft, variable))
}

async fn reproduce_form(
    state: &AppState,
    requester: &Requester,
    pk: i64,
    n1: bool,
) -> Result<Response, ViewError> {
    let (parent, draft, variable) = derived(state, requester, pk, n1).await?;
    let mut form = TrialForm::from(&draft);
    form.variable = Some(VariableForm {
        question: variable.question,
        style: variable.style,
    });
    Ok(Json(json!({
        "reproducing": true,
        "parent": parent,
        "n1trial": draft.n1trial,
        "form": form,
    }))
    .into_response())
}

async fn reproduce(
    state: &AppState,
    requester: &Requester,
    pk: i64,
    body: &[u8],
    n1: bool,
) -> Result<Response, ViewError> {
    let (parent, draft, variable) = derived(state, requester, pk, n1).await?;
    let identity = signed_in(state, requester)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        let trial = participation::launch(state.store.as_ref(), &draft, &variable).await?;
        tracing::info!(trial_id = trial.id, parent, "trial reproduced");
        return Ok(found(&trial.url()));
    }
    let form: TrialForm = serde_json::from_slice(body)
        .map_err(|e| ViewError::BadRequest(format!("Invalid trial form: {}", e)))?;
    create(state, identity, form, n1).await
}

pub async fn handler_reproduce_form(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    reproduce_form(&state, &requester, pk, false).await
}

pub async fn handler_reproduce(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
    body: Bytes,
) -> Result<Response, ViewError> {
    reproduce(&state, &requester, pk, &body, false).await
}

pub async fn handler_reproduce_n1_form(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    reproduce_form(&state, &requester, pk, true).await
}

pub async fn handler_reproduce_n1(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
    body: Bytes,
) -> Result<Response, ViewError> {
    reproduce(&state, &requester, pk, &body, true).await
}
