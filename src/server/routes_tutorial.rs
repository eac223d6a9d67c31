//! Guided self-trial creation.
//!
//! The tutorial asks for a question, two arms and a measure, then creates a
//! private self-trial with manual ending. Worked examples pre-fill the form.
//!
//! Accounts live with the identity provider. An anonymous submission is sent
//! to login with its answers in `next`, and the form page pre-fills from them
//! on the way back.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde_json::json;
use std::sync::Arc;

use super::errors::{found, ViewError};
use super::middleware_auth::Requester;
use super::AppState;
use crate::model::{n1_with_sane_defaults, TutorialExample, TutorialForm};
use crate::participation;

async fn load_example(state: &AppState, id: i64) -> Result<TutorialExample, ViewError> {
    state
        .store
        .get_tutorial_example(id)
        .await?
        .ok_or(ViewError::NotFound("Tutorial example"))
}

async fn submit(
    state: &AppState,
    requester: &Requester,
    form: TutorialForm,
) -> Result<Response, ViewError> {
    let Some(identity) = requester.identity() else {
        let page = requester.path.split('?').next().unwrap_or_default();
        let next = format!("{}?{}", page, form.to_query());
        return Err(ViewError::login(&state.config, &next));
    };
    form.validate().map_err(ViewError::Invalid)?;
    let (draft, variable) = n1_with_sane_defaults(&identity.user_id, &identity.email, &form);
    let trial = participation::launch(state.store.as_ref(), &draft, &variable).await?;
    Ok(found(&trial.url()))
}

pub async fn handler_tutorial(Query(form): Query<TutorialForm>) -> Response {
    Json(json!({ "form": form })).into_response()
}

pub async fn handler_tutorial_submit(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Form(form): Form<TutorialForm>,
) -> Result<Response, ViewError> {
    submit(&state, &requester, form).await
}

pub async fn handler_example(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(answers): Query<TutorialForm>,
) -> Result<Response, ViewError> {
    let example = load_example(&state, id).await?;
    let form = if answers.is_blank() {
        TutorialForm::from(&example)
    } else {
        answers
    };
    Ok(Json(json!({
        "form": form,
        "example": example,
    }))
    .into_response())
}

pub async fn handler_example_submit(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(id): Path<i64>,
    Form(form): Form<TutorialForm>,
) -> Result<Response, ViewError> {
    load_example(&state, id).await?;
    submit(&state, &requester, form).await
}
