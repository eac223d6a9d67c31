//! Trial detail page and the contact-the-owner form.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::errors::{found, ViewError};
use super::gatekeeper::{load_trial, visible};
use super::middleware_auth::Requester;
use super::AppState;
use crate::access::DetailPage;
use crate::model::{FieldErrors, Trial, Variable};
use crate::notify::Notice;

#[derive(Serialize)]
struct DetailResponse {
    #[serde(flatten)]
    page: DetailPage,
    trial: Trial,
    variable: Option<Variable>,
}

/// `GET /trial/{pk}`: 401 when the trial is hidden from the requester.
pub async fn handler_detail(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let trial = load_trial(&state, pk).await?;
    let page = visible(&state, &trial, requester.identity()).await?;
    let variable = state.store.get_variable(trial.id).await?;
    Ok(Json(DetailResponse {
        page,
        trial,
        variable,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct QuestionForm {
    pub pk: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
}

impl QuestionForm {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if self.name.trim().is_empty() {
            errors.add("name", "This field is required.");
        }
        let email = self.email.trim();
        if email.is_empty() {
            errors.add("email", "This field is required.");
        } else if !email.contains('@') {
            errors.add("email", "Enter a valid email address.");
        }
        if self.message.trim().is_empty() {
            errors.add("message", "This field is required.");
        }
        errors.into_result()
    }
}

/// `POST /trial/question`: forward a question to the owner, then back to the trial.
pub async fn handler_question(
    State(state): State<Arc<AppState>>,
    Form(form): Form<QuestionForm>,
) -> Result<Response, ViewError> {
    form.validate().map_err(ViewError::Invalid)?;
    let trial = load_trial(&state, form.pk).await?;
    state
        .notifier
        .send(Notice::QuestionAsked {
            trial_id: trial.id,
            trial_title: trial.title.clone(),
            owner_email: trial.owner_email.clone(),
            name: form.name.trim().to_string(),
            email: form.email.trim().to_string(),
            message: form.message.trim().to_string(),
        })
        .await;
    info!(trial_id = trial.id, "question forwarded to owner");
    Ok(found(&trial.url()))
}
