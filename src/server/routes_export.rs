//! Raw data export.
//!
//! In debug mode the CSV is returned inline as a download. Otherwise it is
//! written under `export_dir` and the reverse proxy serves it: the response
//! is empty, with `X-Accel-Redirect: <protected_prefix>/<file>` and an empty
//! `Content-Type` so the proxy picks the type.
//!
//! Each trial has one export file, replaced on every export. The new content
//! is written to a temporary name and renamed over it, so the proxy never
//! serves a half-written file.

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::info;

use super::errors::ViewError;
use super::gatekeeper::{load_trial, visible};
use super::middleware_auth::Requester;
use super::AppState;
use crate::reporting;

pub const ACCEL_REDIRECT: &str = "x-accel-redirect";

pub async fn handler_csv(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(pk): Path<i64>,
) -> Result<Response, ViewError> {
    let trial = load_trial(&state, pk).await?;
    visible(&state, &trial, requester.identity()).await?;
    let reports = state.store.recorded_reports(trial.id).await?;
    let csv = reporting::render_csv(&reports);

    if state.config.debug {
        let disposition = format!("attachment; filename=\"trial-{}.csv\"", trial.id);
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/force-download".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            csv,
        )
            .into_response());
    }

    let file_name = format!("trial-{}.csv", trial.id);
    let dir = &state.config.export_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating export dir {}", dir.display()))?;
    let partial = dir.join(format!(".{}.{}", file_name, uuid::Uuid::new_v4()));
    tokio::fs::write(&partial, csv)
        .await
        .with_context(|| format!("writing export {}", partial.display()))?;
    tokio::fs::rename(&partial, dir.join(&file_name))
        .await
        .with_context(|| format!("replacing export {}", file_name))?;
    info!(trial_id = trial.id, file = %file_name, rows = reports.len(), "csv exported");

    let location = format!(
        "{}/{}",
        state.config.protected_prefix.trim_end_matches('/'),
        file_name
    );
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(""));
    headers.insert(
        ACCEL_REDIRECT,
        HeaderValue::from_str(&location).context("export location is not a valid header")?,
    );
    Ok(response)
}
