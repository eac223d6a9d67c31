//! Request-level error taxonomy and its HTTP mapping.
//!
//! | Variant | Response |
//! |---------|----------|
//! | `AuthenticationRequired` | 302 to the login page with `next` |
//! | `Unauthorized` | 401 `Unauthorized` |
//! | `Forbidden` | 403 with the denial text |
//! | `NotFound` | 404 |
//! | `BadRequest` | 400 |
//! | `Finished` | 409 `This trial has already finished!` |
//! | `Conflict` | 409 with the message |
//! | `Invalid` | 422 `{"errors": {field: [messages]}}` |
//! | `Internal` | 500, logged |

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::access::Denial;
use crate::config::AppConfig;
use crate::model::FieldErrors;
use crate::reporting::ReportError;

pub const FINISHED_MESSAGE: &str = "This trial has already finished!";

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("authentication required")]
    AuthenticationRequired { location: String },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{}", FINISHED_MESSAGE)]
    Finished,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ViewError {
    /// Redirect to the login page, coming back to `next` afterwards.
    pub fn login(config: &AppConfig, next: &str) -> Self {
        ViewError::AuthenticationRequired {
            location: format!("{}?next={}", config.login_url, urlencoding::encode(next)),
        }
    }

    /// Map a gate denial. `next` is where a login should return to.
    pub fn from_denial(denial: Denial, config: &AppConfig, next: &str) -> Self {
        match denial {
            Denial::AuthenticationRequired => ViewError::login(config, next),
            Denial::Forbidden(msg) => ViewError::Forbidden(msg.to_string()),
            Denial::Finished => ViewError::Finished,
        }
    }
}

impl From<ReportError> for ViewError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Store(inner) => ViewError::Internal(inner),
            ReportError::NotRandomised => ViewError::Conflict(e.to_string()),
            ReportError::BadDate(_) | ReportError::MissingField(_) | ReportError::BadValue { .. } => {
                ViewError::BadRequest(e.to_string())
            }
        }
    }
}

/// 302 to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        match self {
            ViewError::AuthenticationRequired { location } => found(&location),
            ViewError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            ViewError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ViewError::NotFound(what) => {
                (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
            }
            ViewError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ViewError::Finished => (StatusCode::CONFLICT, FINISHED_MESSAGE).into_response(),
            ViewError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ViewError::Invalid(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "errors": errors })),
            )
                .into_response(),
            ViewError::Internal(e) => {
                warn!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_keeps_next() {
        let config = AppConfig::default();
        let resp = ViewError::login(&config, "/trial/3/join").into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "/accounts/login?next=%2Ftrial%2F3%2Fjoin"
        );
    }

    #[test]
    fn denials_map_to_statuses() {
        let config = AppConfig::default();
        let status = |d| ViewError::from_denial(d, &config, "/").into_response().status();
        assert_eq!(status(Denial::AuthenticationRequired), StatusCode::FOUND);
        assert_eq!(status(Denial::Forbidden("Not Your Trial!")), StatusCode::FORBIDDEN);
        assert_eq!(status(Denial::Finished), StatusCode::CONFLICT);
    }

    #[test]
    fn report_errors_split_by_kind() {
        let status = |e: ReportError| ViewError::from(e).into_response().status();
        assert_eq!(status(ReportError::BadDate("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(ReportError::MissingField("score")), StatusCode::BAD_REQUEST);
        assert_eq!(status(ReportError::NotRandomised), StatusCode::CONFLICT);
        assert_eq!(
            status(ReportError::Store(anyhow::anyhow!("down"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_form_is_422_json() {
        let mut errors = FieldErrors::default();
        errors.add("title", "This field is required.");
        let resp = ViewError::Invalid(errors).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
