use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("use POST")]
    MethodNotAllowed,

    #[error("must be JSON")]
    UnsupportedContentType,

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Slug not found")]
    MissingSlug,

    #[error("Project not found")]
    NotFound,

    /// `verbose` keeps the whole error chain in the response, for development.
    #[error("Internal error: {err}")]
    Internal { err: anyhow::Error, verbose: bool },
}

impl AppError {
    pub fn internal(err: anyhow::Error, production: bool) -> Self {
        Self::Internal {
            err,
            verbose: !production,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::UnsupportedContentType
            | AppError::MalformedPayload
            | AppError::MissingSlug => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            AppError::Internal { err, verbose: true } => {
                tracing::error!("{err:?}");
                format!("{err:?}")
            }
            AppError::Internal { err, verbose: false } => {
                tracing::error!("{err}");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}

#[test]
fn production_hides_error_chain() {
    let err = anyhow::anyhow!("connection refused").context("fail to increment view count");
    let quiet = AppError::internal(err, true);
    assert!(matches!(quiet, AppError::Internal { verbose: false, .. }));
    assert_eq!(
        quiet.into_response().status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
