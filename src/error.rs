use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::downloader::ExportError;
use crate::model::ValidationError;
use crate::photos::PhotoError;

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("no data to export")]
    NoData,
    #[error("export failed: {0}")]
    Export(String),
}

/// JSON body shared by status replies: `{status, message}`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) | AppError::NoData => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Backend(e) => match e {
                BackendError::NotFound(_) => StatusCode::NOT_FOUND,
                BackendError::Conflict(_) => StatusCode::CONFLICT,
                BackendError::Auth(_) => StatusCode::UNAUTHORIZED,
                BackendError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                BackendError::Http(_) | BackendError::Status { .. } | BackendError::Decode(_) => {
                    StatusCode::BAD_GATEWAY
                }
                BackendError::Io(_) | BackendError::Snapshot(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<PhotoError> for AppError {
    fn from(e: PhotoError) -> Self {
        match e {
            PhotoError::Encode(reason) => AppError::Export(reason),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::NoData => AppError::NoData,
            ExportError::Backend(e) => AppError::Backend(e),
            ExportError::Xlsx(e) => AppError::Export(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }
        (status, Json(StatusResponse::error(self.to_string()))).into_response()
    }
}
