use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::auth::types::SessionInfo;
use crate::error::{AuthError, StoreError};
use crate::model::{VerificationCode, VerificationCodeType};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Receipt for an issued code. The code itself only travels out of band.
#[derive(Debug, Serialize)]
pub struct IssuedCode {
    pub id: Uuid,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: VerificationCodeType,
    pub create_time: DateTime<Utc>,
}

impl From<VerificationCode> for IssuedCode {
    fn from(code: VerificationCode) -> Self {
        Self {
            id: code.id,
            email: code.email,
            kind: code.kind,
            create_time: code.create_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::CodeNotFound | AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::UserAlreadyExists => StatusCode::CONFLICT,
        AuthError::Banned | AuthError::PermissionDenied => StatusCode::FORBIDDEN,
        AuthError::Unauthenticated | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
        AuthError::Store(StoreError::Rocks(_) | StoreError::Codec(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AuthError::Store(StoreError::NotFound | StoreError::AlreadyExists(_))
        | AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
