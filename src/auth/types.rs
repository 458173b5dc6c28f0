use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Device, User, VerificationCodeType};

/// Per-call client context, extracted by the transport before the core runs.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub authorization: Option<String>,
    /// Service-level shared secret; checked by the transport.
    pub access_token: Option<String>,
    pub platform: String,
    pub device_identifier: String,
    pub system_version: String,
    pub model: String,
    pub app: Option<String>,
    pub app_version: Option<String>,
    pub firebase_cloud_messaging_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVerificationCodeRequest {
    pub email: String,
    #[serde(rename = "type")]
    pub kind: VerificationCodeType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetVerificationCodeRequest {
    pub code: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: VerificationCodeType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub code: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub full_name: String,
    pub alias: String,
    pub code: String,
    pub email: String,
    #[serde(default)]
    pub is_legal_age: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignOutRequest {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub authorization_token_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub user_id: Uuid,
    pub refresh_token: String,
    pub authorization_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCheck {
    pub device: Device,
    /// Present when the call carried an authorization token.
    pub user: Option<User>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub authorization_token_id: Uuid,
    pub app: Option<String>,
    pub app_version: Option<String>,
    pub create_time: DateTime<Utc>,
    pub device: Device,
    pub current: bool,
}
