use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side half of a session. At most one row exists per (user, device).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub create_time: DateTime<Utc>,
}

/// Tied 1:1 to a refresh token and deleted together with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationToken {
    pub id: Uuid,
    pub refresh_token_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    pub create_time: DateTime<Utc>,
}
