use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

use crate::api::AppState;
use crate::auth::types::ClientMetadata;

pub const ACCESS_TOKEN: &str = "x-access-token";
pub const PLATFORM: &str = "x-platform";
pub const DEVICE_IDENTIFIER: &str = "x-device-identifier";
pub const SYSTEM_VERSION: &str = "x-system-version";
pub const MODEL: &str = "x-model";
pub const APP: &str = "x-app";
pub const APP_VERSION: &str = "x-app-version";
pub const FIREBASE_CLOUD_MESSAGING_ID: &str = "x-firebase-cloud-messaging-id";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn require(headers: &HeaderMap, name: &'static str) -> Result<String, (StatusCode, String)> {
    header(headers, name)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, format!("missing {name} header")))
}

/// Byte comparison whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Client context for every call. Rejects the request before any handler
/// runs when the access token or a device header is missing.
impl FromRequestParts<AppState> for ClientMetadata {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let access_token = header(headers, ACCESS_TOKEN);
        if let Some(expected) = &state.access_token {
            let presented = access_token.as_deref().unwrap_or_default();
            if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                return Err((StatusCode::UNAUTHORIZED, "invalid access token".into()));
            }
        }

        let authorization =
            header(headers, axum::http::header::AUTHORIZATION.as_str()).map(|raw| {
                raw.strip_prefix("Bearer ")
                    .map(|token| token.trim().to_string())
                    .unwrap_or(raw)
            });

        Ok(ClientMetadata {
            authorization,
            access_token,
            platform: require(headers, PLATFORM)?,
            device_identifier: require(headers, DEVICE_IDENTIFIER)?,
            system_version: require(headers, SYSTEM_VERSION)?,
            model: require(headers, MODEL)?,
            app: header(headers, APP),
            app_version: header(headers, APP_VERSION),
            firebase_cloud_messaging_id: header(headers, FIREBASE_CLOUD_MESSAGING_ID),
        })
    }
}
