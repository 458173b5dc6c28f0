use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::auth::SessionAuthority;

pub mod auth;
pub mod handlers;
pub mod types;

use handlers::{
    check_session, create_verification_code, get_verification_code, list_sessions,
    refresh_token, sign_in, sign_out, sign_up,
};

#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<SessionAuthority>,
    /// Service-level shared secret every call must present, if configured.
    pub access_token: Option<Arc<str>>,
}

/// Session router: one JSON route per operation.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/verification-codes", post(create_verification_code))
        .route("/auth/verification-codes/lookup", post(get_verification_code))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/session", get(check_session))
        .route("/auth/sessions", get(list_sessions))
}
