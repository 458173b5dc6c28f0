use axum::{extract::State, Json};

use crate::api::types::{IssuedCode, SessionsResponse};
use crate::api::AppState;
use crate::auth::types::{
    ClientMetadata, CreateVerificationCodeRequest, GetVerificationCodeRequest,
    RefreshTokenRequest, SessionCheck, SignInRequest, SignOutRequest, SignUpRequest, TokenPair,
};
use crate::error::AuthResult;
use crate::model::VerificationCode;

pub async fn create_verification_code(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<CreateVerificationCodeRequest>,
) -> AuthResult<Json<IssuedCode>> {
    let code = state
        .authority
        .create_verification_code(&req.email, req.kind, &metadata.device_identifier)
        .await?;
    Ok(Json(code.into()))
}

pub async fn get_verification_code(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<GetVerificationCodeRequest>,
) -> AuthResult<Json<VerificationCode>> {
    let code = state
        .authority
        .get_verification_code(&req.code, &req.email, req.kind, &metadata.device_identifier)
        .await?;
    Ok(Json(code))
}

pub async fn sign_in(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<SignInRequest>,
) -> AuthResult<Json<TokenPair>> {
    Ok(Json(state.authority.sign_in(req, &metadata).await?))
}

pub async fn sign_up(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<SignUpRequest>,
) -> AuthResult<Json<TokenPair>> {
    Ok(Json(state.authority.sign_up(req, &metadata).await?))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<RefreshTokenRequest>,
) -> AuthResult<Json<TokenPair>> {
    let pair = state
        .authority
        .refresh_token(&req.refresh_token, &metadata)
        .await?;
    Ok(Json(pair))
}

pub async fn sign_out(
    State(state): State<AppState>,
    metadata: ClientMetadata,
    Json(req): Json<SignOutRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    state.authority.sign_out(req, &metadata).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn check_session(
    State(state): State<AppState>,
    metadata: ClientMetadata,
) -> AuthResult<Json<SessionCheck>> {
    Ok(Json(state.authority.check_session(&metadata).await?))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    metadata: ClientMetadata,
) -> AuthResult<Json<SessionsResponse>> {
    let sessions = state.authority.list_sessions(&metadata).await?;
    Ok(Json(SessionsResponse { sessions }))
}
