//! Authentication API handlers

use crate::api::state::AppState;
use crate::auth::cookies::{read_cookie, REFRESH_COOKIE};
use crate::auth::middleware::AuthUser;
use crate::auth::models::{
    AuthResponse, AuthResult, ChangePasswordRequest, LoginRequest, MessageResponse,
    RegisterRequest, UpdateProfileRequest, UserInfo,
};
use crate::core::error::{PassageError, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse},
    Json,
};

/// Unwrap a JSON body, turning extractor rejections into validation errors
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| PassageError::ValidationError(rejection.body_text()))
}

fn refresh_cookie(headers: &HeaderMap) -> Result<String> {
    read_cookie(headers, REFRESH_COOKIE)
        .ok_or_else(|| PassageError::ValidationError("refresh_token cookie is missing".to_string()))
}

fn session_response(state: &AppState, message: &str, result: AuthResult) -> impl IntoResponse {
    let [access, refresh] = state.cookies.session(&result.access_token, &result.refresh_token);
    (
        AppendHeaders([(header::SET_COOKIE, access), (header::SET_COOKIE, refresh)]),
        Json(AuthResponse {
            message: message.to_string(),
            expires_at: result.expires_at,
        }),
    )
}

fn cleared_response(state: &AppState, message: &str) -> impl IntoResponse {
    let [access, refresh] = state.cookies.cleared();
    (
        AppendHeaders([(header::SET_COOKIE, access), (header::SET_COOKIE, refresh)]),
        Json(MessageResponse::new(message)),
    )
}

/// Handler for POST /api/v1/user/register
pub async fn register(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    let result = state.service.register(req).await?;
    Ok(session_response(&state, "registered", result))
}

/// Handler for POST /api/v1/user/login
pub async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    let result = state.service.login(req).await?;
    Ok(session_response(&state, "logged in", result))
}

/// Handler for POST /api/v1/user/refresh
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let token = refresh_cookie(&headers)?;
    let result = state.service.refresh(&token).await?;
    Ok(session_response(&state, "session refreshed", result))
}

/// Handler for POST /api/v1/user/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let token = refresh_cookie(&headers)?;
    state.service.logout(&token).await?;
    Ok(cleared_response(&state, "logged out"))
}

/// Handler for POST /api/v1/user/logout/all
pub async fn logout_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let token = refresh_cookie(&headers)?;
    let revoked = state.service.logout_all(&token).await?;
    Ok(cleared_response(
        &state,
        &format!("logged out of {} session(s)", revoked),
    ))
}

/// Handler for GET /api/v1/user/me
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> Result<Json<UserInfo>> {
    let profile = state.service.profile(&user.user_id).await?;
    Ok(Json(UserInfo::from(profile)))
}

/// Handler for PATCH /api/v1/user/me
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    payload: std::result::Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserInfo>> {
    let changes = json_body(payload)?;
    let updated = state.service.update_profile(&user.user_id, changes).await?;
    Ok(Json(UserInfo::from(updated)))
}

/// Handler for POST /api/v1/user/password
///
/// Every session of the user is revoked, so the caller's cookies are cleared.
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    payload: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    state
        .service
        .change_password(&user.user_id, req.current_password, req.new_password)
        .await?;
    Ok(cleared_response(&state, "password changed"))
}
