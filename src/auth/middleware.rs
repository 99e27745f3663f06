//! Authentication middleware

use crate::api::state::AppState;
use crate::auth::cookies::{read_cookie, ACCESS_COOKIE};
use crate::core::error::{PassageError, Result};
use crate::db::models::Role;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Authenticated caller, stored in request extensions
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

/// Access token from `Authorization: Bearer`, falling back to the cookie
fn access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| read_cookie(headers, ACCESS_COOKIE))
}

/// Authentication middleware
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = match access_token(request.headers()) {
        Some(t) => t,
        None => {
            return PassageError::InvalidToken("missing access token".to_string()).into_response()
        }
    };

    let claims = match state.service.authenticate(&token) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(AuthUser {
        user_id: claims.user_id,
        role: claims.role,
    });

    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = PassageError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| PassageError::InvalidToken("user not authenticated".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_takes_precedence_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("access_token=from-cookie"));
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));

        headers.remove(header::AUTHORIZATION);
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));

        headers.remove(header::COOKIE);
        assert_eq!(access_token(&headers), None);
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(access_token(&headers), None);
    }
}
