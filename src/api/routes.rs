//! API routes

use crate::api::state::AppState;
use crate::auth::handlers::{
    change_password, get_me, login, logout, logout_all, refresh, register, update_me,
};
use crate::auth::middleware::authenticate;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

/// Build the `/api/v1/user` routes
pub fn build_api_routes(state: AppState) -> Router<AppState> {
    // Session lifecycle, driven by request bodies and the refresh cookie
    let public_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/logout/all", post(logout_all));

    // Access token required
    let protected_routes = Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/password", post(change_password))
        .route_layer(middleware::from_fn_with_state(state, authenticate));

    Router::new().nest("/api/v1/user", public_routes.merge(protected_routes))
}
