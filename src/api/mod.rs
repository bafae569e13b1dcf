pub mod admin;
pub mod chat;
pub mod health;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::auth::middleware::{require_admin, require_key};
use crate::config::Config;

/// Build the API router with all endpoint groups.
///
/// Route layout:
/// ```text
/// /ping                                    GET           (no auth)
/// /v1/chat/completions                     POST          (api key)
/// /admin/organizations                     POST, GET     (admin)
/// /admin/organizations/:name               GET, PUT, DELETE (admin)
/// /admin/users                             POST, GET     (admin)
/// /admin/users/:name                       GET, PUT, DELETE (admin)
/// /admin/keys                              POST, GET     (admin)
/// /admin/keys/:id                          DELETE        (admin)
/// /admin/groups                            GET           (admin)
/// /admin/groups/:group/backends            POST          (admin)
/// /admin/groups/:group/backends/:backend   DELETE        (admin)
/// /admin/spend                             GET           (admin)
/// ```
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .route(
            "/organizations",
            post(admin::create_organization).get(admin::list_organizations),
        )
        .route(
            "/organizations/{name}",
            get(admin::get_organization)
                .put(admin::rename_organization)
                .delete(admin::delete_organization),
        )
        .route("/users", post(admin::create_user).get(admin::list_users))
        .route(
            "/users/{name}",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/keys", post(admin::create_api_key).get(admin::list_api_keys))
        .route("/keys/{id}", delete(admin::delete_api_key))
        .route("/groups", get(admin::list_groups))
        .route("/groups/{group}/backends", post(admin::add_backend))
        .route(
            "/groups/{group}/backends/{backend}",
            delete(admin::remove_backend),
        )
        .route("/spend", get(admin::query_spend))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let chat_routes = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route_layer(middleware::from_fn_with_state(state, require_key));

    Router::new()
        .route("/ping", get(health::ping))
        .merge(chat_routes)
        .nest("/admin", admin_routes)
}

/// Build the complete application with the global middleware stack.
pub fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    build_api_router(state.clone())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
pub fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
