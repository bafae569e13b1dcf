use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::AppState;
use crate::auth::AuthorizationKey;
use crate::error::AppError;

/// Axum middleware that authenticates the Bearer key against the key cache
/// and injects the matching `AuthorizationKey` into request extensions.
///
/// With auth disabled a synthetic anonymous key permitting every model
/// group is injected instead.
pub async fn require_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.auth.enabled {
        request.extensions_mut().insert(anonymous_key());
        return Ok(next.run(request).await);
    }

    let token = extract_bearer_token(&request)?;
    let key = state
        .key_cache
        .lookup(&token)
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization key".to_string()))?;

    tracing::debug!(
        key_id = %key.id,
        user_id = %key.user_id,
        org_id = %key.organization_id,
        "Authenticated request"
    );

    request.extensions_mut().insert(key);
    Ok(next.run(request).await)
}

/// Axum middleware guarding `/admin/*` with the configured admin key.
///
/// When no admin key is configured the admin surface is closed and every
/// request is answered with 403.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(admin_key) = state.config.auth.admin_key.as_deref() else {
        return Err(AppError::Forbidden(
            "Admin API is disabled (no admin key configured)".to_string(),
        ));
    };

    let token = extract_bearer_token(&request)?;
    if token != admin_key {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(AppError::Unauthorized("Invalid admin key".to_string()));
    }

    Ok(next.run(request).await)
}

fn anonymous_key() -> AuthorizationKey {
    AuthorizationKey {
        id: "anonymous".to_string(),
        key_hash: "anonymous".to_string(),
        key_prefix: String::new(),
        name: "anonymous".to_string(),
        user_id: "anonymous".to_string(),
        organization_id: "anonymous".to_string(),
        models: vec!["*".to_string()],
        created_at: Utc::now(),
        expires_at: None,
    }
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("No authorization header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| {
            AppError::Unauthorized("Authorization header must use Bearer scheme".to_string())
        })?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized("Empty Bearer token".to_string()));
    }

    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode, header};
    use axum::middleware;
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::auth::users::{NewApiKey, create_api_key, create_organization, create_user};
    use crate::config::Config;
    use crate::db::Database;

    fn test_state_with(config: Config) -> AppState {
        let db = Database::open_in_memory().unwrap();
        let (state, _flusher) = AppState::new(config, db).unwrap();
        state
    }

    fn test_state() -> AppState {
        test_state_with(Config::default())
    }

    /// Issue a key for a fresh user and load it into the cache.
    fn issue_key(state: &AppState, user: &str) -> String {
        create_organization(&state.db, "acme").ok();
        create_user(&state.db, user, "acme").unwrap();
        let created = create_api_key(
            &state.db,
            &NewApiKey {
                name: "test".into(),
                models: vec!["*".into()],
                user: user.into(),
                organization: "acme".into(),
                expires_in_days: None,
            },
        )
        .unwrap();
        state.key_cache.refresh(&state.db).unwrap();
        created.plaintext
    }

    async fn whoami(request: Request) -> String {
        let key = request.extensions().get::<AuthorizationKey>().unwrap();
        key.user_id.clone()
    }

    fn auth_router(state: AppState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(state.clone(), require_key))
            .with_state(state)
    }

    fn admin_router(state: AppState) -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), require_admin))
            .with_state(state)
    }

    fn get_with_auth(uri: &str, auth: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    // -----------------------------------------------------------------------
    // extract_bearer_token
    // -----------------------------------------------------------------------

    #[test]
    fn test_extract_bearer_token_valid() {
        let req = get_with_auth("/", Some("Bearer sk-janus-abc123"));
        assert_eq!(extract_bearer_token(&req).unwrap(), "sk-janus-abc123");
    }

    #[test]
    fn test_extract_bearer_token_missing_header() {
        let req = get_with_auth("/", None);
        let err = extract_bearer_token(&req).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let req = get_with_auth("/", Some("Basic dXNlcjpwYXNz"));
        assert!(extract_bearer_token(&req).is_err());
    }

    #[test]
    fn test_extract_bearer_token_trims_whitespace() {
        let req = get_with_auth("/", Some("Bearer   sk-janus-abc123   "));
        assert_eq!(extract_bearer_token(&req).unwrap(), "sk-janus-abc123");
    }

    #[test]
    fn test_extract_bearer_token_empty() {
        let req = get_with_auth("/", Some("Bearer "));
        assert!(extract_bearer_token(&req).is_err());
    }

    // -----------------------------------------------------------------------
    // require_key
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_auth_header() {
        let app = auth_router(test_state());
        let resp = app.oneshot(get_with_auth("/whoami", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let app = auth_router(test_state());
        let resp = app
            .oneshot(get_with_auth("/whoami", Some("Bearer sk-janus-nope")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_key_injects_identity() {
        let state = test_state();
        let plaintext = issue_key(&state, "alice");
        let user_id = crate::auth::users::get_user_by_name(&state.db, "alice")
            .unwrap()
            .id;

        let resp = auth_router(state)
            .oneshot(get_with_auth("/whoami", Some(&format!("Bearer {plaintext}"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), user_id);
    }

    #[tokio::test]
    async fn test_key_not_in_cache_until_refresh() {
        let state = test_state();
        issue_key(&state, "alice");

        // A second key created after the last refresh is not yet visible.
        let late = create_api_key(
            &state.db,
            &NewApiKey {
                name: "late".into(),
                models: vec!["*".into()],
                user: "alice".into(),
                organization: "acme".into(),
                expires_in_days: None,
            },
        )
        .unwrap();

        let app = auth_router(state.clone());
        let resp = app
            .oneshot(get_with_auth("/whoami", Some(&format!("Bearer {}", late.plaintext))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        state.key_cache.refresh(&state.db).unwrap();
        let app = auth_router(state);
        let resp = app
            .oneshot(get_with_auth("/whoami", Some(&format!("Bearer {}", late.plaintext))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_disabled_allows_anonymous() {
        let mut config = Config::default();
        config.auth.enabled = false;
        let app = auth_router(test_state_with(config));

        let resp = app.oneshot(get_with_auth("/whoami", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), "anonymous");
    }

    // -----------------------------------------------------------------------
    // require_admin
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_admin_without_configured_key_is_forbidden() {
        let app = admin_router(test_state());
        let resp = app
            .oneshot(get_with_auth("/admin", Some("Bearer anything")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_with_correct_key() {
        let mut config = Config::default();
        config.auth.admin_key = Some("root-secret".into());
        let app = admin_router(test_state_with(config));

        let resp = app
            .oneshot(get_with_auth("/admin", Some("Bearer root-secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_with_wrong_key() {
        let mut config = Config::default();
        config.auth.admin_key = Some("root-secret".into());
        let state = test_state_with(config);
        // A regular API key is not an admin credential.
        let plaintext = issue_key(&state, "alice");

        let resp = admin_router(state)
            .oneshot(get_with_auth("/admin", Some(&format!("Bearer {plaintext}"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
