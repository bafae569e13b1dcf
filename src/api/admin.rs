use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::AuthorizationKey;
use crate::auth::users::{self, NewApiKey};
use crate::balancer::{BackendConfig, Balancer, StrategyKind};
use crate::error::AppError;
use crate::spend::{self, SpendRecord};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub organization: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub organization: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyListQuery {
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub info: AuthorizationKey,
    /// The full plaintext key. Shown exactly once.
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// Backend as listed to operators; the credential is never echoed back.
#[derive(Debug, Serialize)]
pub struct BackendView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub base_url: String,
    pub weight: u32,
    pub has_api_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl From<&BackendConfig> for BackendView {
    fn from(b: &BackendConfig) -> Self {
        Self {
            name: b.name.clone(),
            kind: b.kind.clone(),
            base_url: b.base_url.clone(),
            weight: b.weight,
            has_api_key: !b.api_key.is_empty(),
            max_tokens: b.max_tokens,
            temperature: b.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub name: String,
    pub strategy: StrategyKind,
    pub backends: Vec<BackendView>,
}

#[derive(Debug, Deserialize)]
pub struct SpendQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SpendResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub total_spend: f64,
    pub data: Vec<SpendRecord>,
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

/// POST /admin/organizations
pub async fn create_organization(
    State(state): State<AppState>,
    Json(body): Json<NameRequest>,
) -> Result<(StatusCode, Json<users::Organization>), AppError> {
    let org = users::create_organization(&state.db, &body.name)?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// GET /admin/organizations
pub async fn list_organizations(
    State(state): State<AppState>,
) -> Result<Json<Vec<users::Organization>>, AppError> {
    Ok(Json(users::list_organizations(&state.db)?))
}

/// GET /admin/organizations/:name
pub async fn get_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<users::Organization>, AppError> {
    Ok(Json(users::get_organization_by_name(&state.db, &name)?))
}

/// PUT /admin/organizations/:name
pub async fn rename_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<NameRequest>,
) -> Result<Json<users::Organization>, AppError> {
    Ok(Json(users::rename_organization(&state.db, &name, &body.name)?))
}

/// DELETE /admin/organizations/:name
pub async fn delete_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    users::delete_organization(&state.db, &name)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// POST /admin/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<users::User>), AppError> {
    let user = users::create_user(&state.db, &body.name, &body.organization)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /admin/users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<users::User>>, AppError> {
    Ok(Json(users::list_users(&state.db)?))
}

/// GET /admin/users/:name
pub async fn get_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<users::User>, AppError> {
    Ok(Json(users::get_user_by_name(&state.db, &name)?))
}

/// PUT /admin/users/:name
pub async fn update_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<users::User>, AppError> {
    Ok(Json(users::set_user_organization(&state.db, &name, &body.organization)?))
}

/// DELETE /admin/users/:name
pub async fn delete_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    users::delete_user(&state.db, &name)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

/// POST /admin/keys
///
/// The new key becomes usable on the chat route after the next cache
/// refresh.
pub async fn create_api_key(
    State(state): State<AppState>,
    Json(body): Json<NewApiKey>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), AppError> {
    let created = users::create_api_key(&state.db, &body)?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            info: created.info,
            key: created.plaintext,
        }),
    ))
}

/// GET /admin/keys?user=
pub async fn list_api_keys(
    State(state): State<AppState>,
    Query(query): Query<KeyListQuery>,
) -> Result<Json<Vec<AuthorizationKey>>, AppError> {
    Ok(Json(users::list_api_keys(&state.db, query.user.as_deref())?))
}

/// DELETE /admin/keys/:id
pub async fn delete_api_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    users::delete_api_key(&state.db, &id)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

// ---------------------------------------------------------------------------
// Model groups
// ---------------------------------------------------------------------------

fn group_view(name: String, balancer: &dyn Balancer) -> GroupView {
    GroupView {
        name,
        strategy: balancer.strategy(),
        backends: balancer
            .backends()
            .iter()
            .map(|b| BackendView::from(b.as_ref()))
            .collect(),
    }
}

/// GET /admin/groups
pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupView>> {
    let groups = state
        .registry
        .group_names()
        .into_iter()
        .filter_map(|name| {
            let balancer = state.registry.resolve(&name)?;
            Some(group_view(name, balancer.as_ref()))
        })
        .collect();
    Json(groups)
}

/// POST /admin/groups/:group/backends
pub async fn add_backend(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(backend): Json<BackendConfig>,
) -> Result<(StatusCode, Json<GroupView>), AppError> {
    let balancer = state
        .registry
        .resolve(&group)
        .ok_or_else(|| AppError::NotFound(format!("Model group '{group}' not found")))?;

    if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
        return Err(AppError::BadRequest(format!(
            "Invalid base_url '{}'",
            backend.base_url
        )));
    }

    tracing::info!(group = %group, backend = %backend.name, "Backend added");
    balancer.add(backend);
    Ok((StatusCode::CREATED, Json(group_view(group, balancer.as_ref()))))
}

/// DELETE /admin/groups/:group/backends/:backend
pub async fn remove_backend(
    State(state): State<AppState>,
    Path((group, backend)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let balancer = state
        .registry
        .resolve(&group)
        .ok_or_else(|| AppError::NotFound(format!("Model group '{group}' not found")))?;

    if !balancer.remove(&backend) {
        return Err(AppError::NotFound(format!(
            "Backend '{backend}' not found in model group '{group}'"
        )));
    }

    tracing::info!(group = %group, backend = %backend, "Backend removed");
    Ok(Json(DeletedResponse { deleted: true }))
}

// ---------------------------------------------------------------------------
// Spend
// ---------------------------------------------------------------------------

/// GET /admin/spend?from=&to=
///
/// Both bounds are RFC 3339 timestamps. `to` defaults to now and `from` to
/// 24 hours before `to`.
pub async fn query_spend(
    State(state): State<AppState>,
    Query(query): Query<SpendQuery>,
) -> Result<Json<SpendResponse>, AppError> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::hours(24));

    let data = spend::spend_in_range(&state.db, from, to)?;
    let total_spend = data.iter().map(|r| r.spend).sum();

    Ok(Json(SpendResponse {
        from,
        to,
        count: data.len(),
        total_spend,
        data,
    }))
}
