use chrono::{DateTime, Duration, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::keys::{self, GeneratedKey};
use crate::auth::{AuthorizationKey, parse_model_list};
use crate::db::Database;
use crate::error::AppError;
use crate::store::{KeyStore, PersistenceError};

/// Lifetime of a new key when the caller does not pick one.
pub const DEFAULT_KEY_LIFETIME_DAYS: i64 = 30;

/// Stored organization record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for issuing a key.
#[derive(Debug, Clone, Deserialize)]
pub struct NewApiKey {
    #[serde(default)]
    pub name: String,
    /// Permitted model groups; defaults to `["*"]`.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    pub user: String,
    pub organization: String,
    /// Days until expiry. `None` means the default lifetime; zero or a
    /// negative value issues a key that never expires.
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

fn default_models() -> Vec<String> {
    vec!["*".to_string()]
}

/// Result of creating a new API key: metadata plus the one-time plaintext.
#[derive(Debug)]
pub struct CreatedApiKey {
    pub info: AuthorizationKey,
    pub plaintext: String,
}

fn constraint_or_db(err: rusqlite::Error, conflict: impl FnOnce() -> String) -> AppError {
    match err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AppError::Conflict(conflict())
        }
        other => AppError::from(other),
    }
}

fn not_found_or_db(err: rusqlite::Error, missing: impl FnOnce() -> String) -> AppError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(missing()),
        other => AppError::from(other),
    }
}

// ---------------------------------------------------------------------------
// Organization CRUD
// ---------------------------------------------------------------------------

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

pub fn create_organization(db: &Database, name: &str) -> Result<Organization, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("Organization name must not be empty".into()));
    }

    let org = Organization {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
    };
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![org.id, org.name, org.created_at],
        )
    })
    .map_err(|e| constraint_or_db(e, || format!("Organization '{name}' already exists")))?;

    tracing::info!(org_id = %org.id, name = %org.name, "Organization created");
    Ok(org)
}

pub fn get_organization_by_name(db: &Database, name: &str) -> Result<Organization, AppError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT id, name, created_at FROM organizations WHERE name = ?1",
            params![name],
            organization_from_row,
        )
    })
    .map_err(|e| not_found_or_db(e, || format!("Organization '{name}' not found")))
}

pub fn list_organizations(db: &Database) -> Result<Vec<Organization>, AppError> {
    let orgs = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM organizations ORDER BY created_at")?;
        let rows = stmt.query_map([], organization_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(orgs)
}

pub fn rename_organization(
    db: &Database,
    name: &str,
    new_name: &str,
) -> Result<Organization, AppError> {
    if new_name.trim().is_empty() {
        return Err(AppError::BadRequest("Organization name must not be empty".into()));
    }

    let updated = db
        .with_conn(|conn| {
            conn.execute(
                "UPDATE organizations SET name = ?1 WHERE name = ?2",
                params![new_name, name],
            )
        })
        .map_err(|e| constraint_or_db(e, || format!("Organization '{new_name}' already exists")))?;

    if updated == 0 {
        return Err(AppError::NotFound(format!("Organization '{name}' not found")));
    }

    tracing::info!(from = %name, to = %new_name, "Organization renamed");
    get_organization_by_name(db, new_name)
}

/// Delete an organization together with its users and keys (cascade).
pub fn delete_organization(db: &Database, name: &str) -> Result<(), AppError> {
    let deleted = db.with_conn(|conn| {
        conn.execute("DELETE FROM organizations WHERE name = ?1", params![name])
    })?;

    if deleted == 0 {
        return Err(AppError::NotFound(format!("Organization '{name}' not found")));
    }

    tracing::info!(name = %name, "Organization deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// User CRUD
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        organization_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Create a user inside an existing organization.
pub fn create_user(db: &Database, name: &str, organization: &str) -> Result<User, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("User name must not be empty".into()));
    }
    let org = get_organization_by_name(db, organization)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        organization_id: org.id,
        created_at: Utc::now(),
    };
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, name, organization_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.name, user.organization_id, user.created_at],
        )
    })
    .map_err(|e| constraint_or_db(e, || format!("User '{name}' already exists")))?;

    tracing::info!(user_id = %user.id, name = %user.name, org = %organization, "User created");
    Ok(user)
}

pub fn get_user_by_name(db: &Database, name: &str) -> Result<User, AppError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT id, name, organization_id, created_at FROM users WHERE name = ?1",
            params![name],
            user_from_row,
        )
    })
    .map_err(|e| not_found_or_db(e, || format!("User '{name}' not found")))
}

pub fn list_users(db: &Database) -> Result<Vec<User>, AppError> {
    let users = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, organization_id, created_at FROM users ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(users)
}

/// Move a user to another organization. Existing keys keep the
/// organization they were issued under.
pub fn set_user_organization(
    db: &Database,
    name: &str,
    organization: &str,
) -> Result<User, AppError> {
    let org = get_organization_by_name(db, organization)?;
    let updated = db.with_conn(|conn| {
        conn.execute(
            "UPDATE users SET organization_id = ?1 WHERE name = ?2",
            params![org.id, name],
        )
    })?;

    if updated == 0 {
        return Err(AppError::NotFound(format!("User '{name}' not found")));
    }

    tracing::info!(name = %name, org = %organization, "User moved to organization");
    get_user_by_name(db, name)
}

/// Delete a user and all associated API keys (cascade).
pub fn delete_user(db: &Database, name: &str) -> Result<(), AppError> {
    let deleted =
        db.with_conn(|conn| conn.execute("DELETE FROM users WHERE name = ?1", params![name]))?;

    if deleted == 0 {
        return Err(AppError::NotFound(format!("User '{name}' not found")));
    }

    tracing::info!(name = %name, "User deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// API key CRUD
// ---------------------------------------------------------------------------

const KEY_COLUMNS: &str = "id, key_hash, key_prefix, name, model_list, user_id, \
                           organization_id, created_at, expires_at";

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<AuthorizationKey> {
    let model_list: String = row.get(4)?;
    Ok(AuthorizationKey {
        id: row.get(0)?,
        key_hash: row.get(1)?,
        key_prefix: row.get(2)?,
        name: row.get(3)?,
        models: parse_model_list(&model_list),
        user_id: row.get(5)?,
        organization_id: row.get(6)?,
        created_at: row.get(7)?,
        expires_at: row.get(8)?,
    })
}

/// Issue a key for `new.user` under `new.organization`. The plaintext is
/// returned here and never again.
pub fn create_api_key(db: &Database, new: &NewApiKey) -> Result<CreatedApiKey, AppError> {
    let org = get_organization_by_name(db, &new.organization)?;
    let user = get_user_by_name(db, &new.user)?;
    if user.organization_id != org.id {
        return Err(AppError::BadRequest(format!(
            "User '{}' does not belong to organization '{}'",
            new.user, new.organization
        )));
    }
    if new.models.is_empty() || new.models.iter().any(|m| m.contains(',') || m.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "Model list must be non-empty and names must not contain commas".into(),
        ));
    }

    let created_at = Utc::now();
    let lifetime = new.expires_in_days.unwrap_or(DEFAULT_KEY_LIFETIME_DAYS);
    let expires_at = if lifetime > 0 {
        let expiry = Duration::try_days(lifetime)
            .and_then(|d| created_at.checked_add_signed(d))
            .ok_or_else(|| AppError::BadRequest("expires_in_days out of range".into()))?;
        Some(expiry)
    } else {
        None
    };

    let GeneratedKey {
        plaintext,
        hash,
        prefix,
    } = keys::generate_api_key();

    let info = AuthorizationKey {
        id: Uuid::new_v4().to_string(),
        key_hash: hash,
        key_prefix: prefix,
        name: new.name.clone(),
        user_id: user.id,
        organization_id: org.id,
        models: new.models.clone(),
        created_at,
        expires_at,
    };

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO api_keys (id, key_hash, key_prefix, name, model_list, user_id, \
             organization_id, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                info.id,
                info.key_hash,
                info.key_prefix,
                info.name,
                info.models.join(","),
                info.user_id,
                info.organization_id,
                info.created_at,
                info.expires_at,
            ],
        )
    })?;

    tracing::info!(
        key_id = %info.id,
        user = %new.user,
        prefix = %info.key_prefix,
        expires_at = ?info.expires_at,
        "API key created"
    );

    Ok(CreatedApiKey { info, plaintext })
}

/// List keys, optionally restricted to one user. Includes expired keys.
pub fn list_api_keys(db: &Database, user: Option<&str>) -> Result<Vec<AuthorizationKey>, AppError> {
    let user_id = match user {
        Some(name) => Some(get_user_by_name(db, name)?.id),
        None => None,
    };

    let keys = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM api_keys \
             WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![user_id], key_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(keys)
}

pub fn delete_api_key(db: &Database, key_id: &str) -> Result<(), AppError> {
    let deleted =
        db.with_conn(|conn| conn.execute("DELETE FROM api_keys WHERE id = ?1", params![key_id]))?;

    if deleted == 0 {
        return Err(AppError::NotFound(format!("API key '{key_id}' not found")));
    }

    tracing::info!(key_id = %key_id, "API key deleted");
    Ok(())
}

impl KeyStore for Database {
    fn get_all_valid_keys(&self) -> Result<Vec<AuthorizationKey>, PersistenceError> {
        let now = Utc::now();
        let keys = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {KEY_COLUMNS} FROM api_keys \
                 WHERE expires_at IS NULL OR expires_at > ?1"
            ))?;
            let rows = stmt.query_map(params![now], key_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seeded() -> Database {
        let db = test_db();
        create_organization(&db, "acme").unwrap();
        create_user(&db, "alice", "acme").unwrap();
        db
    }

    fn new_key(models: &[&str], expires_in_days: Option<i64>) -> NewApiKey {
        NewApiKey {
            name: "test key".into(),
            models: models.iter().map(|s| s.to_string()).collect(),
            user: "alice".into(),
            organization: "acme".into(),
            expires_in_days,
        }
    }

    #[test]
    fn test_create_and_get_organization() {
        let db = test_db();
        let org = create_organization(&db, "acme").unwrap();
        let fetched = get_organization_by_name(&db, "acme").unwrap();
        assert_eq!(fetched.id, org.id);
    }

    #[test]
    fn test_duplicate_organization_conflicts() {
        let db = test_db();
        create_organization(&db, "acme").unwrap();
        let err = create_organization(&db, "acme").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_rename_organization() {
        let db = test_db();
        let org = create_organization(&db, "acme").unwrap();
        let renamed = rename_organization(&db, "acme", "acme-2").unwrap();
        assert_eq!(renamed.id, org.id);
        assert!(matches!(
            get_organization_by_name(&db, "acme"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_missing_organization() {
        let db = test_db();
        let err = rename_organization(&db, "nope", "other").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_delete_organization_cascades() {
        let db = seeded();
        create_api_key(&db, &new_key(&["*"], None)).unwrap();

        delete_organization(&db, "acme").unwrap();
        assert!(list_users(&db).unwrap().is_empty());
        assert!(list_api_keys(&db, None).unwrap().is_empty());
        assert!(list_organizations(&db).unwrap().is_empty());
    }

    #[test]
    fn test_create_user_requires_organization() {
        let db = test_db();
        let err = create_user(&db, "alice", "missing").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_create_user_duplicate_name() {
        let db = seeded();
        let err = create_user(&db, "alice", "acme").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_set_user_organization() {
        let db = seeded();
        let other = create_organization(&db, "globex").unwrap();
        let user = set_user_organization(&db, "alice", "globex").unwrap();
        assert_eq!(user.organization_id, other.id);
    }

    #[test]
    fn test_delete_user_cascades_api_keys() {
        let db = seeded();
        create_api_key(&db, &new_key(&["*"], None)).unwrap();
        create_api_key(&db, &new_key(&["gpt4-group"], None)).unwrap();

        delete_user(&db, "alice").unwrap();
        assert!(list_api_keys(&db, None).unwrap().is_empty());
        assert!(matches!(delete_user(&db, "alice"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_create_api_key_defaults() {
        let db = seeded();
        let created = create_api_key(&db, &new_key(&["gpt4-group", "claude"], None)).unwrap();

        assert!(created.plaintext.starts_with("sk-janus-"));
        assert_eq!(created.info.key_hash, keys::hash_key(&created.plaintext));
        let expires = created.info.expires_at.unwrap();
        assert_eq!((expires - created.info.created_at).num_days(), DEFAULT_KEY_LIFETIME_DAYS);

        let listed = list_api_keys(&db, Some("alice")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].models, vec!["gpt4-group", "claude"]);
        assert_eq!(listed[0].expires_at, created.info.expires_at);
    }

    #[test]
    fn test_create_api_key_never_expires() {
        let db = seeded();
        let created = create_api_key(&db, &new_key(&["*"], Some(0))).unwrap();
        assert!(created.info.expires_at.is_none());
    }

    #[test]
    fn test_create_api_key_lifetime_out_of_range() {
        let db = seeded();
        for days in [i64::MAX / 2, i64::MAX, 1_000_000_000] {
            assert!(matches!(
                create_api_key(&db, &new_key(&["*"], Some(days))),
                Err(AppError::BadRequest(_))
            ));
        }
        assert!(list_api_keys(&db, None).unwrap().is_empty());
    }

    #[test]
    fn test_create_api_key_user_outside_organization() {
        let db = seeded();
        create_organization(&db, "globex").unwrap();
        let mut req = new_key(&["*"], None);
        req.organization = "globex".into();
        assert!(matches!(
            create_api_key(&db, &req),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_create_api_key_rejects_comma_in_model() {
        let db = seeded();
        assert!(create_api_key(&db, &new_key(&["a,b"], None)).is_err());
        assert!(create_api_key(&db, &new_key(&[], None)).is_err());
    }

    #[test]
    fn test_delete_api_key() {
        let db = seeded();
        let created = create_api_key(&db, &new_key(&["*"], None)).unwrap();
        delete_api_key(&db, &created.info.id).unwrap();
        assert!(list_api_keys(&db, None).unwrap().is_empty());
        assert!(matches!(
            delete_api_key(&db, &created.info.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_all_valid_keys_excludes_expired() {
        let db = seeded();
        let live = create_api_key(&db, &new_key(&["*"], None)).unwrap();
        let forever = create_api_key(&db, &new_key(&["*"], Some(0))).unwrap();
        let stale = create_api_key(&db, &new_key(&["*"], None)).unwrap();

        let past = Utc::now() - Duration::days(1);
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE api_keys SET expires_at = ?1 WHERE id = ?2",
                params![past, stale.info.id],
            )
        })
        .unwrap();

        let valid: Vec<String> = db
            .get_all_valid_keys()
            .unwrap()
            .into_iter()
            .map(|k| k.id)
            .collect();
        assert_eq!(valid.len(), 2);
        assert!(valid.contains(&live.info.id));
        assert!(valid.contains(&forever.info.id));
    }
}
