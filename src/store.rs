//! Narrow persistence seams used by the key cache and the spend pipeline.
//!
//! `Database` implements both traits; tests substitute in-memory fakes.

use crate::auth::AuthorizationKey;
use crate::spend::SpendRecord;

/// Failure talking to the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Rejected(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => Self::Corrupt(err.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Source of the authorization keys mirrored by `KeyCache`.
pub trait KeyStore: Send + Sync {
    /// Every key that has not expired (or never expires) as of now.
    fn get_all_valid_keys(&self) -> Result<Vec<AuthorizationKey>, PersistenceError>;
}

/// Durable sink for batched spend records.
pub trait SpendStore: Send + Sync {
    /// Insert all records in one transaction. Returns the number written.
    fn batch_insert_spend(&self, records: &[SpendRecord]) -> Result<usize, PersistenceError>;
}
