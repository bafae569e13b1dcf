use chrono::{DateTime, Utc};
use rusqlite::params;

use super::SpendRecord;
use crate::db::Database;
use crate::error::AppError;
use crate::store::{PersistenceError, SpendStore};

impl SpendStore for Database {
    fn batch_insert_spend(&self, records: &[SpendRecord]) -> Result<usize, PersistenceError> {
        if records.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO spend_log (request_id, key_hash, user_id, organization_id, \
                     model_group, spend, prompt_tokens, completion_tokens, total_tokens, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;

                for record in records {
                    stmt.execute(params![
                        record.request_id,
                        record.key_hash,
                        record.user_id,
                        record.organization_id,
                        record.model_group,
                        record.spend,
                        record.prompt_tokens,
                        record.completion_tokens,
                        record.total_tokens,
                        record.created_at,
                    ])?;
                }
            }
            tx.commit()
        })?;

        Ok(records.len())
    }
}

/// Spend records created within `[from, to]`, oldest first.
pub fn spend_in_range(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<SpendRecord>, AppError> {
    if from > to {
        return Err(AppError::BadRequest(
            "Range start must not be after range end".to_string(),
        ));
    }

    let records = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT request_id, key_hash, user_id, organization_id, model_group, spend, \
             prompt_tokens, completion_tokens, total_tokens, created_at \
             FROM spend_log WHERE created_at >= ?1 AND created_at <= ?2 \
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok(SpendRecord {
                request_id: row.get(0)?,
                key_hash: row.get(1)?,
                user_id: row.get(2)?,
                organization_id: row.get(3)?,
                model_group: row.get(4)?,
                spend: row.get(5)?,
                prompt_tokens: row.get(6)?,
                completion_tokens: row.get(7)?,
                total_tokens: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
    })?;
    Ok(records)
}
