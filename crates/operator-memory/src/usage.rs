//! Usage ledger: one row per successful billed model call.

use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use operator_core::{ModelType, OperatorError, Result, UsageRecord, UsageSink, UsageTotals};

use crate::store::{SqliteStore, conversion, storage, to_ts, ts_column};

const USAGE_COLUMNS: &str = "request_id, subject, provider, model, usage_type, input_tokens,
    output_tokens, total_tokens, cost, duration_ms, recorded_at";

impl SqliteStore {
    pub fn insert_usage(&self, record: &UsageRecord) -> Result<()> {
        if record.request_id.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "usage record needs a request id".into(),
            ));
        }
        let db = self.db();
        db.execute(
            &format!("INSERT INTO usage_records ({USAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            rusqlite::params![
                record.request_id,
                record.subject,
                record.provider,
                record.model,
                record.usage_type.as_str(),
                record.input_tokens,
                record.output_tokens,
                record.total_tokens,
                record.cost,
                record.duration_ms as i64,
                to_ts(&record.recorded_at),
            ],
        )
        .map_err(storage)?;
        Ok(())
    }

    /// Most recent first, optionally for one subject.
    pub fn recent_usage(&self, subject: Option<&str>, limit: usize) -> Result<Vec<UsageRecord>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {USAGE_COLUMNS} FROM usage_records
                 WHERE ?1 IS NULL OR subject = ?1
                 ORDER BY recorded_at DESC, rowid DESC LIMIT ?2"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(rusqlite::params![subject, limit as i64], usage_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    /// Totals per model, sorted by model name.
    pub fn usage_by_model(&self) -> Result<Vec<(String, UsageTotals)>> {
        let db = self.db();
        let mut stmt = db
            .prepare(
                "SELECT model, COUNT(*), SUM(input_tokens), SUM(output_tokens), SUM(total_tokens), SUM(cost)
                 FROM usage_records GROUP BY model ORDER BY model",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    UsageTotals {
                        calls: row.get::<_, i64>(1)? as u64,
                        input_tokens: row.get::<_, i64>(2)? as u64,
                        output_tokens: row.get::<_, i64>(3)? as u64,
                        total_tokens: row.get::<_, i64>(4)? as u64,
                        cost: row.get(5)?,
                    },
                ))
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }
}

#[async_trait]
impl UsageSink for SqliteStore {
    async fn record_usage(&self, record: UsageRecord) -> Result<()> {
        let model = record.model.clone();
        self.run_blocking(move |store| store.insert_usage(&record)).await?;
        debug!(model = %model, "usage recorded");
        Ok(())
    }
}

fn usage_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    let usage_type: String = row.get(4)?;
    Ok(UsageRecord {
        request_id: row.get(0)?,
        subject: row.get(1)?,
        provider: row.get(2)?,
        model: row.get(3)?,
        usage_type: ModelType::from_str(&usage_type).map_err(|e| conversion(4, e))?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
        total_tokens: row.get(7)?,
        cost: row.get(8)?,
        duration_ms: row.get::<_, i64>(9)? as u64,
        recorded_at: ts_column(row, 10)?,
    })
}
