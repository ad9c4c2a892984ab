use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, json_column, now_ts, storage, ts_column};

/// Character limit applied when a block is first written without one.
pub const DEFAULT_BLOCK_LIMIT: usize = 2000;

/// Identity memory: who the assistant is and what it knows about the human.
/// One row per subject, overwritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMemory {
    pub subject: String,
    pub persona: String,
    pub persona_limit: usize,
    pub human: String,
    pub human_limit: usize,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Partial overwrite of a core row. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreMemoryUpdate {
    pub persona: Option<String>,
    pub persona_limit: Option<usize>,
    pub human: Option<String>,
    pub human_limit: Option<usize>,
    pub metadata: Option<serde_json::Value>,
}

impl CoreMemoryUpdate {
    pub fn persona(text: impl Into<String>) -> Self {
        Self {
            persona: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self {
            human: Some(text.into()),
            ..Default::default()
        }
    }
}

impl SqliteStore {
    pub fn get_core(&self, subject: &str) -> Result<Option<CoreMemory>> {
        let db = self.db();
        db.query_row(
            "SELECT subject, persona, persona_limit, human, human_limit, metadata, updated_at
             FROM core_memory WHERE subject = ?1",
            rusqlite::params![subject],
            |row| {
                Ok(CoreMemory {
                    subject: row.get(0)?,
                    persona: row.get(1)?,
                    persona_limit: row.get::<_, i64>(2)? as usize,
                    human: row.get(3)?,
                    human_limit: row.get::<_, i64>(4)? as usize,
                    metadata: json_column(row, 5)?,
                    updated_at: ts_column(row, 6)?,
                })
            },
        )
        .optional()
        .map_err(storage)
    }

    /// Overwrite the subject's core row, creating it on first write.
    /// Text longer than its block limit is truncated to the limit.
    pub fn upsert_core(&self, subject: &str, update: &CoreMemoryUpdate) -> Result<CoreMemory> {
        if update.persona_limit == Some(0) || update.human_limit == Some(0) {
            return Err(OperatorError::InvalidParameter(
                "core block limit must be positive".into(),
            ));
        }
        let existing = self.get_core(subject)?;
        let (persona, persona_limit, human, human_limit, metadata) = match existing {
            Some(c) => (c.persona, c.persona_limit, c.human, c.human_limit, c.metadata),
            None => (
                String::new(),
                DEFAULT_BLOCK_LIMIT,
                String::new(),
                DEFAULT_BLOCK_LIMIT,
                serde_json::Value::Null,
            ),
        };
        let persona_limit = update.persona_limit.unwrap_or(persona_limit);
        let human_limit = update.human_limit.unwrap_or(human_limit);
        let persona = truncate_chars(update.persona.as_deref().unwrap_or(&persona), persona_limit);
        let human = truncate_chars(update.human.as_deref().unwrap_or(&human), human_limit);
        let metadata = update.metadata.clone().unwrap_or(metadata);

        {
            let db = self.db();
            db.execute(
                "INSERT INTO core_memory (subject, persona, persona_limit, human, human_limit, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(subject) DO UPDATE SET
                    persona = excluded.persona,
                    persona_limit = excluded.persona_limit,
                    human = excluded.human,
                    human_limit = excluded.human_limit,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    subject,
                    persona,
                    persona_limit as i64,
                    human,
                    human_limit as i64,
                    serde_json::to_string(&metadata)?,
                    now_ts(),
                ],
            )
            .map_err(storage)?;
        }

        self.get_core(subject)?
            .ok_or_else(|| OperatorError::Memory(format!("core row for '{subject}' vanished")))
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("小朋友们好", 3), "小朋友");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
