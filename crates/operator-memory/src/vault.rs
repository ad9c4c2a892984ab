use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, now_ts, parse_ts, storage, ts_column};

/// A curated, durable domain fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub subject: String,
    pub domain: String,
    pub topic: String,
    pub content: String,
    pub source: Option<String>,
    pub confidence: f64,
    pub validated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeInput {
    pub domain: String,
    pub topic: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl KnowledgeInput {
    pub fn new(
        domain: impl Into<String>,
        topic: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            topic: topic.into(),
            content: content.into(),
            source: None,
            confidence: full_confidence(),
        }
    }
}

const ENTRY_COLUMNS: &str =
    "id, subject, domain, topic, content, source, confidence, validated_at, updated_at";

fn check_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(OperatorError::InvalidParameter(format!(
            "confidence {confidence} is outside 0..=1"
        )));
    }
    Ok(())
}

impl SqliteStore {
    /// Create or update an entry by `(subject, domain, topic)`.
    pub fn upsert_knowledge(&self, subject: &str, input: &KnowledgeInput) -> Result<KnowledgeEntry> {
        if input.domain.trim().is_empty() || input.topic.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "knowledge entry needs a domain and a topic".into(),
            ));
        }
        check_confidence(input.confidence)?;
        let now = now_ts();
        let db = self.db();
        db.execute(
            "INSERT INTO knowledge_vault (id, subject, domain, topic, content, source, confidence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(subject, domain, topic) DO UPDATE SET
                content = excluded.content,
                source = excluded.source,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                subject,
                input.domain,
                input.topic,
                input.content,
                input.source,
                input.confidence,
                now,
            ],
        )
        .map_err(storage)?;
        db.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM knowledge_vault
                 WHERE subject = ?1 AND domain = ?2 AND topic = ?3"
            ),
            rusqlite::params![subject, input.domain, input.topic],
            entry_from_row,
        )
        .map_err(storage)
    }

    /// Re-score an entry after review and stamp it as validated.
    pub fn validate_knowledge(
        &self,
        subject: &str,
        id: &str,
        confidence: f64,
    ) -> Result<KnowledgeEntry> {
        check_confidence(confidence)?;
        let now = now_ts();
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE knowledge_vault SET confidence = ?3, validated_at = ?4, updated_at = ?4
                 WHERE subject = ?1 AND id = ?2",
                rusqlite::params![subject, id, confidence, now],
            )
            .map_err(storage)?;
        if rows == 0 {
            return Err(OperatorError::NotFound(format!("knowledge entry '{id}'")));
        }
        db.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM knowledge_vault WHERE id = ?1"),
            rusqlite::params![id],
            entry_from_row,
        )
        .optional()
        .map_err(storage)?
        .ok_or_else(|| OperatorError::NotFound(format!("knowledge entry '{id}'")))
    }

    /// Entries ordered by confidence, then recency. `domain` narrows the list.
    pub fn list_knowledge(
        &self,
        subject: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM knowledge_vault
                 WHERE subject = ?1 AND (?2 IS NULL OR domain = ?2)
                 ORDER BY confidence DESC, updated_at DESC, rowid DESC LIMIT ?3"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(rusqlite::params![subject, domain, limit as i64], entry_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let validated_at: Option<String> = row.get(7)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        subject: row.get(1)?,
        domain: row.get(2)?,
        topic: row.get(3)?,
        content: row.get(4)?,
        source: row.get(5)?,
        confidence: row.get(6)?,
        validated_at: validated_at.as_deref().and_then(|s| parse_ts(s).ok()),
        updated_at: ts_column(row, 8)?,
    })
}
