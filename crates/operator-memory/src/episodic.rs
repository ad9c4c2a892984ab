use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, json_column, storage, to_ts, ts_column};

/// An append-only record of something that happened in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicEvent {
    /// Insertion sequence; higher is more recent.
    pub seq: i64,
    pub subject: String,
    pub event_type: String,
    pub summary: String,
    pub details: Option<String>,
    pub actor: String,
    /// Hierarchical tag path, e.g. `["conversation", "attendance"]`.
    pub tree_path: Vec<String>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// A new episodic event before it is assigned a sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEpisodicEvent {
    pub event_type: String,
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    pub actor: String,
    #[serde(default)]
    pub tree_path: Vec<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewEpisodicEvent {
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            summary: summary.into(),
            details: None,
            actor: actor.into(),
            tree_path: Vec::new(),
            occurred_at: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_path(mut self, path: &[String]) -> Self {
        self.tree_path = path.to_vec();
        self
    }
}

const PATH_SEP: &str = "/";

const EVENT_COLUMNS: &str =
    "seq, subject, event_type, summary, details, actor, tree_path, occurred_at, metadata";

impl SqliteStore {
    /// Append an event. Events are never updated afterwards.
    pub fn append_episodic(&self, subject: &str, event: &NewEpisodicEvent) -> Result<i64> {
        if event.event_type.trim().is_empty() || event.summary.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "episodic event needs an event type and a summary".into(),
            ));
        }
        if event.tree_path.iter().any(|seg| seg.contains(PATH_SEP)) {
            return Err(OperatorError::InvalidParameter(format!(
                "tree path segments must not contain '{PATH_SEP}'"
            )));
        }
        let occurred_at = event.occurred_at.unwrap_or_else(Utc::now);
        let db = self.db();
        db.execute(
            "INSERT INTO episodic_memory (subject, event_type, summary, details, actor, tree_path, occurred_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                subject,
                event.event_type,
                event.summary,
                event.details,
                event.actor,
                event.tree_path.join(PATH_SEP),
                to_ts(&occurred_at),
                serde_json::to_string(&event.metadata)?,
            ],
        )
        .map_err(storage)?;
        Ok(db.last_insert_rowid())
    }

    /// The `limit` most recently appended events, newest first.
    pub fn query_recent_episodic(&self, subject: &str, limit: usize) -> Result<Vec<EpisodicEvent>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM episodic_memory
                 WHERE subject = ?1 ORDER BY seq DESC LIMIT ?2"
            ),
            rusqlite::params![subject, limit as i64],
        )
    }

    /// Events whose tag path equals `prefix` or lies beneath it, newest first.
    pub fn episodic_by_path(
        &self,
        subject: &str,
        prefix: &[String],
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        if prefix.is_empty() {
            return self.query_recent_episodic(subject, limit);
        }
        let exact = prefix.join(PATH_SEP);
        let nested = format!("{exact}{PATH_SEP}");
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM episodic_memory
                 WHERE subject = ?1 AND (tree_path = ?2 OR substr(tree_path, 1, ?3) = ?4)
                 ORDER BY seq DESC LIMIT ?5"
            ),
            rusqlite::params![
                subject,
                exact,
                nested.chars().count() as i64,
                nested,
                limit as i64
            ],
        )
    }

    /// Events whose summary or details contain `keyword`, newest first.
    pub fn search_episodic(
        &self,
        subject: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM episodic_memory
                 WHERE subject = ?1
                   AND (instr(lower(summary), lower(?2)) > 0
                        OR instr(lower(coalesce(details, '')), lower(?2)) > 0)
                 ORDER BY seq DESC LIMIT ?3"
            ),
            rusqlite::params![subject, keyword, limit as i64],
        )
    }

    /// Events of `event_type` whose summary is exactly `summary`.
    pub fn count_matching_episodic(&self, subject: &str, event_type: &str, summary: &str) -> Result<usize> {
        let db = self.db();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM episodic_memory
                 WHERE subject = ?1 AND event_type = ?2 AND summary = ?3",
                rusqlite::params![subject, event_type, summary],
                |row| row.get(0),
            )
            .map_err(storage)?;
        Ok(count as usize)
    }

    pub fn episodic_count(&self, subject: &str) -> Result<usize> {
        let db = self.db();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM episodic_memory WHERE subject = ?1",
                rusqlite::params![subject],
                |row| row.get(0),
            )
            .map_err(storage)?;
        Ok(count as usize)
    }

    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<EpisodicEvent>> {
        let db = self.db();
        let mut stmt = db.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, |row| {
                let path: String = row.get(6)?;
                Ok(EpisodicEvent {
                    seq: row.get(0)?,
                    subject: row.get(1)?,
                    event_type: row.get(2)?,
                    summary: row.get(3)?,
                    details: row.get(4)?,
                    actor: row.get(5)?,
                    tree_path: if path.is_empty() {
                        Vec::new()
                    } else {
                        path.split(PATH_SEP).map(String::from).collect()
                    },
                    occurred_at: ts_column(row, 7)?,
                    metadata: json_column(row, 8)?,
                })
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }
}
