use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, conversion, json_column, now_ts, storage, ts_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Url,
    Image,
    Video,
    Document,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Url => "url",
            ResourceKind::Image => "image",
            ResourceKind::Video => "video",
            ResourceKind::Document => "document",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(ResourceKind::File),
            "url" => Ok(ResourceKind::Url),
            "image" => Ok(ResourceKind::Image),
            "video" => Ok(ResourceKind::Video),
            "document" => Ok(ResourceKind::Document),
            other => Err(OperatorError::InvalidParameter(format!(
                "unknown resource kind '{other}'"
            ))),
        }
    }
}

/// A reference to an external artifact. Rows are never mutated; a newer
/// row for the same location supersedes the older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub subject: String,
    pub kind: ResourceKind,
    pub label: String,
    pub location: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInput {
    pub kind: ResourceKind,
    pub label: String,
    pub location: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

const RESOURCE_COLUMNS: &str =
    "id, subject, kind, label, location, summary, tags, superseded_by, created_at";

impl SqliteStore {
    /// Save a resource reference, superseding any live row at the same location.
    pub fn save_resource(&self, subject: &str, input: &ResourceInput) -> Result<Resource> {
        if input.label.trim().is_empty() || input.location.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "resource needs a label and a location".into(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        let mut db = self.db();
        let tx = db.transaction().map_err(storage)?;
        tx.execute(
            "UPDATE resource_memory SET superseded_by = ?3
             WHERE subject = ?1 AND location = ?2 AND superseded_by IS NULL",
            rusqlite::params![subject, input.location, id],
        )
        .map_err(storage)?;
        tx.execute(
            "INSERT INTO resource_memory (id, subject, kind, label, location, summary, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                subject,
                input.kind.as_str(),
                input.label,
                input.location,
                input.summary,
                serde_json::to_string(&input.tags)?,
                now_ts(),
            ],
        )
        .map_err(storage)?;
        let saved = tx
            .query_row(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resource_memory WHERE id = ?1"),
                rusqlite::params![id],
                resource_from_row,
            )
            .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(saved)
    }

    /// Live (non-superseded) resources, newest first.
    pub fn list_resources(&self, subject: &str, limit: usize) -> Result<Vec<Resource>> {
        self.query_resources(
            &format!(
                "SELECT {RESOURCE_COLUMNS} FROM resource_memory
                 WHERE subject = ?1 AND superseded_by IS NULL
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            rusqlite::params![subject, limit as i64],
        )
    }

    /// Every row ever saved for a location, newest first.
    pub fn resource_history(&self, subject: &str, location: &str) -> Result<Vec<Resource>> {
        self.query_resources(
            &format!(
                "SELECT {RESOURCE_COLUMNS} FROM resource_memory
                 WHERE subject = ?1 AND location = ?2
                 ORDER BY created_at DESC, rowid DESC"
            ),
            rusqlite::params![subject, location],
        )
    }

    fn query_resources(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Resource>> {
        let db = self.db();
        let mut stmt = db.prepare(sql).map_err(storage)?;
        let rows = stmt
            .query_map(params, resource_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }
}

fn resource_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Resource> {
    let kind: String = row.get(2)?;
    Ok(Resource {
        id: row.get(0)?,
        subject: row.get(1)?,
        kind: ResourceKind::from_str(&kind).map_err(|e| conversion(2, e))?,
        label: row.get(3)?,
        location: row.get(4)?,
        summary: row.get(5)?,
        tags: json_column(row, 6)?,
        superseded_by: row.get(7)?,
        created_at: ts_column(row, 8)?,
    })
}
