use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, json_column, now_ts, storage, ts_column};

/// A named concept or entity the subject has talked about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub subject: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptInput {
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_category() -> String {
    "general".into()
}

impl ConceptInput {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: default_category(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// A directed, typed link between two concepts of the same subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub strength: f64,
}

const CONCEPT_COLUMNS: &str = "id, subject, name, description, category, metadata, updated_at";

impl SqliteStore {
    /// Create or update a concept by `(subject, name)`.
    pub fn upsert_concept(&self, subject: &str, input: &ConceptInput) -> Result<Concept> {
        if input.name.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "concept name must not be empty".into(),
            ));
        }
        let now = now_ts();
        {
            let db = self.db();
            db.execute(
                "INSERT INTO semantic_memory (id, subject, name, description, category, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(subject, name) DO UPDATE SET
                    description = excluded.description,
                    category = excluded.category,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    subject,
                    input.name,
                    input.description,
                    input.category,
                    serde_json::to_string(&input.metadata)?,
                    now,
                ],
            )
            .map_err(storage)?;
        }
        self.get_concept(subject, &input.name)?
            .ok_or_else(|| OperatorError::Memory(format!("concept '{}' vanished", input.name)))
    }

    pub fn get_concept(&self, subject: &str, name: &str) -> Result<Option<Concept>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {CONCEPT_COLUMNS} FROM semantic_memory WHERE subject = ?1 AND name = ?2"
            ),
            rusqlite::params![subject, name],
            concept_from_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Most recently updated concepts first.
    pub fn list_concepts(&self, subject: &str, limit: usize) -> Result<Vec<Concept>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {CONCEPT_COLUMNS} FROM semantic_memory
                 WHERE subject = ?1 ORDER BY updated_at DESC, rowid DESC LIMIT ?2"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(rusqlite::params![subject, limit as i64], concept_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    /// Link two existing concepts. Re-relating the same pair and type
    /// updates the strength.
    pub fn relate(&self, subject: &str, relation: &Relation) -> Result<()> {
        for name in [&relation.source, &relation.target] {
            if self.get_concept(subject, name)?.is_none() {
                return Err(OperatorError::NotFound(format!("concept '{name}'")));
            }
        }
        let db = self.db();
        db.execute(
            "INSERT INTO semantic_relations (id, subject, source, target, relation_type, strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(subject, source, target, relation_type) DO UPDATE SET
                strength = excluded.strength",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                subject,
                relation.source,
                relation.target,
                relation.relation_type,
                relation.strength,
                now_ts(),
            ],
        )
        .map_err(storage)?;
        Ok(())
    }

    /// Relations touching `name` in either direction.
    pub fn relations_of(&self, subject: &str, name: &str) -> Result<Vec<Relation>> {
        let db = self.db();
        let mut stmt = db
            .prepare(
                "SELECT source, target, relation_type, strength FROM semantic_relations
                 WHERE subject = ?1 AND (source = ?2 OR target = ?2)
                 ORDER BY strength DESC, rowid",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(rusqlite::params![subject, name], |row| {
                Ok(Relation {
                    source: row.get(0)?,
                    target: row.get(1)?,
                    relation_type: row.get(2)?,
                    strength: row.get(3)?,
                })
            })
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    /// Concepts reachable from `name` within `depth` hops, nearest first.
    /// Relations are walked in both directions.
    pub fn related(&self, subject: &str, name: &str, depth: usize) -> Result<Vec<(Concept, usize)>> {
        let mut seen: HashSet<String> = HashSet::from([name.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(name.to_string(), 0)]);
        let mut found = Vec::new();

        while let Some((current, distance)) = queue.pop_front() {
            if distance == depth {
                continue;
            }
            for rel in self.relations_of(subject, &current)? {
                let next = if rel.source == current { rel.target } else { rel.source };
                if !seen.insert(next.clone()) {
                    continue;
                }
                if let Some(concept) = self.get_concept(subject, &next)? {
                    found.push((concept, distance + 1));
                }
                queue.push_back((next, distance + 1));
            }
        }
        Ok(found)
    }
}

fn concept_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Concept> {
    Ok(Concept {
        id: row.get(0)?,
        subject: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        metadata: json_column(row, 5)?,
        updated_at: ts_column(row, 6)?,
    })
}
