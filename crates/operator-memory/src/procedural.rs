use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use operator_core::{OperatorError, Result};

use crate::store::{SqliteStore, json_column, now_ts, storage, ts_column};

/// One step of a learned procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub step_number: u32,
    pub description: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub expected_results: Vec<String>,
}

impl ProcedureStep {
    pub fn new(step_number: u32, description: impl Into<String>) -> Self {
        Self {
            step_number,
            description: description.into(),
            conditions: Vec::new(),
            actions: Vec::new(),
            expected_results: Vec::new(),
        }
    }
}

/// A named skill recognised from repeated action patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub subject: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<ProcedureStep>,
    pub reinforcement_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<ProcedureStep>,
}

const PROCEDURE_COLUMNS: &str =
    "id, subject, name, description, steps, reinforcement_count, created_at, last_reinforced_at";

impl SqliteStore {
    /// Record a procedure. The first write creates it; every later write for
    /// the same name replaces the steps and counts as a reinforcement.
    pub fn upsert_procedure(&self, subject: &str, input: &ProcedureInput) -> Result<Procedure> {
        if input.name.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "procedure name must not be empty".into(),
            ));
        }
        if input.steps.is_empty() {
            return Err(OperatorError::InvalidParameter(format!(
                "procedure '{}' has no steps",
                input.name
            )));
        }
        let mut numbers = HashSet::new();
        if let Some(dup) = input.steps.iter().find(|s| !numbers.insert(s.step_number)) {
            return Err(OperatorError::InvalidParameter(format!(
                "procedure '{}' repeats step {}",
                input.name, dup.step_number
            )));
        }
        let mut steps = input.steps.clone();
        steps.sort_by_key(|s| s.step_number);

        let now = now_ts();
        {
            let db = self.db();
            db.execute(
                "INSERT INTO procedural_memory (id, subject, name, description, steps, reinforcement_count, created_at, last_reinforced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                 ON CONFLICT(subject, name) DO UPDATE SET
                    description = excluded.description,
                    steps = excluded.steps,
                    reinforcement_count = procedural_memory.reinforcement_count + 1,
                    last_reinforced_at = excluded.last_reinforced_at",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    subject,
                    input.name,
                    input.description,
                    serde_json::to_string(&steps)?,
                    now,
                ],
            )
            .map_err(storage)?;
        }
        self.get_procedure(subject, &input.name)?
            .ok_or_else(|| OperatorError::Memory(format!("procedure '{}' vanished", input.name)))
    }

    pub fn get_procedure(&self, subject: &str, name: &str) -> Result<Option<Procedure>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {PROCEDURE_COLUMNS} FROM procedural_memory WHERE subject = ?1 AND name = ?2"
            ),
            rusqlite::params![subject, name],
            procedure_from_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Most recently reinforced first.
    pub fn list_procedures(&self, subject: &str, limit: usize) -> Result<Vec<Procedure>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {PROCEDURE_COLUMNS} FROM procedural_memory
                 WHERE subject = ?1 ORDER BY last_reinforced_at DESC, rowid DESC LIMIT ?2"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(rusqlite::params![subject, limit as i64], procedure_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }
}

fn procedure_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Procedure> {
    Ok(Procedure {
        id: row.get(0)?,
        subject: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        steps: json_column(row, 4)?,
        reinforcement_count: row.get::<_, i64>(5)? as u32,
        created_at: ts_column(row, 6)?,
        last_reinforced_at: ts_column(row, 7)?,
    })
}
