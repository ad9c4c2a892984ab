use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use operator_core::{OperatorError, Result};

use crate::core_memory::CoreMemoryUpdate;
use crate::episodic::NewEpisodicEvent;
use crate::procedural::ProcedureInput;
use crate::resource::ResourceInput;
use crate::semantic::ConceptInput;
use crate::store::SqliteStore;
use crate::vault::KnowledgeInput;

/// The six independently addressable memory tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Core,
    Episodic,
    Semantic,
    Procedural,
    Resource,
    Knowledge,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Core,
        Dimension::Episodic,
        Dimension::Semantic,
        Dimension::Procedural,
        Dimension::Resource,
        Dimension::Knowledge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Core => "core",
            Dimension::Episodic => "episodic",
            Dimension::Semantic => "semantic",
            Dimension::Procedural => "procedural",
            Dimension::Resource => "resource",
            Dimension::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OperatorError::InvalidParameter(format!("unknown memory dimension '{s}'")))
    }
}

fn fields_as<T: DeserializeOwned>(dimension: Dimension, fields: &serde_json::Value) -> Result<T> {
    serde_json::from_value(fields.clone()).map_err(|e| {
        OperatorError::InvalidParameter(format!("invalid {dimension} memory fields: {e}"))
    })
}

impl SqliteStore {
    /// Generic write entry point. `fields` is the JSON form of the
    /// dimension's input type; each dimension applies its own write rule
    /// (overwrite, append, create-or-update, supersede).
    pub fn upsert_memory_row(
        &self,
        dimension: Dimension,
        subject: &str,
        fields: &serde_json::Value,
    ) -> Result<()> {
        match dimension {
            Dimension::Core => {
                self.upsert_core(subject, &fields_as::<CoreMemoryUpdate>(dimension, fields)?)?;
            }
            Dimension::Episodic => {
                self.append_episodic(subject, &fields_as::<NewEpisodicEvent>(dimension, fields)?)?;
            }
            Dimension::Semantic => {
                self.upsert_concept(subject, &fields_as::<ConceptInput>(dimension, fields)?)?;
            }
            Dimension::Procedural => {
                self.upsert_procedure(subject, &fields_as::<ProcedureInput>(dimension, fields)?)?;
            }
            Dimension::Resource => {
                self.save_resource(subject, &fields_as::<ResourceInput>(dimension, fields)?)?;
            }
            Dimension::Knowledge => {
                self.upsert_knowledge(subject, &fields_as::<KnowledgeInput>(dimension, fields)?)?;
            }
        }
        Ok(())
    }
}
