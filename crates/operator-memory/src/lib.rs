//! # operator-memory
//!
//! SQLite persistence for the AI operator:
//!
//! - **Model configuration**: the registry's backing table, with a
//!   one-default-per-type invariant enforced by the schema.
//! - **Six memory dimensions**, all keyed by subject:
//!   core (persona/human blocks), episodic (append-only events),
//!   semantic (concepts + relations), procedural (reinforced skills),
//!   resource (superseded artifact references), and the knowledge vault.
//!
//! - **Usage ledger**: tokens and cost of every billed model call, written
//!   through the [`operator_core::UsageSink`] trait.
//!
//! [`SixDimensionMemory`] wraps the store for async callers and assembles
//! per-turn context under a read deadline.

pub mod core_memory;
pub mod dimension;
pub mod episodic;
pub mod extraction;
pub mod procedural;
pub mod resource;
pub mod semantic;
pub mod service;
pub mod store;
pub mod usage;
pub mod vault;

pub use core_memory::{CoreMemory, CoreMemoryUpdate};
pub use dimension::Dimension;
pub use episodic::{EpisodicEvent, NewEpisodicEvent};
pub use procedural::{Procedure, ProcedureInput, ProcedureStep};
pub use resource::{Resource, ResourceInput, ResourceKind};
pub use semantic::{Concept, ConceptInput, Relation};
pub use service::{MemoryContext, SixDimensionMemory};
pub use store::SqliteStore;
pub use vault::{KnowledgeEntry, KnowledgeInput};
