//! # operator-runtime
//!
//! The operator runtime: the per-turn loop that ties tool selection, prompt
//! assembly, memory and model access together.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!              │ TurnRequest  │  ← subject, role, message, organization
//!              └──────┬───────┘
//!                     ▼
//!              ┌──────────────┐
//!              │  AiOperator  │
//!              │              │
//!              │  1. Select   │  ← ToolSelector (keyword rules + boosts)
//!              │  2. Prompt   │  ← PromptCache, built on a miss
//!              │  3. Recall   │  ← six memory dimensions, bounded reads
//!              │  4. Think    │  ← ModelBridge, one alternate on failure
//!              │  5. Remember │  ← episodic write, best effort
//!              └──────────────┘
//!                     │
//!         ┌───────────┼───────────┐
//!         ▼           ▼           ▼
//!    ┌─────────┐ ┌─────────┐ ┌──────────┐
//!    │  Model  │ │ Memory  │ │  Prompt  │
//!    │ Bridge  │ │  Store  │ │  Cache   │
//!    └─────────┘ └─────────┘ └──────────┘
//! ```

pub mod operator;
pub mod prompt;
pub mod prompt_cache;
pub mod selector;

pub use operator::{AiOperator, OperatorDeps, TurnOutcome, TurnRequest};
pub use prompt::{
    OrganizationSnapshot, OrganizationSource, PromptMode, StaticOrganizationSource,
    build_system_prompt,
};
pub use prompt_cache::{CacheLookup, CacheStats, PromptCache, PromptContext};
pub use selector::{Explanation, Feature, FeatureSet, ToolScore, ToolSelector};
