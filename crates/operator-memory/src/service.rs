use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use operator_config::MemoryConfig;
use operator_core::{Result, ToolCall};

use crate::core_memory::{CoreMemory, CoreMemoryUpdate};
use crate::dimension::Dimension;
use crate::episodic::{EpisodicEvent, NewEpisodicEvent};
use crate::extraction::{TOOL_SEQUENCE_EVENT, extract_concepts, tool_pattern, tool_procedure};
use crate::procedural::{Procedure, ProcedureInput};
use crate::resource::{Resource, ResourceInput};
use crate::semantic::{Concept, ConceptInput};
use crate::store::SqliteStore;
use crate::vault::{KnowledgeEntry, KnowledgeInput};

/// Rows scanned per dimension before keyword filtering.
const SCAN_LIMIT: usize = 200;
/// Characters kept in an episodic summary.
const SUMMARY_CHARS: usize = 120;

/// Context assembled from the memory dimensions for one turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryContext {
    pub subject: String,
    pub core: Option<CoreMemory>,
    /// Newest first.
    pub episodic: Vec<EpisodicEvent>,
    pub semantic: Vec<Concept>,
    pub procedural: Vec<Procedure>,
    pub resources: Vec<Resource>,
    pub knowledge: Vec<KnowledgeEntry>,
    /// Dimensions that failed or missed the read deadline.
    pub degraded: Vec<Dimension>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.core.is_none()
            && self.episodic.is_empty()
            && self.semantic.is_empty()
            && self.procedural.is_empty()
            && self.resources.is_empty()
            && self.knowledge.is_empty()
    }

    /// Format the context as prompt text. Empty sections are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(core) = &self.core {
            if !core.persona.is_empty() {
                out.push_str(&format!("## Persona\n{}\n\n", core.persona));
            }
            if !core.human.is_empty() {
                out.push_str(&format!("## About the user\n{}\n\n", core.human));
            }
        }

        if !self.episodic.is_empty() {
            out.push_str("## Recent conversation\n");
            for event in self.episodic.iter().rev() {
                out.push_str(&format!(
                    "- [{}] {}: {}\n",
                    event.occurred_at.format("%Y-%m-%d %H:%M"),
                    event.actor,
                    event.summary
                ));
            }
            out.push('\n');
        }

        if !self.semantic.is_empty() {
            out.push_str("## Known concepts\n");
            for c in &self.semantic {
                out.push_str(&format!("- {} ({}): {}\n", c.name, c.category, c.description));
            }
            out.push('\n');
        }

        if !self.procedural.is_empty() {
            out.push_str("## Procedures\n");
            for p in &self.procedural {
                let steps: Vec<String> = p
                    .steps
                    .iter()
                    .map(|s| format!("{}. {}", s.step_number, s.description))
                    .collect();
                out.push_str(&format!("- {}: {}\n", p.name, steps.join("; ")));
            }
            out.push('\n');
        }

        if !self.resources.is_empty() {
            out.push_str("## Resources\n");
            for r in &self.resources {
                out.push_str(&format!("- [{}] {} -> {}\n", r.kind, r.label, r.location));
            }
            out.push('\n');
        }

        if !self.knowledge.is_empty() {
            out.push_str("## Knowledge\n");
            for k in &self.knowledge {
                out.push_str(&format!(
                    "- {}/{}: {} (confidence {:.2})\n",
                    k.domain, k.topic, k.content, k.confidence
                ));
            }
            out.push('\n');
        }

        out.trim_end().to_string()
    }
}

enum Slice {
    Core(Option<CoreMemory>),
    Episodic(Vec<EpisodicEvent>),
    Semantic(Vec<Concept>),
    Procedural(Vec<Procedure>),
    Resource(Vec<Resource>),
    Knowledge(Vec<KnowledgeEntry>),
}

/// Async access to the six memory dimensions.
#[derive(Clone)]
pub struct SixDimensionMemory {
    store: SqliteStore,
    config: MemoryConfig,
    write_failures: Arc<AtomicU64>,
}

impl SixDimensionMemory {
    pub fn new(store: SqliteStore, config: MemoryConfig) -> Self {
        Self {
            store,
            config,
            write_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Best-effort writes that failed since startup.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    // ── Reads ──────────────────────────────────────────────────

    pub async fn read_core(&self, subject: &str) -> Result<Option<CoreMemory>> {
        let subject = subject.to_string();
        self.store.run_blocking(move |s| s.get_core(&subject)).await
    }

    pub async fn read_episodic(&self, subject: &str, limit: usize) -> Result<Vec<EpisodicEvent>> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.query_recent_episodic(&subject, limit))
            .await
    }

    pub async fn read_semantic(&self, subject: &str, query: &str) -> Result<Vec<Concept>> {
        let (subject, query, limit) = self.scan_args(subject, query);
        self.store
            .run_blocking(move |s| Ok(pick_relevant(s.list_concepts(&subject, SCAN_LIMIT)?, &query, limit)))
            .await
    }

    pub async fn read_procedural(&self, subject: &str, query: &str) -> Result<Vec<Procedure>> {
        let (subject, query, limit) = self.scan_args(subject, query);
        self.store
            .run_blocking(move |s| {
                Ok(pick_relevant(s.list_procedures(&subject, SCAN_LIMIT)?, &query, limit))
            })
            .await
    }

    pub async fn read_resources(&self, subject: &str, query: &str) -> Result<Vec<Resource>> {
        let (subject, query, limit) = self.scan_args(subject, query);
        self.store
            .run_blocking(move |s| Ok(pick_relevant(s.list_resources(&subject, SCAN_LIMIT)?, &query, limit)))
            .await
    }

    pub async fn read_knowledge(&self, subject: &str, query: &str) -> Result<Vec<KnowledgeEntry>> {
        let (subject, query, limit) = self.scan_args(subject, query);
        self.store
            .run_blocking(move |s| {
                Ok(pick_relevant(s.list_knowledge(&subject, None, SCAN_LIMIT)?, &query, limit))
            })
            .await
    }

    fn scan_args(&self, subject: &str, query: &str) -> (String, String, usize) {
        (subject.to_string(), query.to_string(), self.config.dimension_limit)
    }

    // ── Writes ─────────────────────────────────────────────────

    pub async fn write_core(&self, subject: &str, update: CoreMemoryUpdate) -> Result<CoreMemory> {
        let subject = subject.to_string();
        let mut update = update;
        let limit = self.config.core_block_limit;
        self.store
            .run_blocking(move |s| {
                // New rows take the configured block limit unless one is given.
                if s.get_core(&subject)?.is_none() {
                    update.persona_limit.get_or_insert(limit);
                    update.human_limit.get_or_insert(limit);
                }
                s.upsert_core(&subject, &update)
            })
            .await
    }

    pub async fn write_episodic(&self, subject: &str, event: NewEpisodicEvent) -> Result<i64> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.append_episodic(&subject, &event))
            .await
    }

    pub async fn write_semantic(&self, subject: &str, input: ConceptInput) -> Result<Concept> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.upsert_concept(&subject, &input))
            .await
    }

    pub async fn write_procedural(&self, subject: &str, input: ProcedureInput) -> Result<Procedure> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.upsert_procedure(&subject, &input))
            .await
    }

    pub async fn write_resource(&self, subject: &str, input: ResourceInput) -> Result<Resource> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.save_resource(&subject, &input))
            .await
    }

    pub async fn write_knowledge(&self, subject: &str, input: KnowledgeInput) -> Result<KnowledgeEntry> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.upsert_knowledge(&subject, &input))
            .await
    }

    /// Generic write by dimension name and JSON fields.
    pub async fn write_row(
        &self,
        dimension: Dimension,
        subject: &str,
        fields: serde_json::Value,
    ) -> Result<()> {
        let subject = subject.to_string();
        self.store
            .run_blocking(move |s| s.upsert_memory_row(dimension, &subject, &fields))
            .await
    }

    // ── Turn-level operations ──────────────────────────────────

    /// Read the requested dimensions concurrently, each under the configured
    /// deadline. Dimensions that fail or time out are recorded in
    /// `degraded` and left empty.
    pub async fn build_context(
        &self,
        subject: &str,
        dimensions: &[Dimension],
        query: &str,
    ) -> MemoryContext {
        let mut wanted = dimensions.to_vec();
        wanted.sort();
        wanted.dedup();

        let deadline = Duration::from_millis(self.config.read_timeout_ms);
        let reads = wanted.into_iter().map(|dimension| async move {
            let result =
                tokio::time::timeout(deadline, self.read_dimension(dimension, subject, query)).await;
            (dimension, result)
        });
        let results = futures::future::join_all(reads).await;

        let mut context = MemoryContext {
            subject: subject.to_string(),
            ..Default::default()
        };
        for (dimension, result) in results {
            match result {
                Ok(Ok(slice)) => match slice {
                    Slice::Core(core) => context.core = core,
                    Slice::Episodic(rows) => context.episodic = rows,
                    Slice::Semantic(rows) => context.semantic = rows,
                    Slice::Procedural(rows) => context.procedural = rows,
                    Slice::Resource(rows) => context.resources = rows,
                    Slice::Knowledge(rows) => context.knowledge = rows,
                },
                Ok(Err(e)) => {
                    warn!(subject = %subject, dimension = %dimension, error = %e, "memory read failed");
                    context.degraded.push(dimension);
                }
                Err(_) => {
                    warn!(
                        subject = %subject,
                        dimension = %dimension,
                        timeout_ms = self.config.read_timeout_ms,
                        "memory read timed out"
                    );
                    context.degraded.push(dimension);
                }
            }
        }
        context
    }

    async fn read_dimension(&self, dimension: Dimension, subject: &str, query: &str) -> Result<Slice> {
        Ok(match dimension {
            Dimension::Core => Slice::Core(self.read_core(subject).await?),
            Dimension::Episodic => {
                Slice::Episodic(self.read_episodic(subject, self.config.episodic_limit).await?)
            }
            Dimension::Semantic => Slice::Semantic(self.read_semantic(subject, query).await?),
            Dimension::Procedural => Slice::Procedural(self.read_procedural(subject, query).await?),
            Dimension::Resource => Slice::Resource(self.read_resources(subject, query).await?),
            Dimension::Knowledge => Slice::Knowledge(self.read_knowledge(subject, query).await?),
        })
    }

    /// Append the user message and the reply as episodic events, and note
    /// any domain concepts the user mentioned. Failures are logged and
    /// counted, never returned.
    pub async fn record_turn(
        &self,
        subject: &str,
        user_message: &str,
        reply: &str,
        tree_path: &[String],
    ) {
        let events = [
            NewEpisodicEvent::new("user_message", "user", summarize(user_message))
                .with_details(user_message)
                .with_path(tree_path),
            NewEpisodicEvent::new("assistant_reply", "assistant", summarize(reply))
                .with_details(reply)
                .with_path(tree_path),
        ];
        let owner = subject.to_string();
        let result = self
            .store
            .run_blocking(move |s| {
                for event in &events {
                    s.append_episodic(&owner, event)?;
                }
                Ok(())
            })
            .await;
        match result {
            Ok(()) => debug!(subject = %subject, "turn recorded"),
            Err(e) => self.note_failure(subject, Dimension::Episodic, &e),
        }

        if self.config.extract_concepts {
            self.learn_concepts(subject, user_message).await;
        }
    }

    /// Create concepts the message mentions. Existing concepts are left as
    /// they are.
    async fn learn_concepts(&self, subject: &str, message: &str) {
        let found = extract_concepts(message);
        if found.is_empty() {
            return;
        }
        let owner = subject.to_string();
        let mention = summarize(message);
        let result = self
            .store
            .run_blocking(move |s| {
                let mut created = 0;
                for rule in found {
                    if s.get_concept(&owner, rule.name)?.is_none() {
                        s.upsert_concept(&owner, &rule.to_input(&mention))?;
                        created += 1;
                    }
                }
                Ok(created)
            })
            .await;
        match result {
            Ok(0) => {}
            Ok(created) => debug!(subject = %subject, created, "concepts learned"),
            Err(e) => self.note_failure(subject, Dimension::Semantic, &e),
        }
    }

    /// Log the order in which tools were called. Once the same order has been
    /// seen `procedure_min_repeats` times it is kept as a procedure, and each
    /// later sighting reinforces it. Returns the procedure when one was
    /// created or reinforced.
    pub async fn record_tool_calls(
        &self,
        subject: &str,
        calls: &[ToolCall],
        tree_path: &[String],
    ) -> Option<Procedure> {
        if calls.is_empty() {
            return None;
        }
        let pattern = tool_pattern(calls);
        let event = NewEpisodicEvent::new(TOOL_SEQUENCE_EVENT, "assistant", pattern.clone())
            .with_path(tree_path);
        let calls = calls.to_vec();
        let threshold = self.config.procedure_min_repeats.max(1);
        let owner = subject.to_string();

        let result = self
            .store
            .run_blocking(move |s| {
                s.append_episodic(&owner, &event)?;
                let seen = s.count_matching_episodic(&owner, TOOL_SEQUENCE_EVENT, &pattern)?;
                if seen < threshold {
                    return Ok(None);
                }
                s.upsert_procedure(&owner, &tool_procedure(&calls, seen)).map(Some)
            })
            .await;
        match result {
            Ok(Some(procedure)) => {
                debug!(
                    subject = %subject,
                    procedure = %procedure.name,
                    reinforcement = procedure.reinforcement_count,
                    "procedure reinforced"
                );
                Some(procedure)
            }
            Ok(None) => None,
            Err(e) => {
                self.note_failure(subject, Dimension::Procedural, &e);
                None
            }
        }
    }

    /// Save a generated or uploaded artifact. Failures are logged and
    /// counted, never returned.
    pub async fn record_artifact(&self, subject: &str, input: ResourceInput) -> Option<Resource> {
        match self.write_resource(subject, input).await {
            Ok(resource) => {
                debug!(subject = %subject, location = %resource.location, "artifact recorded");
                Some(resource)
            }
            Err(e) => {
                self.note_failure(subject, Dimension::Resource, &e);
                None
            }
        }
    }

    fn note_failure(&self, subject: &str, dimension: Dimension, error: &operator_core::OperatorError) {
        let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            subject = %subject,
            dimension = %dimension,
            error = %error,
            failures,
            "memory write failed"
        );
    }
}

fn summarize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "(empty)".into();
    }
    match text.char_indices().nth(SUMMARY_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Fields a row is matched on when filtering by query.
trait Searchable {
    fn search_fields(&self) -> Vec<&str>;
}

impl Searchable for Concept {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.category.as_str(), self.description.as_str()]
    }
}

impl Searchable for Procedure {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.description.as_str()]
    }
}

impl Searchable for Resource {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.label.as_str()];
        fields.extend(self.summary.as_deref());
        fields.extend(self.tags.iter().map(String::as_str));
        fields
    }
}

impl Searchable for KnowledgeEntry {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.domain.as_str(), self.topic.as_str(), self.content.as_str()]
    }
}

/// Rows matching the query, or the first `limit` rows when none match.
fn pick_relevant<T: Searchable>(rows: Vec<T>, query: &str, limit: usize) -> Vec<T> {
    let query = query.to_lowercase();
    let terms: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .collect();

    let matches = |row: &T| {
        row.search_fields()
            .into_iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .any(|f| query.contains(&f) || terms.iter().any(|t| f.contains(t)))
    };

    if query.trim().is_empty() || !rows.iter().any(|r| matches(r)) {
        return rows.into_iter().take(limit).collect();
    }
    rows.into_iter().filter(|r| matches(r)).take(limit).collect()
}
