use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use operator_core::tool::{ANY_QUERY, NAVIGATE_TO_PAGE, READ_DATA_RECORD, RENDER_COMPONENT};

/// Root configuration — maps to `operator.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub prompt_cache: PromptCacheConfig,
    pub bridge: BridgeConfig,
    pub selector: SelectorConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding model configs and memory tables.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("operator.db"),
        }
    }
}

// ── Model registry ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Seconds between background re-reads of the model table.
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
        }
    }
}

// ── Prompt cache ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptCacheConfig {
    /// Lifetime of a cached system prompt.
    pub ttl_secs: u64,
    /// How often expired entries are swept.
    pub sweep_interval_secs: u64,
}

impl Default for PromptCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

// ── Model bridge ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Deadline for a single provider attempt.
    pub request_timeout_secs: u64,
    /// Pause before the single retry of a transient failure.
    pub retry_delay_ms: u64,
    /// Capacity of the streaming chunk channel.
    pub stream_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            retry_delay_ms: 1000,
            stream_buffer: 256,
        }
    }
}

// ── Tool selector ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Default number of tools offered per turn.
    pub max_tools: usize,
    /// Base weight per tool. Also the tie-break order (higher first).
    pub weights: BTreeMap<String, f32>,
    /// Tools offered when the query is empty or nothing else is admissible.
    pub fallback_tools: Vec<String>,
    /// Per-role allowlist. Roles not listed may receive every tool.
    pub role_tools: BTreeMap<String, Vec<String>>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (READ_DATA_RECORD.to_string(), 4.0),
            (ANY_QUERY.to_string(), 3.0),
            (RENDER_COMPONENT.to_string(), 2.0),
            (NAVIGATE_TO_PAGE.to_string(), 1.0),
        ]);
        let role_tools = BTreeMap::from([(
            "parent".to_string(),
            vec![
                READ_DATA_RECORD.to_string(),
                RENDER_COMPONENT.to_string(),
                NAVIGATE_TO_PAGE.to_string(),
            ],
        )]);
        Self {
            max_tools: 3,
            weights,
            fallback_tools: vec![READ_DATA_RECORD.to_string()],
            role_tools,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Per-dimension read deadline during context assembly.
    pub read_timeout_ms: u64,
    /// Most-recent episodic events included in the context.
    pub episodic_limit: usize,
    /// Rows included from each of semantic/procedural/resource/vault.
    pub dimension_limit: usize,
    /// Default character limit of the persona and human blocks.
    pub core_block_limit: usize,
    /// Times a tool sequence must be seen before it becomes a procedure.
    pub procedure_min_repeats: usize,
    /// Record domain concepts mentioned by the user in semantic memory.
    pub extract_concepts: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 500,
            episodic_limit: 10,
            dimension_limit: 5,
            core_block_limit: 2000,
            procedure_min_repeats: 2,
            extract_concepts: true,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

const KNOWN_TOOLS: [&str; 4] = [READ_DATA_RECORD, ANY_QUERY, RENDER_COMPONENT, NAVIGATE_TO_PAGE];

impl OperatorConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.database.path.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "database.path".into(),
                message: "database path is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'operator.db'".into()),
            });
        }

        if self.registry.refresh_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "registry.refresh_interval_secs".into(),
                message: "refresh interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use at least 1 second; 60 is typical".into()),
            });
        }

        if self.prompt_cache.ttl_secs == 0 {
            warnings.push(ConfigWarning {
                field: "prompt_cache.ttl_secs".into(),
                message: "TTL is 0 — every lookup would miss".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        }
        if self.prompt_cache.sweep_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "prompt_cache.sweep_interval_secs".into(),
                message: "sweep interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        if self.bridge.request_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "bridge.request_timeout_secs".into(),
                message: "request timeout is 0 — every provider call would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 120".into()),
            });
        } else if self.bridge.request_timeout_secs > 600 {
            warnings.push(ConfigWarning {
                field: "bridge.request_timeout_secs".into(),
                message: format!(
                    "request timeout {}s is very long",
                    self.bridge.request_timeout_secs
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Callers wait up to twice this value when a retry happens".into()),
            });
        }
        if self.bridge.stream_buffer == 0 {
            warnings.push(ConfigWarning {
                field: "bridge.stream_buffer".into(),
                message: "stream buffer must be at least 1".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        if self.selector.max_tools == 0 {
            warnings.push(ConfigWarning {
                field: "selector.max_tools".into(),
                message: "max_tools is 0 — no tool would ever be offered".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        }
        let tool_lists = self
            .selector
            .weights
            .keys()
            .map(|t| ("selector.weights".to_string(), t))
            .chain(
                self.selector
                    .fallback_tools
                    .iter()
                    .map(|t| ("selector.fallback_tools".to_string(), t)),
            )
            .chain(self.selector.role_tools.iter().flat_map(|(role, tools)| {
                tools
                    .iter()
                    .map(move |t| (format!("selector.role_tools.{role}"), t))
            }));
        for (field, tool) in tool_lists {
            if !KNOWN_TOOLS.contains(&tool.as_str()) {
                warnings.push(ConfigWarning {
                    field,
                    message: format!("unknown tool '{tool}'"),
                    severity: WarningSeverity::Error,
                    hint: Some(format!("Known tools: {}", KNOWN_TOOLS.join(", "))),
                });
            }
        }
        if self.selector.fallback_tools.is_empty() {
            warnings.push(ConfigWarning {
                field: "selector.fallback_tools".into(),
                message: "no fallback tools — degraded turns get no tools".into(),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Use e.g. [\"{READ_DATA_RECORD}\"]")),
            });
        }

        if self.memory.read_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "memory.read_timeout_ms".into(),
                message: "read timeout is 0 — memory context would always be empty".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 500".into()),
            });
        }

        if self.memory.procedure_min_repeats == 0 {
            warnings.push(ConfigWarning {
                field: "memory.procedure_min_repeats".into(),
                message: "0 is treated as 1; every tool sequence becomes a procedure".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 2".into()),
            });
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
