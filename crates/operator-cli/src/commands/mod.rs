use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use operator_config::{BridgeConfig, ConfigLoader, OperatorConfig, WarningSeverity};
use operator_core::{OperatorError, Result, tool::builtin_tools};
use operator_llm::{BridgeSettings, ModelBridge, ModelRegistry};
use operator_memory::{SixDimensionMemory, SqliteStore};
use operator_runtime::{
    AiOperator, OperatorDeps, OrganizationSnapshot, PromptCache, StaticOrganizationSource,
    ToolSelector,
};

mod chat;
mod media;
mod memory;
mod models;
mod select;
mod usage;

/// AI operator: model registry, provider bridge, tool selection and memory
#[derive(Parser)]
#[command(name = "operator", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to operator.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the model registry table
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Show which tools a query would be offered
    Select {
        /// The user query
        query: String,
        /// Caller role (admin, principal, teacher, parent)
        #[arg(short, long, default_value = "admin")]
        role: String,
        /// Maximum tools to offer (defaults to selector.max_tools)
        #[arg(short = 'n', long)]
        max_tools: Option<usize>,
        /// Print extracted features and per-tool scores
        #[arg(long)]
        explain: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run turns through the operator (one-shot, or interactive when no message is given)
    Chat {
        /// Message to send; omit for an interactive session
        message: Option<String>,
        /// Memory subject (user id)
        #[arg(short, long, default_value = "cli")]
        subject: String,
        /// Caller role
        #[arg(short, long, default_value = "admin")]
        role: String,
        /// Organization id
        #[arg(long)]
        org: Option<String>,
        /// Organization display name used in the prompt
        #[arg(long)]
        org_name: Option<String>,
        /// Use this model instead of the default
        #[arg(short, long)]
        model: Option<String>,
        /// Stream the reply
        #[arg(long)]
        stream: bool,
        /// Prompt mode: agent or direct
        #[arg(long, default_value = "agent")]
        mode: String,
    },
    /// Inspect and edit a subject's memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Generate an image with the default (or given) image model
    Image {
        prompt: String,
        /// Memory subject that keeps the generated images
        #[arg(long, default_value = "cli")]
        subject: String,
        /// Size as WIDTHxHEIGHT
        #[arg(short, long)]
        size: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        /// Number of images
        #[arg(short = 'n', long)]
        count: Option<u32>,
    },
    /// Submit a video generation task, or poll one with --task
    Video {
        /// Prompt for a new task
        prompt: Option<String>,
        /// Memory subject that keeps the finished video
        #[arg(long, default_value = "cli")]
        subject: String,
        /// Poll an existing task instead of submitting
        #[arg(long, conflicts_with = "prompt")]
        task: Option<String>,
        /// Reference image URL
        #[arg(long)]
        image: Option<String>,
        /// Duration in seconds
        #[arg(long)]
        duration: Option<u32>,
        /// Aspect ratio, e.g. 16:9
        #[arg(long)]
        ratio: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Synthesize speech with the default (or given) speech model
    Speak {
        text: String,
        /// File to write the audio to
        #[arg(short, long, default_value = "speech.mp3")]
        output: PathBuf,
        #[arg(long)]
        voice: Option<String>,
        /// Playback speed, 0.25 to 4.0
        #[arg(long)]
        speed: Option<f32>,
        /// Audio format (mp3, wav, ...)
        #[arg(long)]
        format: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Transcribe an audio file with the default (or given) speech model
    Transcribe {
        file: PathBuf,
        /// Language hint, e.g. zh or en
        #[arg(long)]
        language: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show recorded token usage and cost
    Usage {
        /// Only calls made for this subject
        #[arg(short, long)]
        subject: Option<String>,
        /// Recent calls to list
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Print recent calls as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Validate and list warnings instead of printing
        #[arg(long)]
        check: bool,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// List models (active only unless --all)
    List {
        /// Include inactive and testing rows
        #[arg(short, long)]
        all: bool,
        /// Filter by type (text, image, video, speech, multimodal, embedding)
        #[arg(short = 't', long = "type")]
        model_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Insert or update models from a TOML file with [[models]] tables
    Import { file: PathBuf },
    /// Make a model the only default of its type
    SetDefault { name: String },
    /// Soft-delete a model
    Remove { name: String },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print the context the operator would inject for a subject
    Show {
        subject: String,
        /// Keyword used to filter semantic/procedural/resource/knowledge rows
        #[arg(long, default_value = "")]
        query: String,
        /// Limit to these dimensions (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        dimensions: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Set the persona and/or human block of a subject's core memory
    Core {
        subject: String,
        #[arg(long)]
        persona: Option<String>,
        #[arg(long)]
        human: Option<String>,
    },
    /// Show recent episodic events
    History {
        subject: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug".to_string()
        } else if self.quiet {
            "error".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&config.logging.format, &log_level);

        match self.command {
            Commands::Models { action } => models::cmd_models(&config, action).await,
            Commands::Select {
                query,
                role,
                max_tools,
                explain,
                json,
            } => select::cmd_select(&config, &query, &role, max_tools, explain, json),
            Commands::Chat {
                message,
                subject,
                role,
                org,
                org_name,
                model,
                stream,
                mode,
            } => {
                let opts = chat::ChatOptions {
                    subject,
                    role,
                    organization_id: org,
                    organization_name: org_name,
                    model,
                    stream,
                    mode: mode.parse()?,
                };
                chat::cmd_chat(&config, message, opts).await
            }
            Commands::Memory { action } => memory::cmd_memory(&config, action).await,
            Commands::Image {
                prompt,
                subject,
                size,
                model,
                count,
            } => {
                let request = operator_llm::ImageRequest {
                    prompt,
                    size,
                    n: count,
                    model,
                };
                media::cmd_image(&config, &subject, request).await
            }
            Commands::Video {
                prompt,
                subject,
                task,
                image,
                duration,
                ratio,
                model,
            } => {
                let opts = media::VideoOptions {
                    subject,
                    image_url: image,
                    duration_secs: duration,
                    ratio,
                    model,
                };
                media::cmd_video(&config, prompt, task, opts).await
            }
            Commands::Speak {
                text,
                output,
                voice,
                speed,
                format,
                model,
            } => {
                let request = operator_llm::SpeechRequest {
                    input: text,
                    voice,
                    speed,
                    format,
                    model,
                };
                media::cmd_speak(&config, request, &output).await
            }
            Commands::Transcribe {
                file,
                language,
                model,
            } => media::cmd_transcribe(&config, &file, language, model).await,
            Commands::Usage {
                subject,
                limit,
                json,
            } => usage::cmd_usage(&config, subject, limit, json),
            Commands::Config { json, check } => {
                if check {
                    Self::cmd_config_check(&config, &config_loader)
                } else {
                    Self::cmd_config(&config, json)
                }
            }
        }
    }

    fn cmd_config(config: &OperatorConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            let text = toml::to_string_pretty(config)
                .map_err(|e| OperatorError::Configuration(e.to_string()))?;
            println!("{text}");
        }
        Ok(())
    }

    fn cmd_config_check(config: &OperatorConfig, loader: &ConfigLoader) -> Result<()> {
        println!("Checking {}", loader.path().display());
        let warnings = config.validate().map_err(OperatorError::Configuration)?;
        if warnings.is_empty() {
            println!("  {} configuration is valid", console::style("ok").green());
            return Ok(());
        }
        for w in &warnings {
            let label = match w.severity {
                WarningSeverity::Error => console::style("error").red(),
                WarningSeverity::Warning => console::style("warning").yellow(),
            };
            print!("  {label} {}: {}", w.field, w.message);
            match &w.hint {
                Some(hint) => println!(" ({hint})"),
                None => println!(),
            }
        }
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the resolved level.
fn init_tracing(format: &str, level: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .with_target(false)
            .init(),
    }
}

pub(crate) fn bridge_settings(config: &BridgeConfig) -> BridgeSettings {
    BridgeSettings {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        retry_delay: Duration::from_millis(config.retry_delay_ms),
        stream_buffer: config.stream_buffer,
    }
}

/// The store, registry, bridge and prompt cache opened from config, plus the
/// background registry refresh and cache sweeper that keep them current.
pub(crate) struct Services {
    pub store: SqliteStore,
    pub registry: Arc<ModelRegistry>,
    pub bridge: Arc<ModelBridge>,
    pub prompt_cache: Arc<PromptCache>,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl Services {
    pub async fn open(config: &OperatorConfig) -> Result<Self> {
        let store = open_store(config)?;
        let registry = Arc::new(ModelRegistry::new(Arc::new(store.clone())));
        registry.initialize().await?;
        info!(
            database = %config.database.path.display(),
            models = registry.snapshot().len(),
            "services ready"
        );
        let bridge = Arc::new(
            ModelBridge::with_default_adapters(Arc::clone(&registry), bridge_settings(&config.bridge))
                .with_usage_sink(Arc::new(store.clone())),
        );
        let prompt_cache = Arc::new(PromptCache::new(Duration::from_secs(config.prompt_cache.ttl_secs)));

        let cancel = CancellationToken::new();
        let background = vec![
            registry.spawn_refresh(
                Duration::from_secs(config.registry.refresh_interval_secs),
                cancel.child_token(),
            ),
            prompt_cache.spawn_sweeper(
                Duration::from_secs(config.prompt_cache.sweep_interval_secs),
                cancel.child_token(),
            ),
        ];
        Ok(Self {
            store,
            registry,
            bridge,
            prompt_cache,
            cancel,
            background,
        })
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.background.drain(..) {
            let _ = task.await;
        }
        debug!("background tasks stopped");
    }

    pub fn memory(&self, config: &OperatorConfig) -> SixDimensionMemory {
        SixDimensionMemory::new(self.store.clone(), config.memory.clone())
    }

    pub fn operator(&self, config: &OperatorConfig, organization: OrganizationSnapshot) -> AiOperator {
        let organizations = StaticOrganizationSource::new()
            .with_snapshot(organization.clone())
            .with_fallback(organization);
        AiOperator::new(OperatorDeps {
            registry: Arc::clone(&self.registry),
            bridge: Arc::clone(&self.bridge),
            memory: self.memory(config),
            prompt_cache: Arc::clone(&self.prompt_cache),
            selector: ToolSelector::new(config.selector.clone()),
            organizations: Arc::new(organizations),
            tools: builtin_tools(),
        })
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn open_store(config: &OperatorConfig) -> Result<SqliteStore> {
    if let Some(parent) = config.database.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
        debug!(dir = %parent.display(), "ensured database directory");
    }
    SqliteStore::open(&config.database.path)
}

/// Truncate to `max` characters, appending "..." if truncated.
pub(crate) fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    match flat.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
