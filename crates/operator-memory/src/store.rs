use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use operator_core::{
    ModelCapabilities, ModelConfig, ModelConfigStore, ModelParameters, ModelStatus, ModelType,
    OperatorError, Result,
};

/// SQLite persistence for the model-configuration table, the six memory
/// tables and the usage ledger. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS model_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        display_name TEXT NOT NULL,
        provider TEXT NOT NULL,
        model_type TEXT NOT NULL,
        endpoint_url TEXT NOT NULL,
        api_key TEXT,
        supports_tools INTEGER NOT NULL DEFAULT 0,
        supports_multimodal INTEGER NOT NULL DEFAULT 0,
        supports_images INTEGER NOT NULL DEFAULT 0,
        is_default INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        parameters TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_model_configs_name
        ON model_configs(name) WHERE deleted_at IS NULL;
    CREATE UNIQUE INDEX IF NOT EXISTS idx_model_configs_default
        ON model_configs(model_type)
        WHERE is_default = 1 AND status = 'active' AND deleted_at IS NULL;

    CREATE TABLE IF NOT EXISTS core_memory (
        subject TEXT PRIMARY KEY,
        persona TEXT NOT NULL DEFAULT '',
        persona_limit INTEGER NOT NULL,
        human TEXT NOT NULL DEFAULT '',
        human_limit INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT 'null',
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS episodic_memory (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        event_type TEXT NOT NULL,
        summary TEXT NOT NULL,
        details TEXT,
        actor TEXT NOT NULL,
        tree_path TEXT NOT NULL DEFAULT '',
        occurred_at TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT 'null'
    );
    CREATE INDEX IF NOT EXISTS idx_episodic_subject ON episodic_memory(subject, seq);

    CREATE TABLE IF NOT EXISTS semantic_memory (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT 'null',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(subject, name)
    );

    CREATE TABLE IF NOT EXISTS semantic_relations (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        source TEXT NOT NULL,
        target TEXT NOT NULL,
        relation_type TEXT NOT NULL,
        strength REAL NOT NULL DEFAULT 1.0,
        created_at TEXT NOT NULL,
        UNIQUE(subject, source, target, relation_type)
    );

    CREATE TABLE IF NOT EXISTS procedural_memory (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        steps TEXT NOT NULL,
        reinforcement_count INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_reinforced_at TEXT NOT NULL,
        UNIQUE(subject, name)
    );

    CREATE TABLE IF NOT EXISTS resource_memory (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        kind TEXT NOT NULL,
        label TEXT NOT NULL,
        location TEXT NOT NULL,
        summary TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        superseded_by TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_resource_location ON resource_memory(subject, location);

    CREATE TABLE IF NOT EXISTS knowledge_vault (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        domain TEXT NOT NULL,
        topic TEXT NOT NULL,
        content TEXT NOT NULL,
        source TEXT,
        confidence REAL NOT NULL DEFAULT 1.0,
        validated_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(subject, domain, topic)
    );

    CREATE TABLE IF NOT EXISTS usage_records (
        request_id TEXT PRIMARY KEY,
        subject TEXT,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        usage_type TEXT NOT NULL,
        input_tokens INTEGER NOT NULL,
        output_tokens INTEGER NOT NULL,
        total_tokens INTEGER NOT NULL,
        cost REAL NOT NULL,
        duration_ms INTEGER NOT NULL,
        recorded_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_usage_model ON usage_records(model, recorded_at);
    CREATE INDEX IF NOT EXISTS idx_usage_subject ON usage_records(subject, recorded_at);
";

const MODEL_COLUMNS: &str = "name, display_name, provider, model_type, endpoint_url, api_key,
    supports_tools, supports_multimodal, supports_images, is_default, status, parameters, updated_at";

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening operator store");

        let conn = Connection::open(path).map_err(storage)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(storage)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Lock the raw connection (for module-level queries).
    pub(crate) fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    /// Run a synchronous store operation on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| OperatorError::Storage(format!("blocking task failed: {e}")))?
    }

    // ── Model configuration ────────────────────────────────────

    /// All non-deleted rows regardless of status, sorted by name.
    pub fn all_model_configs(&self) -> Result<Vec<ModelConfig>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs WHERE deleted_at IS NULL ORDER BY name"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map([], model_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    pub fn active_model_configs(&self) -> Result<Vec<ModelConfig>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs
                 WHERE status = 'active' AND deleted_at IS NULL ORDER BY name"
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map([], model_from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    pub fn default_model(&self, model_type: ModelType) -> Result<Option<ModelConfig>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs
                 WHERE model_type = ?1 AND is_default = 1 AND status = 'active'
                   AND deleted_at IS NULL"
            ),
            rusqlite::params![model_type.as_str()],
            model_from_row,
        )
        .optional()
        .map_err(storage)
    }

    /// Insert or update a model row by name. When the row is an active
    /// default, any other default of the same type is cleared in the same
    /// transaction.
    pub fn upsert_model_config(&self, config: &ModelConfig) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "model name must not be empty".into(),
            ));
        }
        let parameters = serde_json::to_string(&config.parameters)?;
        let now = now_ts();

        let mut db = self.db();
        let tx = db.transaction().map_err(storage)?;
        if config.is_default && config.is_active() {
            tx.execute(
                "UPDATE model_configs SET is_default = 0, updated_at = ?3
                 WHERE model_type = ?1 AND name != ?2 AND is_default = 1 AND deleted_at IS NULL",
                rusqlite::params![config.model_type.as_str(), config.name, now],
            )
            .map_err(storage)?;
        }
        let updated = tx
            .execute(
                "UPDATE model_configs SET
                    display_name = ?2, provider = ?3, model_type = ?4, endpoint_url = ?5,
                    api_key = ?6, supports_tools = ?7, supports_multimodal = ?8,
                    supports_images = ?9, is_default = ?10, status = ?11, parameters = ?12,
                    updated_at = ?13
                 WHERE name = ?1 AND deleted_at IS NULL",
                rusqlite::params![
                    config.name,
                    config.display_name,
                    config.provider,
                    config.model_type.as_str(),
                    config.endpoint_url,
                    config.api_key,
                    config.capabilities.supports_tools,
                    config.capabilities.supports_multimodal,
                    config.capabilities.supports_images,
                    config.is_default,
                    config.status.as_str(),
                    parameters,
                    now,
                ],
            )
            .map_err(storage)?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO model_configs (name, display_name, provider, model_type, endpoint_url,
                    api_key, supports_tools, supports_multimodal, supports_images, is_default,
                    status, parameters, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                rusqlite::params![
                    config.name,
                    config.display_name,
                    config.provider,
                    config.model_type.as_str(),
                    config.endpoint_url,
                    config.api_key,
                    config.capabilities.supports_tools,
                    config.capabilities.supports_multimodal,
                    config.capabilities.supports_images,
                    config.is_default,
                    config.status.as_str(),
                    parameters,
                    now,
                ],
            )
            .map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        debug!(model = %config.name, updated = updated > 0, "model config saved");
        Ok(())
    }

    /// Make `name` the only default of its type.
    pub fn set_default(&self, name: &str) -> Result<ModelConfig> {
        let now = now_ts();
        {
            let mut db = self.db();
            let tx = db.transaction().map_err(storage)?;
            let row: Option<(String, String)> = tx
                .query_row(
                    "SELECT model_type, status FROM model_configs
                     WHERE name = ?1 AND deleted_at IS NULL",
                    rusqlite::params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(storage)?;
            let Some((model_type, status)) = row else {
                return Err(OperatorError::NotFound(format!("model '{name}'")));
            };
            if status != ModelStatus::Active.as_str() {
                return Err(OperatorError::InvalidParameter(format!(
                    "model '{name}' is {status}; only active models can be default"
                )));
            }
            tx.execute(
                "UPDATE model_configs SET is_default = 0, updated_at = ?2
                 WHERE model_type = ?1 AND is_default = 1 AND deleted_at IS NULL",
                rusqlite::params![model_type, now],
            )
            .map_err(storage)?;
            tx.execute(
                "UPDATE model_configs SET is_default = 1, updated_at = ?2
                 WHERE name = ?1 AND deleted_at IS NULL",
                rusqlite::params![name, now],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)?;
        }
        info!(model = %name, "default model changed");
        self.model_by_name(name)?
            .ok_or_else(|| OperatorError::NotFound(format!("model '{name}'")))
    }

    /// Soft-delete a row. Returns false when no live row has that name.
    pub fn soft_delete_model(&self, name: &str) -> Result<bool> {
        let db = self.db();
        let rows = db
            .execute(
                "UPDATE model_configs SET deleted_at = ?2, is_default = 0, updated_at = ?2
                 WHERE name = ?1 AND deleted_at IS NULL",
                rusqlite::params![name, now_ts()],
            )
            .map_err(storage)?;
        Ok(rows > 0)
    }

    pub fn model_by_name(&self, name: &str) -> Result<Option<ModelConfig>> {
        let db = self.db();
        db.query_row(
            &format!(
                "SELECT {MODEL_COLUMNS} FROM model_configs WHERE name = ?1 AND deleted_at IS NULL"
            ),
            rusqlite::params![name],
            model_from_row,
        )
        .optional()
        .map_err(storage)
    }
}

#[async_trait]
impl ModelConfigStore for SqliteStore {
    async fn find_active_model_configs(&self) -> Result<Vec<ModelConfig>> {
        self.run_blocking(|store| store.active_model_configs()).await
    }

    async fn find_default_model(&self, model_type: ModelType) -> Result<Option<ModelConfig>> {
        self.run_blocking(move |store| store.default_model(model_type))
            .await
    }
}

fn model_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelConfig> {
    let model_type: String = row.get(3)?;
    let status: String = row.get(10)?;
    let parameters: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(ModelConfig {
        name: row.get(0)?,
        display_name: row.get(1)?,
        provider: row.get(2)?,
        model_type: ModelType::from_str(&model_type).map_err(|e| conversion(3, e))?,
        endpoint_url: row.get(4)?,
        api_key: row.get(5)?,
        capabilities: ModelCapabilities {
            supports_tools: row.get(6)?,
            supports_multimodal: row.get(7)?,
            supports_images: row.get(8)?,
        },
        is_default: row.get(9)?,
        status: ModelStatus::from_str(&status).map_err(|e| conversion(10, e))?,
        parameters: serde_json::from_str::<ModelParameters>(&parameters)
            .map_err(|e| conversion(11, e))?,
        updated_at: parse_ts(&updated_at).ok(),
    })
}

// ── Shared helpers ─────────────────────────────────────────────

pub(crate) fn storage(e: rusqlite::Error) -> OperatorError {
    OperatorError::Storage(e.to_string())
}

pub(crate) fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Fixed-width UTC timestamps so lexical order matches time order.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Read a timestamp column, failing the row on malformed text.
pub(crate) fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion(idx, e))
}

/// Read a JSON text column.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, e))
}
