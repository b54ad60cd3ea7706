//! Database connection management with lazy initialization.

use std::sync::LazyLock;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection mode: "mem://", "file://path" or "rocksdb://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "integration".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `INTEGRATION_DB_ENDPOINT` (default: `mem://`)
    /// - `INTEGRATION_DB_NAMESPACE` (default: `integration`)
    /// - `INTEGRATION_DB_DATABASE` (default: `main`)
    /// - `INTEGRATION_DB_USER` and `INTEGRATION_DB_PASSWORD` (optional, both or neither)
    pub fn from_env() -> Result<Self, DbError> {
        let mut cfg = Self::default();

        if let Some(endpoint) = env_non_empty("INTEGRATION_DB_ENDPOINT") {
            cfg.endpoint = endpoint;
        }
        if let Some(namespace) = env_non_empty("INTEGRATION_DB_NAMESPACE") {
            cfg.namespace = namespace;
        }
        if let Some(database) = env_non_empty("INTEGRATION_DB_DATABASE") {
            cfg.database = database;
        }

        match (
            env_non_empty("INTEGRATION_DB_USER"),
            env_non_empty("INTEGRATION_DB_PASSWORD"),
        ) {
            (Some(user), Some(password)) => cfg = cfg.with_credentials(user, password),
            (None, None) => {}
            _ => {
                return Err(DbError::Validation(
                    "INTEGRATION_DB_USER and INTEGRATION_DB_PASSWORD must be set together".into(),
                ));
            }
        }

        Ok(cfg)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Domain(#[from] integration_core::CoreError),
}

impl DbError {
    /// The storage engine rejected a transaction because a concurrent one
    /// touched the same record first.
    pub fn is_conflict(&self) -> bool {
        match self {
            DbError::Connection(e) => {
                let text = e.to_string().to_ascii_lowercase();
                text.contains("conflict") || text.contains("can be retried")
            }
            _ => false,
        }
    }
}

/// Initialize the database connection.
///
/// This should be called once at application startup before any database operations.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        // Select namespace and database
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
