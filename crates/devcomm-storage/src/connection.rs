use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Deserializer};
use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Where the message store lives and how its pool behaves.
///
/// Durations are read from `*_ms` keys when deserialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; parent directories are created on connect
    pub path: String,

    pub max_connections: u32,
    pub min_connections: u32,

    #[serde(rename = "max_lifetime_ms", deserialize_with = "millis")]
    pub max_lifetime: Duration,

    #[serde(rename = "acquire_timeout_ms", deserialize_with = "millis")]
    pub acquire_timeout: Duration,

    /// How long a writer waits on a locked database
    #[serde(rename = "busy_timeout_ms", deserialize_with = "millis")]
    pub busy_timeout: Duration,

    pub create_if_missing: bool,

    /// Apply pending migrations on connect
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "devcomm.db".to_string(),
            max_connections: 10,
            min_connections: 2,
            max_lifetime: Duration::from_secs(30 * 60),
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
            create_if_missing: true,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn auto_migrate(mut self, migrate: bool) -> Self {
        self.auto_migrate = migrate;
        self
    }

    /// WAL journal, normal sync, statement logging off.
    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(self.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .disable_statement_logging()
    }

    fn ensure_parent_dir(&self) -> StorageResult<()> {
        let Some(parent) = Path::new(&self.path).parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Configuration(format!(
                "cannot create directory {} for the database: {e}",
                parent.display()
            ))
        })
    }
}

/// Pooled SQLite handle shared by the stores.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and migrate, if configured) the database at `config.path`.
    pub async fn connect(config: DatabaseConfig) -> StorageResult<Self> {
        if config.create_if_missing {
            config.ensure_parent_dir()?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .max_lifetime(Some(config.max_lifetime))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(config.connect_options())
            .await?;
        let db = Self { pool };

        if config.auto_migrate {
            db.migrate().await?;
        }
        info!(
            path = %config.path,
            max_connections = config.max_connections,
            migrated = config.auto_migrate,
            "database opened"
        );
        Ok(db)
    }

    /// Private migrated database on a single connection, for tests and tooling.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .disable_statement_logging();
        // a second connection would see a different, empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the migrations embedded from the workspace `migrations/` directory.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        debug!("migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round trip to the database.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = DatabaseConfig::new("gateway.db")
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(2))
            .busy_timeout(Duration::from_millis(500))
            .create_if_missing(false)
            .auto_migrate(false);

        assert_eq!(config.path, "gateway.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.busy_timeout, Duration::from_millis(500));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
        assert!(!config.create_if_missing);
        assert!(!config.auto_migrate);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            path = "data/msgs.db"
            max_connections = 4
            busy_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.path, "data/msgs.db");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.min_connections, 2);
        assert!(config.auto_migrate);
    }

    #[test]
    fn test_bare_file_name_needs_no_directory() {
        DatabaseConfig::new("devcomm.db").ensure_parent_dir().unwrap();
    }
}
