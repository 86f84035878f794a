use crate::conversations::ConversationRepository;
use crate::error::StoreError;
use crate::models::{StoreStats, TenantId};
use crate::tenants::TenantRepository;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

// Schema, applied on every connect. Ids are UUID text, timestamps are Unix milliseconds.
const MIGRATIONS_SQL: &str = "
-- Tenants Table
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    api_key TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Chat configuration, zero or one per tenant
CREATE TABLE IF NOT EXISTS chat_configs (
    tenant_id TEXT PRIMARY KEY NOT NULL,
    fallback_message TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
);

-- Widget visitors
CREATE TABLE IF NOT EXISTS end_users (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    tenant_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (tenant_id, external_id),
    FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
);

-- One active session per (tenant, end user)
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    tenant_id TEXT NOT NULL,
    end_user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_activity_at INTEGER NOT NULL,
    UNIQUE (tenant_id, end_user_id),
    FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE,
    FOREIGN KEY (end_user_id) REFERENCES end_users(id) ON DELETE CASCADE
);

-- Messages, append-only. seq breaks created_at ties in insertion order.
CREATE TABLE IF NOT EXISTS chat_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE, -- UUID
    tenant_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL, -- 'user' or 'assistant'
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE,
    FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_chat_messages_tenant ON chat_messages(tenant_id);
";

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// sqlx SQLite URL, e.g. `sqlite://tenantchat.sqlite` or `sqlite::memory:`.
    pub url: String,
    pub max_connections: u32,
    /// How long a writer waits for another writer's lock before failing.
    pub busy_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://tenantchat.sqlite".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseSettings {
    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Explicit connection handle. Repositories borrow it; `close` releases it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool, creating the database file if needed, and applies the schema.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        log::info!("Connecting to database: {}", settings.url);

        let in_memory = settings.is_in_memory();
        let options = SqliteConnectOptions::from_str(&settings.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(settings.busy_timeout)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(settings.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        log::info!("Running database migrations...");
        pool.execute(MIGRATIONS_SQL).await?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    pub fn tenants(&self) -> TenantRepository<'_> {
        TenantRepository::new(self)
    }

    pub fn conversations(&self, max_page_size: u32) -> ConversationRepository<'_> {
        ConversationRepository::new(self, max_page_size)
    }

    /// Counts rows in every table.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let stats = sqlx::query_as::<_, StoreStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tenants) AS tenants,
                (SELECT COUNT(*) FROM chat_configs) AS chat_configs,
                (SELECT COUNT(*) FROM end_users) AS end_users,
                (SELECT COUNT(*) FROM chat_sessions) AS chat_sessions,
                (SELECT COUNT(*) FROM chat_messages) AS chat_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    /// Whether a tenant row exists.
    pub async fn tenant_exists(&self, tenant_id: TenantId) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenants WHERE id = ?")
            .bind(tenant_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub(crate) async fn require_tenant(&self, tenant_id: TenantId) -> Result<(), StoreError> {
        if self.tenant_exists(tenant_id).await? {
            Ok(())
        } else {
            Err(StoreError::tenant_not_found(tenant_id))
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection. Further use of the handle fails.
    pub async fn close(self) {
        log::info!("Closing database pool");
        self.pool.close().await;
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(value: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid {} timestamp: {}", column, value)))
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<uuid::Uuid, StoreError> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| StoreError::Corrupt(format!("invalid {} '{}': {}", column, value, e)))
}

#[cfg(test)]
pub(crate) fn memory_settings() -> DatabaseSettings {
    DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        ..DatabaseSettings::default()
    }
}

#[cfg(test)]
pub(crate) async fn memory_db() -> Database {
    Database::connect(&memory_settings())
        .await
        .expect("in-memory database")
}
