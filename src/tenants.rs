//! Tenant repository: upsert-by-slug seeding, lookups, and the per-tenant ChatConfig.

use crate::error::{tenant_reference, StoreError};
use crate::models::{ChatConfig, NewTenant, Tenant, TenantId, TenantSettings, DEFAULT_FALLBACK_MESSAGE};
use crate::storage::{from_millis, now_millis, parse_uuid, Database};

// Unique columns a tenant can be looked up by
#[derive(Debug, Clone, Copy)]
enum TenantKey {
    Id,
    Slug,
    ApiKey,
}

impl TenantKey {
    fn column(self) -> &'static str {
        match self {
            TenantKey::Id => "t.id",
            TenantKey::Slug => "t.slug",
            TenantKey::ApiKey => "t.api_key",
        }
    }

    fn entity_key(self, value: &str) -> String {
        match self {
            TenantKey::Id => value.to_string(),
            TenantKey::Slug => format!("slug={}", value),
            // never echo the secret itself
            TenantKey::ApiKey => "api_key=<redacted>".to_string(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    slug: String,
    name: String,
    api_key: String,
    created_at: i64,
    updated_at: i64,
    fallback_message: Option<String>,
    config_updated_at: Option<i64>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StoreError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let id = TenantId::from(parse_uuid(&row.id, "tenant id")?);
        let chat_config = match (row.fallback_message, row.config_updated_at) {
            (Some(fallback_message), Some(updated_at)) => Some(ChatConfig {
                tenant_id: id,
                fallback_message,
                updated_at: from_millis(updated_at, "chat_configs.updated_at")?,
            }),
            _ => None,
        };

        Ok(Tenant {
            id,
            slug: row.slug,
            name: row.name,
            api_key: row.api_key,
            created_at: from_millis(row.created_at, "tenants.created_at")?,
            updated_at: from_millis(row.updated_at, "tenants.updated_at")?,
            chat_config,
        })
    }
}

pub struct TenantRepository<'a> {
    db: &'a Database,
}

impl<'a> TenantRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Returns the tenant with `slug`, creating it if it does not exist yet.
    ///
    /// An existing tenant is returned unchanged, whatever `name` and `api_key`
    /// say. Creating a tenant whose api key belongs to another tenant fails
    /// with `ConstraintViolation`.
    pub async fn upsert_by_slug(&self, new_tenant: &NewTenant) -> Result<Tenant, StoreError> {
        validate_new_tenant(new_tenant)?;

        if let Some(existing) = self.fetch(TenantKey::Slug, &new_tenant.slug).await? {
            log::debug!("Tenant '{}' already exists ({})", existing.slug, existing.id);
            return Ok(existing);
        }

        let id = TenantId::new();
        let now = now_millis();
        // A concurrent seed of the same slug lands on the conflict clause; an
        // api key owned by someone else still raises a unique violation.
        let result = sqlx::query(
            r#"
            INSERT INTO tenants (id, slug, name, api_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(&new_tenant.slug)
        .bind(&new_tenant.name)
        .bind(&new_tenant.api_key)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            log::info!("Created tenant '{}' with ID: {}", new_tenant.slug, id);
        }

        self.find_by_slug(&new_tenant.slug).await
    }

    pub async fn find_by_id(&self, tenant_id: TenantId) -> Result<Tenant, StoreError> {
        self.get(TenantKey::Id, &tenant_id.to_string()).await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Tenant, StoreError> {
        self.get(TenantKey::Slug, slug).await
    }

    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Tenant, StoreError> {
        self.get(TenantKey::ApiKey, api_key).await
    }

    /// The tenant's configured fallback, or [`DEFAULT_FALLBACK_MESSAGE`] when it has no ChatConfig.
    pub async fn get_fallback_message(&self, tenant_id: TenantId) -> Result<String, StoreError> {
        let tenant = self.find_by_id(tenant_id).await?;
        Ok(effective_fallback(&tenant).0)
    }

    /// Creates or replaces the tenant's ChatConfig fallback message.
    pub async fn set_fallback_message(
        &self,
        tenant_id: TenantId,
        message: &str,
    ) -> Result<ChatConfig, StoreError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(StoreError::Validation(
                "fallback message must not be empty".to_string(),
            ));
        }

        let now = now_millis();
        sqlx::query(
            r#"
            INSERT INTO chat_configs (tenant_id, fallback_message, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE
            SET fallback_message = excluded.fallback_message, updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(message)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| tenant_reference(e, tenant_id))?;

        log::info!("Updated fallback message for tenant {}", tenant_id);
        Ok(ChatConfig {
            tenant_id,
            fallback_message: message.to_string(),
            updated_at: from_millis(now, "chat_configs.updated_at")?,
        })
    }

    pub async fn settings(&self, tenant_id: TenantId) -> Result<TenantSettings, StoreError> {
        let tenant = self.find_by_id(tenant_id).await?;
        let (fallback_message, default_fallback) = effective_fallback(&tenant);
        Ok(TenantSettings {
            tenant_id: tenant.id,
            name: tenant.name,
            slug: tenant.slug,
            fallback_message,
            default_fallback,
        })
    }

    async fn get(&self, key: TenantKey, value: &str) -> Result<Tenant, StoreError> {
        self.fetch(key, value)
            .await?
            .ok_or_else(|| StoreError::not_found("tenant", key.entity_key(value)))
    }

    async fn fetch(&self, key: TenantKey, value: &str) -> Result<Option<Tenant>, StoreError> {
        let sql = format!(
            r#"
            SELECT t.id, t.slug, t.name, t.api_key, t.created_at, t.updated_at,
                   c.fallback_message, c.updated_at AS config_updated_at
            FROM tenants t
            LEFT JOIN chat_configs c ON c.tenant_id = t.id
            WHERE {} = ?
            "#,
            key.column()
        );

        let row: Option<TenantRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(Tenant::try_from).transpose()
    }
}

fn validate_new_tenant(new_tenant: &NewTenant) -> Result<(), StoreError> {
    for (field, value) in [
        ("slug", &new_tenant.slug),
        ("name", &new_tenant.name),
        ("api_key", &new_tenant.api_key),
    ] {
        if value.trim().is_empty() {
            return Err(StoreError::Validation(format!("tenant {} must not be empty", field)));
        }
    }
    Ok(())
}

fn effective_fallback(tenant: &Tenant) -> (String, bool) {
    match &tenant.chat_config {
        Some(config) => (config.fallback_message.clone(), false),
        None => (DEFAULT_FALLBACK_MESSAGE.to_string(), true),
    }
}
