use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Returned by `get_fallback_message` when a tenant has no ChatConfig.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't find an answer to that. Please try rephrasing your question.";

// Identity of a tenant. Every tenant-scoped query takes one of these, never an Option.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// An isolated customer account
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tenant {
    pub id: TenantId,
    pub slug: String,
    pub name: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_config: Option<ChatConfig>,
}

// Payload for `TenantRepository::upsert_by_slug`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewTenant {
    pub slug: String,
    pub name: String,
    pub api_key: String,
}

impl NewTenant {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            api_key: api_key.into(),
        }
    }
}

// Per-tenant chat behaviour, edited by tenant administration only
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatConfig {
    pub tenant_id: TenantId,
    pub fallback_message: String,
    pub updated_at: DateTime<Utc>,
}

/// Shape served by `GET /tenants/settings`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub fallback_message: String,
    /// True when the tenant has no ChatConfig and the system default is served.
    pub default_fallback: bool,
}

// A visitor of a tenant's chat widget
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EndUser {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatSession {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub end_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

// Represents a single message in a chat session. Append-only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Identifier handed back by the indexing service for one stored passage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct KnowledgeRecordId(pub String);

impl fmt::Display for KnowledgeRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// One ranked hit from a knowledge query
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KnowledgeMatch {
    pub id: KnowledgeRecordId,
    pub text: String,
    pub source_tag: String,
    pub score: f32,
}

/// Row counts across the schema, used by the `stats` diagnostic.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct StoreStats {
    pub tenants: i64,
    pub chat_configs: i64,
    pub end_users: i64,
    pub chat_sessions: i64,
    pub chat_messages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_its_column_value() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.as_str().parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn tenant_id_parses_and_displays_as_uuid() {
        let id = TenantId::new();
        let parsed: TenantId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TenantId>().is_err());
    }
}
