//! Tenant-scoped data access for a multi-tenant chatbot backend.
//!
//! Tenants and their chat configuration, visitor conversations, and
//! knowledge ingestion into an external index. Every tenant-scoped call takes
//! an explicit [`TenantId`].

pub mod api;
pub mod commands;
pub mod config;
pub mod conversations;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod state;
pub mod storage;
pub mod tenants;

pub use conversations::ConversationRepository;
pub use error::{CompletionError, IndexError, IngestStage, StoreError};
pub use knowledge::{InMemoryKnowledgeIndex, KnowledgeGateway, KnowledgeIndex};
pub use models::{
    ChatConfig, ChatMessage, ChatSession, EndUser, KnowledgeMatch, KnowledgeRecordId, NewTenant,
    Role, Tenant, TenantId, TenantSettings,
};
pub use storage::{Database, DatabaseSettings};
pub use tenants::TenantRepository;
