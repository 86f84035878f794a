use crate::api::{CompletionProvider, HttpKnowledgeIndex, OpenAICompatibleProvider};
use crate::config::{self, Settings};
use crate::conversations::ConversationRepository;
use crate::error::StoreError;
use crate::knowledge::{InMemoryKnowledgeIndex, KnowledgeGateway, KnowledgeIndex};
use crate::storage::Database;
use crate::tenants::TenantRepository;
use std::sync::Arc;

// Everything a command needs: the database handle, the collaborators, and the settings.
pub struct AppState {
    pub db: Database,
    pub index: Arc<dyn KnowledgeIndex>,
    pub settings: Settings,
}

impl AppState {
    /// Connects the database and picks the knowledge index implementation.
    pub async fn initialize(settings: Settings) -> Result<Self, StoreError> {
        let db = Database::connect(&settings.database).await?;

        let index: Arc<dyn KnowledgeIndex> = match &settings.index_url {
            Some(url) => {
                log::info!("Using knowledge index service at {}", url);
                Arc::new(HttpKnowledgeIndex::new(url.clone()))
            }
            None => {
                log::warn!("No index service configured, knowledge is kept in memory for this run");
                Arc::new(InMemoryKnowledgeIndex::new())
            }
        };

        Ok(Self::new(db, index, settings))
    }

    pub fn new(db: Database, index: Arc<dyn KnowledgeIndex>, settings: Settings) -> Self {
        Self { db, index, settings }
    }

    pub fn tenants(&self) -> TenantRepository<'_> {
        self.db.tenants()
    }

    pub fn conversations(&self) -> ConversationRepository<'_> {
        self.db.conversations(self.settings.max_page_size)
    }

    pub fn knowledge(&self) -> KnowledgeGateway<'_> {
        KnowledgeGateway::new(&self.db, Arc::clone(&self.index))
            .with_max_chunk_chars(self.settings.max_chunk_chars)
    }

    /// Builds the completion client, resolving its API key on demand.
    pub fn completion_provider(&self) -> anyhow::Result<Arc<dyn CompletionProvider>> {
        let completion = &self.settings.completion;
        let api_key = config::resolve_api_key(completion.api_key_ref.as_deref(), "completion")?;
        Ok(Arc::new(OpenAICompatibleProvider::new(
            completion.api_url.clone(),
            completion.model.clone(),
            api_key,
        )))
    }

    pub async fn shutdown(self) {
        self.db.close().await;
    }
}
