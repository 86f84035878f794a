//! Knowledge ingestion gateway.
//!
//! Validates raw text, then hands it to an external [`KnowledgeIndex`]
//! (embedding + vector store) tagged with the tenant and a source tag. The
//! gateway never retries; failures carry the stage that broke so the caller
//! can decide.

use crate::error::{IndexError, StoreError};
use crate::models::{KnowledgeMatch, KnowledgeRecordId, TenantId};
use crate::storage::Database;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default maximum characters per indexed chunk.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1_000;

/// Upper bound for `top_k` in searches.
pub const MAX_TOP_K: usize = 50;

/// Interface to the indexing/embedding service.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Embeds and stores one passage, returning the service's record id.
    async fn index(
        &self,
        tenant_id: TenantId,
        text: &str,
        source_tag: &str,
    ) -> Result<KnowledgeRecordId, IndexError>;

    /// Ranked passages for `query_text`, restricted to `tenant_id`.
    async fn query(
        &self,
        tenant_id: TenantId,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeMatch>, IndexError>;
}

/// Outcome for one chunk of a document.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunk: usize,
    pub chars: usize,
    pub result: Result<KnowledgeRecordId, StoreError>,
}

/// Per-chunk report from [`KnowledgeGateway::add_document`].
#[derive(Debug)]
pub struct IngestReport {
    pub tenant_id: TenantId,
    pub source_tag: String,
    pub chunks: Vec<ChunkOutcome>,
}

impl IngestReport {
    pub fn succeeded(&self) -> usize {
        self.chunks.iter().filter(|c| c.result.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.chunks.iter().filter(|c| c.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.result.is_ok())
    }

    pub fn record_ids(&self) -> Vec<KnowledgeRecordId> {
        self.chunks
            .iter()
            .filter_map(|c| c.result.as_ref().ok().cloned())
            .collect()
    }
}

pub struct KnowledgeGateway<'a> {
    db: &'a Database,
    index: Arc<dyn KnowledgeIndex>,
    max_chunk_chars: usize,
}

impl<'a> KnowledgeGateway<'a> {
    pub fn new(db: &'a Database, index: Arc<dyn KnowledgeIndex>) -> Self {
        Self {
            db,
            index,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars.max(1);
        self
    }

    /// Indexes one passage. Empty text fails before anything is sent upstream.
    pub async fn add_knowledge(
        &self,
        tenant_id: TenantId,
        text_content: &str,
        source_tag: &str,
        timeout: Duration,
    ) -> Result<KnowledgeRecordId, StoreError> {
        validate_content(text_content, source_tag)?;
        self.db.require_tenant(tenant_id).await?;

        let id = self.index_chunk(tenant_id, text_content, source_tag, timeout).await?;
        log::info!(
            "Indexed knowledge record {} for tenant {} (source: {})",
            id,
            tenant_id,
            source_tag
        );
        Ok(id)
    }

    /// Splits extracted document text into chunks and indexes each one.
    ///
    /// A failing chunk does not stop the rest; the report lists every outcome.
    pub async fn add_document(
        &self,
        tenant_id: TenantId,
        text_content: &str,
        source_tag: &str,
        timeout: Duration,
    ) -> Result<IngestReport, StoreError> {
        validate_content(text_content, source_tag)?;
        self.db.require_tenant(tenant_id).await?;

        let chunks = chunk_text(text_content, self.max_chunk_chars);
        log::info!(
            "Ingesting document '{}' for tenant {} as {} chunks",
            source_tag,
            tenant_id,
            chunks.len()
        );

        let mut outcomes = Vec::with_capacity(chunks.len());
        for (chunk, text) in chunks.iter().enumerate() {
            let result = self.index_chunk(tenant_id, text, source_tag, timeout).await;
            if let Err(e) = &result {
                log::warn!("Chunk {} of '{}' failed: {}", chunk, source_tag, e);
            }
            outcomes.push(ChunkOutcome {
                chunk,
                chars: text.chars().count(),
                result,
            });
        }

        Ok(IngestReport {
            tenant_id,
            source_tag: source_tag.to_string(),
            chunks: outcomes,
        })
    }

    /// Ranked passages for `query`, scoped to the tenant.
    pub async fn search(
        &self,
        tenant_id: TenantId,
        query: &str,
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<KnowledgeMatch>, StoreError> {
        if query.trim().is_empty() {
            return Err(StoreError::Validation("query must not be empty".to_string()));
        }
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(StoreError::Validation(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_TOP_K, top_k
            )));
        }
        self.db.require_tenant(tenant_id).await?;

        bounded(timeout, self.index.query(tenant_id, query, top_k)).await
    }

    async fn index_chunk(
        &self,
        tenant_id: TenantId,
        text: &str,
        source_tag: &str,
        timeout: Duration,
    ) -> Result<KnowledgeRecordId, StoreError> {
        bounded(timeout, self.index.index(tenant_id, text, source_tag)).await
    }
}

async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, IndexError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::UpstreamTimeout(timeout)),
    }
}

fn validate_content(text_content: &str, source_tag: &str) -> Result<(), StoreError> {
    if text_content.trim().is_empty() {
        return Err(StoreError::Validation(
            "knowledge text must not be empty".to_string(),
        ));
    }
    if source_tag.trim().is_empty() {
        return Err(StoreError::Validation(
            "source tag must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Splits text into chunks of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are packed together while they fit.
/// Longer paragraphs break on whitespace, and single words longer than the
/// limit are cut.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let normalized = text.replace("\r\n", "\n");

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in normalized.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in split_paragraph(paragraph, max_chars) {
            let piece_len = piece.chars().count();
            if current_len > 0 && current_len + 2 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_paragraph(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in paragraph.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if current_len > 0 {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if current_len > 0 && current_len + 1 + word_len > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if current_len > 0 {
        pieces.push(current);
    }
    pieces
}

#[derive(Debug, Clone)]
struct StoredPassage {
    id: KnowledgeRecordId,
    text: String,
    source_tag: String,
    terms: HashSet<String>,
}

/// Process-local index with term-overlap scoring, for local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeIndex {
    passages: DashMap<TenantId, Vec<StoredPassage>>,
}

impl InMemoryKnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, tenant_id: TenantId) -> usize {
        self.passages.get(&tenant_id).map_or(0, |p| p.len())
    }

    pub fn is_empty(&self, tenant_id: TenantId) -> bool {
        self.len(tenant_id) == 0
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl KnowledgeIndex for InMemoryKnowledgeIndex {
    async fn index(
        &self,
        tenant_id: TenantId,
        text: &str,
        source_tag: &str,
    ) -> Result<KnowledgeRecordId, IndexError> {
        let id = KnowledgeRecordId(uuid::Uuid::new_v4().to_string());
        self.passages.entry(tenant_id).or_default().push(StoredPassage {
            id: id.clone(),
            text: text.to_string(),
            source_tag: source_tag.to_string(),
            terms: terms(text),
        });
        Ok(id)
    }

    async fn query(
        &self,
        tenant_id: TenantId,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeMatch>, IndexError> {
        let query_terms = terms(query_text);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<KnowledgeMatch> = self
            .passages
            .get(&tenant_id)
            .map(|passages| {
                passages
                    .iter()
                    .filter_map(|p| {
                        let hits = query_terms.intersection(&p.terms).count();
                        (hits > 0).then(|| KnowledgeMatch {
                            id: p.id.clone(),
                            text: p.text.clone(),
                            source_tag: p.source_tag.clone(),
                            score: hits as f32 / query_terms.len() as f32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_paragraphs_share_a_chunk() {
        let chunks = chunk_text("Opening hours.\n\nWe ship worldwide.", 100);
        assert_eq!(chunks, vec!["Opening hours.\n\nWe ship worldwide.".to_string()]);
    }

    #[test]
    fn paragraphs_split_when_they_do_not_fit() {
        let chunks = chunk_text("alpha beta\r\n\r\ngamma delta", 12);
        assert_eq!(chunks, vec!["alpha beta".to_string(), "gamma delta".to_string()]);
    }

    #[test]
    fn long_paragraph_breaks_on_whitespace() {
        let chunks = chunk_text("one two three four", 9);
        assert_eq!(chunks, vec!["one two".to_string(), "three".to_string(), "four".to_string()]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn oversized_word_is_cut() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd".to_string(), "efgh".to_string(), "ij".to_string()]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text(" \n\n \n", 10).is_empty());
    }

    #[tokio::test]
    async fn in_memory_index_is_tenant_scoped() {
        let index = InMemoryKnowledgeIndex::new();
        let acme = TenantId::new();
        let globex = TenantId::new();

        index.index(acme, "Refunds take five days", "faq").await.unwrap();
        index.index(globex, "Refunds are instant", "faq").await.unwrap();

        let hits = index.query(acme, "refunds", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Refunds take five days");
        assert_eq!(index.len(acme), 1);
        assert!(index.is_empty(TenantId::new()));
    }

    #[tokio::test]
    async fn in_memory_index_ranks_by_overlap() {
        let index = InMemoryKnowledgeIndex::new();
        let tenant = TenantId::new();
        index.index(tenant, "shipping costs", "faq").await.unwrap();
        index.index(tenant, "international shipping costs and times", "faq").await.unwrap();
        index.index(tenant, "unrelated", "faq").await.unwrap();

        let hits = index.query(tenant, "international shipping", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "international shipping costs and times");
        assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
    }
}
