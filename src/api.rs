use crate::error::{CompletionError, IndexError};
use crate::knowledge::KnowledgeIndex;
use crate::models::{KnowledgeMatch, KnowledgeRecordId, TenantId};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

// Alias for the stream type we'll return
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

// --- Knowledge index over HTTP ---

#[derive(Serialize, Debug)]
struct IndexRequestBody<'a> {
    tenant_id: TenantId,
    text: &'a str,
    source_tag: &'a str,
}

#[derive(Deserialize, Debug)]
struct IndexResponseBody {
    id: String,
}

#[derive(Serialize, Debug)]
struct QueryRequestBody<'a> {
    tenant_id: TenantId,
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize, Debug)]
struct QueryResponseBody {
    #[serde(default)]
    matches: Vec<KnowledgeMatch>,
}

// Error payload of the indexing service: {"stage": "embedding" | "storage", "error": "..."}
#[derive(Deserialize, Debug)]
struct IndexErrorBody {
    stage: Option<String>,
    error: Option<String>,
}

/// Client for an external indexing service exposing `POST /index` and `POST /query`.
pub struct HttpKnowledgeIndex {
    client: Client,
    base_url: String,
}

impl HttpKnowledgeIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, IndexError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Index service {} failed with status {}: {}", path, status, error_body);
            return Err(classify_index_error(status.as_u16(), &error_body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| IndexError::Transport(format!("invalid response from {}: {}", url, e)))
    }
}

fn classify_index_error(status: u16, body: &str) -> IndexError {
    let parsed: Option<IndexErrorBody> = serde_json::from_str(body).ok();
    let (stage, message) = match parsed {
        Some(IndexErrorBody { stage, error }) => {
            (stage, error.unwrap_or_else(|| body.to_string()))
        }
        None => (None, body.to_string()),
    };
    match stage.as_deref() {
        Some("embedding") => IndexError::Embedding(message),
        Some("storage") => IndexError::Storage(message),
        _ => IndexError::Transport(format!("status {}: {}", status, message)),
    }
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndex {
    async fn index(
        &self,
        tenant_id: TenantId,
        text: &str,
        source_tag: &str,
    ) -> Result<KnowledgeRecordId, IndexError> {
        log::debug!("Indexing {} chars for tenant {} at {}", text.len(), tenant_id, self.base_url);
        let response: IndexResponseBody = self
            .post(
                "index",
                &IndexRequestBody {
                    tenant_id,
                    text,
                    source_tag,
                },
            )
            .await?;
        Ok(KnowledgeRecordId(response.id))
    }

    async fn query(
        &self,
        tenant_id: TenantId,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeMatch>, IndexError> {
        let response: QueryResponseBody = self
            .post(
                "query",
                &QueryRequestBody {
                    tenant_id,
                    query: query_text,
                    top_k,
                },
            )
            .await?;
        Ok(response.matches)
    }
}

// --- Chat completion ---

/// Interface to the chat/completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Answers `prompt`, grounded on the `context` passages.
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String, CompletionError>;
}

#[derive(Serialize, Debug)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAIMessage {
    role: String,
    content: String,
}

// Response structure for STREAMING chunks
#[derive(Deserialize, Debug)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(Deserialize, Debug, Clone)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

pub struct OpenAICompatibleProvider {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl OpenAICompatibleProvider {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn build_messages(prompt: &str, context: &[String]) -> Vec<OpenAIMessage> {
        let mut messages = Vec::with_capacity(2);
        if !context.is_empty() {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: format!(
                    "Answer using only the following knowledge. If it does not cover the question, say so.\n\n{}",
                    context.join("\n\n---\n\n")
                ),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        messages
    }

    /// Streams content deltas for a completion request.
    pub async fn stream(&self, prompt: &str, context: &[String]) -> Result<DeltaStream, CompletionError> {
        log::info!(
            "Sending STREAM request to OpenAI compatible API: {} using model: {}",
            self.api_url,
            self.model
        );

        let request_body = OpenAIRequestBody {
            model: self.model.clone(),
            messages: Self::build_messages(prompt, context),
            stream: true,
        };

        let request_url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&request_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Completion stream request failed with status {}: {}", status, error_body);
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let delta_stream = response
            .bytes_stream()
            .eventsource()
            .map(|event_result| -> Result<Option<String>, CompletionError> {
                let event = event_result.map_err(|e| CompletionError::Stream(e.to_string()))?;
                let event_data = event.data.trim();

                if event_data == "[DONE]" {
                    log::debug!("Stream finished with [DONE]");
                    return Ok(None);
                }

                match serde_json::from_str::<OpenAIStreamChunk>(event_data) {
                    Ok(chunk) => Ok(chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)),
                    Err(e) => {
                        // Some providers interleave keep-alive pings
                        let is_ping = serde_json::from_str::<serde_json::Value>(event_data)
                            .map(|v| v.get("type").and_then(|t| t.as_str()) == Some("ping"))
                            .unwrap_or(false);
                        if is_ping {
                            log::debug!("Received stream ping event, skipping.");
                            Ok(None)
                        } else {
                            log::warn!("Failed to parse stream chunk: {} - Data: {}", e, event_data);
                            Err(CompletionError::Decode(format!("{}: {}", e, event_data)))
                        }
                    }
                }
            })
            .try_filter_map(|delta| async move { Ok::<_, CompletionError>(delta) });

        Ok(Box::pin(delta_stream))
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompatibleProvider {
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String, CompletionError> {
        let text: String = self.stream(prompt, context).await?.try_collect::<Vec<_>>().await?.concat();
        if text.trim().is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_read_from_error_body() {
        let err = classify_index_error(502, r#"{"stage":"embedding","error":"model offline"}"#);
        assert!(matches!(err, IndexError::Embedding(ref m) if m == "model offline"));

        let err = classify_index_error(500, r#"{"stage":"storage","error":"disk full"}"#);
        assert!(matches!(err, IndexError::Storage(_)));
    }

    #[test]
    fn unknown_error_body_is_transport() {
        let err = classify_index_error(503, "service unavailable");
        assert!(matches!(err, IndexError::Transport(ref m) if m.contains("503")));
    }

    #[test]
    fn context_becomes_a_system_message() {
        let messages = OpenAICompatibleProvider::build_messages(
            "When do you open?",
            &["We open at 9.".to_string()],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("We open at 9."));
        assert_eq!(messages[1].role, "user");

        let messages = OpenAICompatibleProvider::build_messages("hi", &[]);
        assert_eq!(messages.len(), 1);
    }
}
