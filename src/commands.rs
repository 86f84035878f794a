//! Diagnostic commands: thin callers of the repositories and the knowledge gateway.

use crate::config::{self, CompletionSettings, Settings};
use crate::conversations::DEFAULT_MAX_PAGE_SIZE;
use crate::knowledge::DEFAULT_MAX_CHUNK_CHARS;
use crate::models::{NewTenant, Role, Tenant, TenantId};
use crate::state::AppState;
use crate::storage::DatabaseSettings;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "tenantchat",
    version,
    about = "Inspect and seed tenant chat data",
    long_about = "Diagnostics for the multi-tenant chatbot store: row counts, demo\n\
        seeding, tenant settings, visitor conversations, and knowledge ingestion."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// SQLite database URL
    #[arg(long, env = "TENANTCHAT_DATABASE_URL", default_value = "sqlite://tenantchat.sqlite", global = true)]
    pub database_url: String,
    #[arg(long, env = "TENANTCHAT_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    pub max_connections: u32,
    /// Milliseconds a writer waits for a locked database
    #[arg(long, env = "TENANTCHAT_BUSY_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub busy_timeout_ms: u64,
    /// Largest page `messages` may request
    #[arg(long, env = "TENANTCHAT_MAX_PAGE_SIZE", default_value_t = DEFAULT_MAX_PAGE_SIZE, global = true)]
    pub max_page_size: u32,
    /// Maximum characters per indexed chunk
    #[arg(long, env = "TENANTCHAT_CHUNK_CHARS", default_value_t = DEFAULT_MAX_CHUNK_CHARS, global = true)]
    pub chunk_chars: usize,
    /// Deadline for each upstream call, in seconds
    #[arg(long, env = "TENANTCHAT_UPSTREAM_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub upstream_timeout_secs: u64,
    /// Base URL of the knowledge index service (in-memory index when unset)
    #[arg(long, env = "TENANTCHAT_INDEX_URL", global = true)]
    pub index_url: Option<String>,
    #[arg(long, env = "TENANTCHAT_COMPLETION_URL", default_value = "https://api.openai.com/v1", global = true)]
    pub completion_url: String,
    #[arg(long, env = "TENANTCHAT_COMPLETION_MODEL", default_value = "gpt-4o-mini", global = true)]
    pub completion_model: String,
    /// `env:VAR_NAME` or `keyring`
    #[arg(long, env = "TENANTCHAT_API_KEY_REF", default_value = "env:OPENAI_API_KEY", global = true)]
    pub api_key_ref: String,
}

impl GlobalArgs {
    pub fn settings(&self) -> Settings {
        Settings {
            database: DatabaseSettings {
                url: self.database_url.clone(),
                max_connections: self.max_connections,
                busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            },
            max_page_size: self.max_page_size,
            max_chunk_chars: self.chunk_chars,
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            index_url: self.index_url.clone(),
            completion: CompletionSettings {
                api_url: self.completion_url.clone(),
                model: self.completion_model.clone(),
                api_key_ref: Some(self.api_key_ref.clone()),
            },
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print row counts for every table
    Stats,
    /// Create the demo tenant and its chat config (safe to re-run)
    SeedDemo {
        #[arg(long, default_value = "demo")]
        slug: String,
        #[arg(long, default_value = "Demo Company")]
        name: String,
        /// Widget API key; generated when omitted
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        fallback: Option<String>,
    },
    /// Show a tenant's settings
    Tenant {
        /// Tenant id or slug
        tenant: String,
    },
    /// Replace a tenant's fallback message
    SetFallback { tenant: String, message: String },
    /// List a visitor's most recent messages
    Messages {
        tenant: String,
        visitor: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Append a message to a visitor's session
    Send {
        tenant: String,
        visitor: String,
        content: String,
        /// user or assistant
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Index a text file as tenant knowledge
    Ingest {
        tenant: String,
        file: PathBuf,
        /// Source tag; defaults to the file name
        #[arg(long)]
        source: Option<String>,
    },
    /// Query the tenant's knowledge
    Search {
        tenant: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Answer a question from tenant knowledge, or print the fallback message
    Ask {
        tenant: String,
        question: String,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
    /// Store an API key in the OS keyring
    SetApiKey {
        key: String,
        #[arg(long, default_value = "completion")]
        account: String,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::initialize(cli.global.settings())
        .await
        .context("Failed to open the database")?;
    let result = execute(&state, cli.command).await;
    state.shutdown().await;
    result
}

async fn execute(state: &AppState, command: Command) -> anyhow::Result<()> {
    let timeout = state.settings.upstream_timeout;

    match command {
        Command::Stats => {
            let stats = state.db.stats().await?;
            println!("tenants:       {}", stats.tenants);
            println!("chat_configs:  {}", stats.chat_configs);
            println!("end_users:     {}", stats.end_users);
            println!("chat_sessions: {}", stats.chat_sessions);
            println!("chat_messages: {}", stats.chat_messages);
        }
        Command::SeedDemo {
            slug,
            name,
            api_key,
            fallback,
        } => {
            let api_key = api_key.unwrap_or_else(|| format!("{}-{}", slug, uuid::Uuid::new_v4().simple()));
            let tenant = state
                .tenants()
                .upsert_by_slug(&NewTenant::new(slug, name, api_key))
                .await
                .context("Failed to seed demo tenant")?;
            if let Some(message) = fallback {
                state.tenants().set_fallback_message(tenant.id, &message).await?;
            }
            println!("Tenant '{}' ready: {}", tenant.slug, tenant.id);
            println!("API key: {}", tenant.api_key);
        }
        Command::Tenant { tenant } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let settings = state.tenants().settings(tenant.id).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::SetFallback { tenant, message } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let config = state.tenants().set_fallback_message(tenant.id, &message).await?;
            println!("Fallback for '{}' set to: {}", tenant.slug, config.fallback_message);
        }
        Command::Messages {
            tenant,
            visitor,
            limit,
        } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let messages = state
                .conversations()
                .list_recent_messages(tenant.id, &visitor, limit)
                .await?;
            if messages.is_empty() {
                println!("No messages for visitor '{}'", visitor);
            }
            for message in messages {
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    message.role,
                    message.content
                );
            }
        }
        Command::Send {
            tenant,
            visitor,
            content,
            role,
        } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let message = state
                .conversations()
                .append_message(tenant.id, &visitor, role, &content)
                .await?;
            println!("Saved message {} in session {}", message.id, message.session_id);
        }
        Command::Ingest {
            tenant,
            file,
            source,
        } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let source = source.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "manual".to_string())
            });

            let report = state
                .knowledge()
                .add_document(tenant.id, &text, &source, timeout)
                .await?;
            println!(
                "Indexed {}/{} chunks from '{}'",
                report.succeeded(),
                report.chunks.len(),
                report.source_tag
            );
            for failed in report.failed() {
                if let Err(e) = &failed.result {
                    let stage = e.stage().map_or("unknown".to_string(), |s| s.to_string());
                    println!("  chunk {} failed at {}: {}", failed.chunk, stage, e);
                }
            }
            if !report.is_complete() {
                anyhow::bail!("{} chunks were not indexed", report.failed().count());
            }
        }
        Command::Search {
            tenant,
            query,
            top_k,
        } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let matches = state.knowledge().search(tenant.id, &query, top_k, timeout).await?;
            if matches.is_empty() {
                println!("No matches");
            }
            for hit in matches {
                println!("{:.3} [{}] {}", hit.score, hit.source_tag, hit.text);
            }
        }
        Command::Ask {
            tenant,
            question,
            top_k,
        } => {
            let tenant = resolve_tenant(state, &tenant).await?;
            let matches = state.knowledge().search(tenant.id, &question, top_k, timeout).await?;
            if matches.is_empty() {
                println!("{}", state.tenants().get_fallback_message(tenant.id).await?);
                return Ok(());
            }

            let context: Vec<String> = matches.into_iter().map(|m| m.text).collect();
            let provider = state.completion_provider()?;
            let answer = tokio::time::timeout(timeout, provider.generate(&question, &context))
                .await
                .map_err(|_| anyhow::anyhow!("Completion did not finish within {:?}", timeout))?
                .context("Completion request failed")?;
            println!("{}", answer);
        }
        Command::SetApiKey { key, account } => {
            config::set_api_key_in_keyring(&account, &key)?;
            println!("Stored API key for '{}'", account);
        }
    }
    Ok(())
}

/// Accepts either a tenant id or a slug.
async fn resolve_tenant(state: &AppState, reference: &str) -> anyhow::Result<Tenant> {
    let tenant = match reference.parse::<TenantId>() {
        Ok(id) => state.tenants().find_by_id(id).await,
        Err(_) => state.tenants().find_by_slug(reference).await,
    };
    tenant.with_context(|| format!("Unknown tenant '{}'", reference))
}
