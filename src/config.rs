use crate::conversations::DEFAULT_MAX_PAGE_SIZE;
use crate::knowledge::DEFAULT_MAX_CHUNK_CHARS;
use crate::storage::DatabaseSettings;
use anyhow::{Context, Result};
use keyring::Entry;
use std::time::Duration;

const KEYRING_SERVICE: &str = "tenantchat_api_key";

/// Runtime settings, assembled by the CLI from flags and environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub max_page_size: u32,
    pub max_chunk_chars: usize,
    /// Deadline for each call to the indexing or completion service.
    pub upstream_timeout: Duration,
    /// Base URL of the indexing service. Without it an in-memory index is used.
    pub index_url: Option<String>,
    pub completion: CompletionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            upstream_timeout: Duration::from_secs(30),
            index_url: None,
            completion: CompletionSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_url: String,
    pub model: String,
    /// Where the API key lives: `env:VAR_NAME` or `keyring`.
    pub api_key_ref: Option<String>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_ref: Some("env:OPENAI_API_KEY".to_string()),
        }
    }
}

/// Retrieves an API key from its reference.
/// `env:NAME` reads the environment variable, `keyring` reads the OS keyring
/// entry stored under `account`.
pub fn resolve_api_key(key_ref: Option<&str>, account: &str) -> Result<String> {
    match key_ref {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))
        }
        Some("keyring") => {
            let entry = Entry::new(KEYRING_SERVICE, account).context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for account: {}", account);
            entry.get_password().context(format!(
                "Failed to get API key from keyring for '{}'. Store it with `set-api-key` first.",
                account
            ))
        }
        Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
        None => Err(anyhow::anyhow!("API key reference not set for '{}'", account)),
    }
}

/// Stores an API key in the OS keyring under `account`.
pub fn set_api_key_in_keyring(account: &str, api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, account)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for account: {}", account);
    entry
        .set_password(api_key)
        .context(format!("Failed to set API key in keyring for '{}'", account))
}
