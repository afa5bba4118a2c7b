//! Application configuration loaded from `relay.toml` and environment variables.

use anyhow::{bail, ensure, Context, Result};
use conversation_store::TokenCounter;
use credit_ledger::{is_valid_amount, CostTable};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream completion provider configuration
    pub upstream: UpstreamConfig,

    /// Conversation history configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Balance ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Billable models keyed by model id
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Comma-separated API keys forming the credential pool
    pub api_keys: String,

    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for one completion call
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// System prompt sent ahead of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Model whose encoding measures transcripts
    #[serde(default = "default_encoding_model")]
    pub encoding_model: String,

    /// Token budget per conversation
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Snapshot file. The ledger is memory-only when unset.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// Retries of a contended debit after a successful completion
    #[serde(default = "default_debit_retries")]
    pub debit_retries: u32,

    /// Base backoff between debit retries
    #[serde(default = "default_debit_backoff", with = "humantime_serde")]
    pub debit_backoff: Duration,

    /// Accounts opened at startup when missing, with their opening balance
    #[serde(default)]
    pub seed_accounts: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    /// Flat charge per completed call
    pub cost: Decimal,

    /// Context window of the model in tokens
    pub max_context_tokens: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            encoding_model: default_encoding_model(),
            token_budget: default_token_budget(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            debit_retries: default_debit_retries(),
            debit_backoff: default_debit_backoff(),
            seed_accounts: BTreeMap::new(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".into()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}

fn default_encoding_model() -> String {
    "gpt-4".into()
}

fn default_token_budget() -> usize {
    3000
}

fn default_debit_retries() -> u32 {
    3
}

fn default_debit_backoff() -> Duration {
    Duration::from_millis(25)
}

fn default_models() -> BTreeMap<String, ModelConfig> {
    let model = |cost: i64, max_context_tokens| ModelConfig {
        cost: Decimal::new(cost, 2),
        max_context_tokens,
    };

    BTreeMap::from([
        ("gpt-3.5-turbo".to_string(), model(100, 16_385)),
        ("gpt-4".to_string(), model(300, 8_192)),
        ("gpt-4o".to_string(), model(500, 128_000)),
    ])
}

impl Config {
    /// Load configuration from `relay.toml` (optional) and environment variables.
    ///
    /// Environment variables use `__` between section and key, e.g.
    /// `UPSTREAM__API_KEYS` or `HISTORY__TOKEN_BUDGET`. `OPENAI_API_KEYS` is
    /// accepted as a fallback for the credential list.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("relay").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    // Keys like "sk-1,sk-2" and ids must stay strings.
                    .try_parsing(false),
            );

        if let Ok(keys) = std::env::var("OPENAI_API_KEYS") {
            builder = builder
                .set_default("upstream.api_keys", keys)
                .context("Failed to apply OPENAI_API_KEYS")?;
        }

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.upstream.api_keys.split(',').any(|key| !key.trim().is_empty()),
            "upstream.api_keys must contain at least one credential"
        );
        ensure!(!self.models.is_empty(), "at least one model must be configured");
        ensure!(self.history.token_budget > 0, "history.token_budget must be positive");

        if !TokenCounter::supports(&self.history.encoding_model) {
            bail!(
                "history.encoding_model '{}' has no known token encoding",
                self.history.encoding_model
            );
        }

        for (model, settings) in &self.models {
            if !TokenCounter::supports(model) {
                bail!("model '{}' has no known token encoding", model);
            }
            ensure!(
                is_valid_amount(settings.cost),
                "model '{}' cost {} must be positive with at most two decimals",
                model,
                settings.cost
            );
            ensure!(
                self.history.token_budget <= settings.max_context_tokens,
                "history.token_budget {} exceeds the {} token context of model '{}'",
                self.history.token_budget,
                settings.max_context_tokens,
                model
            );
        }

        for (account, balance) in &self.ledger.seed_accounts {
            ensure!(
                *balance >= Decimal::ZERO,
                "seed balance for account '{}' must not be negative",
                account
            );
        }

        Ok(())
    }

    /// Per-call prices for the configured models.
    pub fn cost_table(&self) -> CostTable {
        self.models
            .iter()
            .fold(CostTable::new(), |table, (model, settings)| table.with(model.clone(), settings.cost))
    }

    /// Context windows of the configured models.
    pub fn context_limits(&self) -> BTreeMap<String, usize> {
        self.models
            .iter()
            .map(|(model, settings)| (model.clone(), settings.max_context_tokens))
            .collect()
    }
}
