//! Chat relay server - main entry point.

use anyhow::{Context, Result};
use completion_client::CompletionClient;
use conversation_store::{HistoryStore, TokenCounter};
use credential_pool::CredentialPool;
use credit_ledger::{CreditLedger, LedgerError};
use relay_server::api::{create_router, AppState};
use relay_server::{Config, RelayService, RelaySettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.server.log_level);

    info!("Starting chat relay...");

    let pool = CredentialPool::from_csv(&config.upstream.api_keys)
        .context("Failed to build credential pool")?;

    let ledger = match &config.ledger.storage_path {
        Some(path) => CreditLedger::open(path.clone())
            .await
            .with_context(|| format!("Failed to open ledger at {:?}", path))?,
        None => {
            warn!("No ledger storage path configured - balances are memory-only");
            CreditLedger::in_memory()
        }
    };
    seed_accounts(&ledger, &config).await?;

    let counter = TokenCounter::for_model(&config.history.encoding_model)
        .context("Failed to load token encoding")?;
    let history = HistoryStore::in_memory(counter, config.history.token_budget);

    let client = CompletionClient::new(&config.upstream.base_url, config.upstream.timeout)
        .context("Failed to create completion client")?;
    info!("Upstream endpoint: {}", client.base_url());

    let relay = RelayService::new(
        pool,
        ledger,
        history,
        Arc::new(client),
        config.cost_table(),
        RelaySettings {
            system_prompt: config.upstream.system_prompt.clone(),
            upstream_timeout: config.upstream.timeout,
            debit_retries: config.ledger.debit_retries,
            debit_backoff: config.ledger.debit_backoff,
            context_limits: config.context_limits(),
        },
    );
    info!(
        "Serving {} models with {} credentials",
        relay.costs().len(),
        relay.pool().len()
    );

    let app = create_router(AppState::new(relay));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    Ok(())
}

/// Open configured accounts that do not exist yet.
async fn seed_accounts(ledger: &CreditLedger, config: &Config) -> Result<()> {
    for (account, balance) in &config.ledger.seed_accounts {
        match ledger.open_account(account, *balance).await {
            Ok(_) => info!("Seeded account {} with {}", account, balance),
            Err(LedgerError::AccountExists(_)) => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to seed account {}", account)),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
