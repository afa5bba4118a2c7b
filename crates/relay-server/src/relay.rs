//! One billed chat turn, from credential lease to recorded transcript.
//!
//! ```text
//! Received -> CredentialAcquired -> FundsReserved -> CompletionObtained -> Recorded -> Released
//! ```
//!
//! Any failure jumps straight to `Released`. The credential lease and the
//! funds reservation are drop guards, so every exit frees them, including a
//! cancelled request.

use crate::error::RelayError;
use async_trait::async_trait;
use completion_client::{Completion, CompletionClient, CompletionError, Message};
use conversation_store::{ConversationError, HistoryStore, Role as TurnRole, Turn};
use credential_pool::CredentialPool;
use credit_ledger::{CostTable, CreditLedger, DebitReceipt, LedgerError, Reservation};
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Something that turns a prompt into an assistant reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        credential: &SecretString,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<Completion, CompletionError>;
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn complete(
        &self,
        credential: &SecretString,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<Completion, CompletionError> {
        self.chat(credential, model, messages).await
    }
}

/// An inbound chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub account_id: String,
    pub conversation_id: String,
    pub message: String,
    pub model: String,
}

impl TurnRequest {
    fn validate(&self) -> Result<(), RelayError> {
        let required = [
            ("account_id", &self.account_id),
            ("conversation_id", &self.conversation_id),
            ("message", &self.message),
            ("model", &self.model),
        ];

        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(RelayError::InvalidRequest(format!("{} is required", field))),
            None => Ok(()),
        }
    }
}

/// A billed assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub reply: String,
    /// Amount debited for this turn.
    pub cost: Decimal,
    /// Balance after the debit.
    pub balance: Decimal,
}

/// Tunables for [`RelayService`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub system_prompt: String,
    pub upstream_timeout: Duration,
    /// Retries of a contended debit after the completion succeeded.
    pub debit_retries: u32,
    pub debit_backoff: Duration,
    /// Context window per model. Models without an entry are not checked.
    pub context_limits: BTreeMap<String, usize>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".into(),
            upstream_timeout: Duration::from_secs(60),
            debit_retries: 3,
            debit_backoff: Duration::from_millis(25),
            context_limits: BTreeMap::new(),
        }
    }
}

/// Coordinates the credential pool, the ledger, history and the provider.
pub struct RelayService {
    pool: CredentialPool,
    ledger: Arc<CreditLedger>,
    history: HistoryStore,
    provider: Arc<dyn CompletionProvider>,
    costs: CostTable,
    settings: RelaySettings,
}

impl RelayService {
    pub fn new(
        pool: CredentialPool,
        ledger: Arc<CreditLedger>,
        history: HistoryStore,
        provider: Arc<dyn CompletionProvider>,
        costs: CostTable,
        settings: RelaySettings,
    ) -> Self {
        Self {
            pool,
            ledger,
            history,
            provider,
            costs,
            settings,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Relay one turn and bill it.
    ///
    /// The cost is held on the account before the provider is called and
    /// settled into a debit only after a reply arrived. Any earlier exit
    /// drops the reservation and releases the funds. The transcript is
    /// updated only after the debit. A transcript write failure at that point is
    /// logged and the paid reply is still returned.
    #[instrument(
        skip(self, request),
        fields(
            account = %request.account_id,
            conversation = %request.conversation_id,
            model = %request.model
        )
    )]
    pub async fn submit(&self, request: TurnRequest) -> Result<TurnReply, RelayError> {
        request.validate()?;

        let cost = self
            .costs
            .cost_for(&request.model)
            .ok_or_else(|| RelayError::UnknownModel(request.model.clone()))?;

        let lease = self.pool.acquire().ok_or_else(|| {
            warn!("No free credential for request");
            RelayError::CapacityExhausted
        })?;
        debug!(credential = %lease.id(), "Credential acquired");

        let reservation = self.ledger.reserve(&request.account_id, cost).await?;
        debug!("Holding {} for this turn", reservation.amount());

        let history = self.history.get(&request.conversation_id).await?;
        let messages = self.build_prompt(&request.model, history, &request.message);

        let call = self
            .provider
            .complete(lease.secret(), &request.model, messages);
        let completion = match tokio::time::timeout(self.settings.upstream_timeout, call).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                match &e {
                    CompletionError::RateLimit => warn!(credential = %lease.id(), "Upstream rate limited"),
                    CompletionError::Unauthorized => error!(credential = %lease.id(), "Upstream rejected credential"),
                    other => warn!("Upstream call failed: {}", other),
                }
                return Err(e.into());
            }
            Err(_) => {
                warn!("Upstream call timed out after {:?}", self.settings.upstream_timeout);
                return Err(RelayError::Upstream(format!(
                    "no reply within {:?}",
                    self.settings.upstream_timeout
                )));
            }
        };

        let receipt = self
            .settle(&reservation, &request.account_id, &request.model)
            .await?;
        self.record_turn(&request.conversation_id, &request.message, &completion.content)
            .await;

        lease.release();

        info!(
            "Turn completed: charged {}, balance {} -> {}",
            cost, receipt.previous_balance, receipt.new_balance
        );

        Ok(TurnReply {
            reply: completion.content,
            cost,
            balance: receipt.new_balance,
        })
    }

    /// System turn, then history, then the new user turn.
    ///
    /// When the model's context window cannot hold all of it, the oldest
    /// history turns are left out of this prompt. Stored history is untouched.
    fn build_prompt(&self, model: &str, history: Vec<Turn>, message: &str) -> Vec<Message> {
        let mut skip = 0;

        if let Some(&limit) = self.settings.context_limits.get(model) {
            let counter = self.history.counter();
            let mut total = counter.count_text(&self.settings.system_prompt)
                + counter.count_text(message)
                + counter.count(&history);

            while total > limit && skip < history.len() {
                total -= counter.count_text(&history[skip].content);
                skip += 1;
            }

            if skip > 0 {
                debug!("Left {} oldest turns out of the prompt to fit {} tokens", skip, limit);
            }
        }

        let mut messages = Vec::with_capacity(history.len() - skip + 2);
        messages.push(Message::system(self.settings.system_prompt.as_str()));
        messages.extend(history.into_iter().skip(skip).map(to_message));
        messages.push(Message::user(message));
        messages
    }

    /// Settle the held cost, retrying a bounded number of times while the
    /// account is contended.
    async fn settle(
        &self,
        reservation: &Reservation,
        account_id: &str,
        model: &str,
    ) -> Result<DebitReceipt, RelayError> {
        let mut attempt = 0;

        loop {
            match reservation.settle(model).await {
                Ok(receipt) => return Ok(receipt),
                Err(LedgerError::Contention(_)) if attempt < self.settings.debit_retries => {
                    attempt += 1;
                    debug!("Debit contended, retry {}/{}", attempt, self.settings.debit_retries);
                    tokio::time::sleep(self.settings.debit_backoff * attempt).await;
                }
                Err(e) => {
                    error!("Billing failed for account {} after completion: {}", account_id, e);
                    return Err(RelayError::billing(e));
                }
            }
        }
    }

    async fn record_turn(&self, conversation_id: &str, message: &str, reply: &str) {
        let result: Result<_, ConversationError> = async {
            self.history.append(conversation_id, TurnRole::User, message).await?;
            self.history.append(conversation_id, TurnRole::Assistant, reply).await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to record turn for conversation {}: {}", conversation_id, e);
        }
    }
}

fn to_message(turn: Turn) -> Message {
    match turn.role {
        TurnRole::System => Message::system(turn.content),
        TurnRole::User => Message::user(turn.content),
        TurnRole::Assistant => Message::assistant(turn.content),
    }
}
