//! Balance ledger with atomic, non-blocking debits.

use crate::error::LedgerError;
use crate::types::{
    is_valid_amount, Account, AccountId, DebitReceipt, LedgerStats, UsageEntry,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, Instrument};

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// Persistent data structure for the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerData {
    /// Schema version for migrations.
    version: u32,
    /// Account balances.
    accounts: HashMap<AccountId, Account>,
    /// Append-only usage log.
    usage_log: Vec<UsageEntry>,
}

impl Default for LedgerData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            accounts: HashMap::new(),
            usage_log: Vec::new(),
        }
    }
}

/// Funds set aside for a call that has not been billed yet.
#[derive(Debug, Clone)]
struct Hold {
    account_id: AccountId,
    amount: Decimal,
}

struct LedgerState {
    data: RwLock<LedgerData>,
    claims: Mutex<HashSet<AccountId>>,
    holds: Mutex<HashMap<u64, Hold>>,
    next_hold: AtomicU64,
    storage_path: Option<PathBuf>,
}

impl LedgerState {
    fn new(storage_path: Option<PathBuf>) -> Self {
        Self {
            data: RwLock::new(LedgerData::default()),
            claims: Mutex::new(HashSet::new()),
            holds: Mutex::new(HashMap::new()),
            next_hold: AtomicU64::new(1),
            storage_path,
        }
    }

    fn claims(&self) -> MutexGuard<'_, HashSet<AccountId>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn holds(&self) -> MutexGuard<'_, HashMap<u64, Hold>> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total held on an account, leaving out hold `except`.
    fn held(&self, account_id: &str, except: Option<u64>) -> Decimal {
        self.holds()
            .iter()
            .filter(|(id, hold)| Some(**id) != except && hold.account_id == account_id)
            .map(|(_, hold)| hold.amount)
            .sum()
    }

    /// Write the snapshot. Called with the data write lock held.
    async fn persist(&self, data: &LedgerData) -> Result<(), LedgerError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(data)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved ledger ({} bytes) to {:?}", bytes.len(), path);

        Ok(())
    }

    async fn open_account(
        &self,
        account_id: AccountId,
        opening_balance: Decimal,
    ) -> Result<Account, LedgerError> {
        let mut data = self.data.write().await;

        if data.accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountExists(account_id));
        }

        let account = Account::new(account_id.clone(), opening_balance);
        data.accounts.insert(account_id.clone(), account.clone());

        if let Err(e) = self.persist(&data).await {
            data.accounts.remove(&account_id);
            return Err(e);
        }

        info!("Opened account {} with balance {}", account_id, opening_balance);

        Ok(account)
    }

    async fn credit(&self, account_id: AccountId, amount: Decimal) -> Result<Account, LedgerError> {
        let mut data = self.data.write().await;

        let account = data
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;
        let previous = account.clone();
        account.balance += amount;
        account.updated_at = Utc::now();
        let updated = account.clone();

        if let Err(e) = self.persist(&data).await {
            data.accounts.insert(account_id, previous);
            return Err(e);
        }

        Ok(updated)
    }

    /// Debit and log usage in one commit.
    ///
    /// With `hold` set, the debit settles that hold: it must still exist,
    /// its own amount stays spendable, and it is removed once committed.
    async fn debit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        model: String,
        hold: Option<u64>,
    ) -> Result<DebitReceipt, LedgerError> {
        let mut data = self.data.write().await;

        if let Some(hold_id) = hold {
            if !self.holds().contains_key(&hold_id) {
                return Err(LedgerError::ReservationReleased(account_id));
            }
        }

        let held = self.held(&account_id, hold);
        let account = data
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;

        let previous_balance = account.balance;
        let available = previous_balance - held;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let previous_updated_at = account.updated_at;
        let new_balance = previous_balance - amount;
        account.balance = new_balance;
        account.updated_at = Utc::now();

        let entry = UsageEntry::new(account_id.clone(), &model, amount);
        data.usage_log.push(entry.clone());

        if let Err(e) = self.persist(&data).await {
            error!("Rolling back debit for {}: {}", account_id, e);
            data.usage_log.pop();
            if let Some(account) = data.accounts.get_mut(&account_id) {
                account.balance = previous_balance;
                account.updated_at = previous_updated_at;
            }
            return Err(e);
        }

        if let Some(hold_id) = hold {
            self.holds().remove(&hold_id);
        }

        debug!(
            "Debited {} from {} for {} (remaining: {})",
            amount, account_id, model, new_balance
        );

        Ok(DebitReceipt {
            previous_balance,
            new_balance,
            entry,
        })
    }
}

/// Run a write transaction on its own task.
///
/// The commit and its snapshot write finish even if the caller is dropped,
/// so memory and disk never disagree about a transaction.
async fn commit<T, F>(transaction: F) -> Result<T, LedgerError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LedgerError>> + Send + 'static,
{
    tokio::spawn(transaction.in_current_span())
        .await
        .map_err(|e| LedgerError::Storage(format!("ledger transaction aborted: {}", e)))?
}

/// Exclusive claim on one account.
///
/// Every write to the account fails with [`LedgerError::Contention`] until
/// the claim is dropped.
pub struct AccountClaim {
    state: Arc<LedgerState>,
    account_id: AccountId,
}

impl Drop for AccountClaim {
    fn drop(&mut self) {
        self.state.claims().remove(&self.account_id);
    }
}

/// Funds held on an account until the call they pay for is billed.
///
/// [`settle`](Self::settle) turns the hold into a debit. Dropping an
/// unsettled reservation releases the funds.
pub struct Reservation {
    state: Arc<LedgerState>,
    id: u64,
    account_id: AccountId,
    amount: Decimal,
}

impl Reservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Debit the held amount for one call to `model`.
    ///
    /// Fails with [`LedgerError::Contention`] while another transaction
    /// holds the account; the reservation stays valid and may be settled
    /// again. Settling twice fails with [`LedgerError::ReservationReleased`].
    #[instrument(skip(self), fields(account_id = %self.account_id, amount = %self.amount))]
    pub async fn settle(&self, model: &str) -> Result<DebitReceipt, LedgerError> {
        let claim = CreditLedger::claim_on(&self.state, &self.account_id)?;
        let state = self.state.clone();
        let account_id = self.account_id.clone();
        let amount = self.amount;
        let model = model.to_string();
        let hold = self.id;

        commit(async move {
            let _claim = claim;
            state.debit(account_id, amount, model, Some(hold)).await
        })
        .await
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.state.holds().remove(&self.id).is_some() {
            debug!("Released hold of {} on {}", self.amount, self.account_id);
        }
    }
}

/// Prepaid balance ledger.
///
/// Writes to an account run inside a transaction that first claims the
/// account without waiting. A second transaction on the same account fails
/// with [`LedgerError::Contention`] instead of queuing behind the first.
/// Committed state is written to an optional JSON snapshot; if that write
/// fails the transaction is rolled back.
///
/// Funds promised to an in-flight call are held with [`reserve`](Self::reserve)
/// and count against the available balance until settled or dropped.
pub struct CreditLedger {
    state: Arc<LedgerState>,
}

impl CreditLedger {
    /// Create a ledger that lives only in memory.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(LedgerState::new(None)),
        })
    }

    /// Create a ledger persisted at `storage_path`, loading existing data.
    pub async fn open(storage_path: PathBuf) -> Result<Arc<Self>, LedgerError> {
        let ledger = Self {
            state: Arc::new(LedgerState::new(Some(storage_path))),
        };

        ledger.load().await?;

        Ok(Arc::new(ledger))
    }

    fn claim_on(state: &Arc<LedgerState>, account_id: &str) -> Result<AccountClaim, LedgerError> {
        if !state.claims().insert(account_id.to_string()) {
            debug!("Account {} busy, skipping", account_id);
            return Err(LedgerError::Contention(account_id.to_string()));
        }

        Ok(AccountClaim {
            state: state.clone(),
            account_id: account_id.to_string(),
        })
    }

    /// Claim an account, failing immediately if already claimed.
    pub fn claim(&self, account_id: &str) -> Result<AccountClaim, LedgerError> {
        Self::claim_on(&self.state, account_id)
    }

    /// Load data from the snapshot file.
    async fn load(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.state.storage_path else {
            return Ok(());
        };

        if !path.exists() {
            info!("Ledger snapshot not found at {:?}, starting fresh", path);
            return Ok(());
        }

        let bytes = fs::read(path).await?;
        let data: LedgerData = serde_json::from_slice(&bytes)?;

        info!(
            "Loaded ledger: {} accounts, {} usage entries",
            data.accounts.len(),
            data.usage_log.len()
        );

        *self.state.data.write().await = data;

        Ok(())
    }

    /// Open a new account with an opening balance.
    #[instrument(skip(self))]
    pub async fn open_account(
        &self,
        account_id: &str,
        opening_balance: Decimal,
    ) -> Result<Account, LedgerError> {
        if opening_balance < Decimal::ZERO
            || (opening_balance != Decimal::ZERO && !is_valid_amount(opening_balance))
        {
            return Err(LedgerError::InvalidAmount(opening_balance));
        }

        let claim = self.claim(account_id)?;
        let state = self.state.clone();
        let account_id = account_id.to_string();

        commit(async move {
            let _claim = claim;
            state.open_account(account_id, opening_balance).await
        })
        .await
    }

    /// Add funds to an account.
    #[instrument(skip(self))]
    pub async fn credit(&self, account_id: &str, amount: Decimal) -> Result<Account, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let claim = self.claim(account_id)?;
        let state = self.state.clone();
        let account_id = account_id.to_string();

        commit(async move {
            let _claim = claim;
            state.credit(account_id, amount).await
        })
        .await
    }

    /// Current balance of an account, including held funds.
    pub async fn balance(&self, account_id: &str) -> Result<Decimal, LedgerError> {
        let data = self.state.data.read().await;
        data.accounts
            .get(account_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Balance minus everything currently held.
    pub async fn available(&self, account_id: &str) -> Result<Decimal, LedgerError> {
        let balance = self.balance(account_id).await?;
        Ok(balance - self.state.held(account_id, None))
    }

    /// Check that an account could pay `amount` right now, without holding it.
    ///
    /// Returns the available balance. Use [`reserve`](Self::reserve) to keep
    /// the funds for a later debit.
    pub async fn check_funds(&self, account_id: &str, amount: Decimal) -> Result<Decimal, LedgerError> {
        let available = self.available(account_id).await?;

        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        Ok(available)
    }

    /// Hold `amount` on an account until the returned reservation is
    /// settled or dropped.
    ///
    /// Concurrent reservations never hold more than the balance.
    #[instrument(skip(self))]
    pub async fn reserve(&self, account_id: &str, amount: Decimal) -> Result<Reservation, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        // Debits take the write lock, so the balance is stable while held.
        let data = self.state.data.read().await;
        let balance = data
            .accounts
            .get(account_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let mut holds = self.state.holds();
        let held: Decimal = holds
            .values()
            .filter(|hold| hold.account_id == account_id)
            .map(|hold| hold.amount)
            .sum();

        let available = balance - held;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let id = self.state.next_hold.fetch_add(1, Ordering::Relaxed);
        holds.insert(
            id,
            Hold {
                account_id: account_id.to_string(),
                amount,
            },
        );
        drop(holds);
        drop(data);

        debug!("Held {} on {} (available: {})", amount, account_id, available - amount);

        Ok(Reservation {
            state: self.state.clone(),
            id,
            account_id: account_id.to_string(),
            amount,
        })
    }

    /// Debit `amount` for one call to `model` and record the usage.
    ///
    /// The balance update and the usage entry are committed together or not
    /// at all. Funds held by reservations are not spendable here. Fails
    /// without waiting if another transaction holds the account.
    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        account_id: &str,
        amount: Decimal,
        model: &str,
    ) -> Result<DebitReceipt, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let claim = self.claim(account_id)?;
        let state = self.state.clone();
        let account_id = account_id.to_string();
        let model = model.to_string();

        commit(async move {
            let _claim = claim;
            state.debit(account_id, amount, model, None).await
        })
        .await
    }

    /// Usage entries for an account, oldest first.
    pub async fn usage(&self, account_id: &str) -> Vec<UsageEntry> {
        let data = self.state.data.read().await;
        data.usage_log
            .iter()
            .filter(|u| u.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Get summary statistics.
    pub async fn stats(&self) -> LedgerStats {
        let data = self.state.data.read().await;
        LedgerStats {
            total_accounts: data.accounts.len(),
            total_usage_entries: data.usage_log.len(),
            total_balance: data.accounts.values().map(|a| a.balance).sum(),
            total_billed: data.usage_log.iter().map(|u| u.cost).sum(),
        }
    }

    /// Whether the snapshot directory exists; always true in memory.
    pub async fn health_check(&self) -> bool {
        self.state.storage_path.as_ref().map_or(true, |path| {
            path.parent()
                .map_or(true, |parent| parent.as_os_str().is_empty() || parent.exists())
        })
    }
}
