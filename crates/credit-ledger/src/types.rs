//! Core types for the balance ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
pub type AccountId = String;

/// Number of fractional digits kept for balances and costs.
pub const MONEY_SCALE: u32 = 2;

/// Prepaid balance of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Remaining balance. Never negative.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with an opening balance.
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record of one billed upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub account_id: AccountId,
    /// Model that served the call.
    pub model: String,
    /// Amount debited.
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UsageEntry {
    pub fn new(account_id: AccountId, model: impl Into<String>, cost: Decimal) -> Self {
        Self {
            account_id,
            model: model.into(),
            cost,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a committed debit.
#[derive(Debug, Clone, PartialEq)]
pub struct DebitReceipt {
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub entry: UsageEntry,
}

/// Summary statistics for the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    pub total_accounts: usize,
    pub total_usage_entries: usize,
    pub total_balance: Decimal,
    pub total_billed: Decimal,
}

/// Whether `amount` is a valid positive money value.
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount.round_dp(MONEY_SCALE) == amount
}

/// Format an amount for display, e.g. `$7.00`.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    format!("${}", rounded)
}
