//! Prepaid balance accounting for the chat relay.
//!
//! Each account holds a fixed-point balance that is debited once per
//! successful upstream call. A debit either commits both the balance change
//! and its usage entry or neither.
//!
//! # Flow
//!
//! ```text
//! reserve (hold funds) → upstream call succeeds → settle (claim account, commit, release)
//!                       → upstream call fails     → drop reservation (hold released)
//! ```
//!
//! Held funds are not spendable by any other reservation or debit, so two
//! concurrent calls can never both be promised the same balance. A write
//! never waits on another transaction for the same account: it fails with
//! [`LedgerError::Contention`] and the caller decides whether to retry.
//! Commits run on their own task and finish even if the caller goes away.

mod error;
mod ledger;
mod pricing;
mod types;

pub use error::LedgerError;
pub use ledger::{AccountClaim, CreditLedger, Reservation};
pub use pricing::CostTable;
pub use types::{
    format_amount, is_valid_amount, Account, AccountId, DebitReceipt, LedgerStats, UsageEntry,
    MONEY_SCALE,
};
