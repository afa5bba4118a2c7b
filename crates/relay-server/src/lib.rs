//! Billed chat relay.
//!
//! Accepts chat turns over HTTP, leases an upstream credential for each,
//! holds the cost on the account, calls the completion provider, settles the
//! hold into a debit and records the exchange in the conversation history.

pub mod api;
pub mod config;
pub mod error;
pub mod relay;

pub use config::Config;
pub use error::RelayError;
pub use relay::{CompletionProvider, RelayService, RelaySettings, TurnReply, TurnRequest};
