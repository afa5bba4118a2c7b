//! Pool of rate-limited upstream API credentials.
//!
//! Every in-flight request holds at most one credential and every
//! credential is held by at most one request. Credentials are loaded once
//! at startup and never added or removed afterwards.

mod error;
mod pool;

pub use error::PoolError;
pub use pool::{CredentialId, CredentialLease, CredentialPool};
