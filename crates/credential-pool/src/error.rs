//! Credential pool errors.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("No credentials configured")]
    Empty,
}
