//! Exclusive leasing of upstream API credentials.

use crate::error::PoolError;
use secrecy::SecretString;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Position of a credential in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(usize);

impl CredentialId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "credential#{}", self.0)
    }
}

struct Slot {
    secret: Arc<SecretString>,
    in_use: bool,
    // Bumped on every acquire so a stale lease cannot free a later holder.
    generation: u64,
}

struct PoolInner {
    slots: Mutex<Vec<Slot>>,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A panic while holding the lock cannot leave a slot half-updated.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: CredentialId, generation: Option<u64>) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(id.0) {
            Some(slot) if slot.in_use && generation.map_or(true, |g| g == slot.generation) => {
                slot.in_use = false;
                true
            }
            _ => false,
        }
    }
}

/// Fixed set of credentials, each either free or held by one lease.
///
/// `acquire` never waits: when every credential is held it returns `None`
/// and the caller reports capacity exhaustion. Which free credential is
/// handed out is unspecified.
#[derive(Clone)]
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    /// Create a pool from raw secrets. Blank entries are skipped and
    /// duplicates collapse to a single credential.
    pub fn new<I, S>(secrets: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut slots = Vec::new();

        for secret in secrets {
            let secret = secret.into().trim().to_string();
            if secret.is_empty() {
                continue;
            }
            if !seen.insert(secret.clone()) {
                warn!("Ignoring duplicate credential in pool configuration");
                continue;
            }
            slots.push(Slot {
                secret: Arc::new(SecretString::new(secret)),
                in_use: false,
                generation: 0,
            });
        }

        if slots.is_empty() {
            return Err(PoolError::Empty);
        }

        info!("Credential pool initialized with {} credentials", slots.len());

        Ok(Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
            }),
        })
    }

    /// Parse a comma-separated list of secrets.
    pub fn from_csv(csv: &str) -> Result<Self, PoolError> {
        Self::new(csv.split(','))
    }

    /// Lease a free credential, or `None` if all are in use.
    pub fn acquire(&self) -> Option<CredentialLease> {
        let mut slots = self.inner.slots();
        let (index, slot) = slots.iter_mut().enumerate().find(|(_, slot)| !slot.in_use)?;
        slot.in_use = true;
        slot.generation += 1;
        let generation = slot.generation;
        let secret = slot.secret.clone();
        drop(slots);

        let id = CredentialId(index);
        debug!("Acquired {}", id);

        Some(CredentialLease {
            pool: self.inner.clone(),
            id,
            generation,
            secret,
            released: false,
        })
    }

    /// Mark a credential free. Returns whether it was held.
    ///
    /// Releasing a free or unknown credential is a no-op. A lease whose
    /// credential was freed this way will not free it again on drop.
    pub fn release(&self, id: CredentialId) -> bool {
        let released = self.inner.release(id, None);
        if released {
            debug!("Released {}", id);
        }
        released
    }

    /// Total number of credentials.
    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of credentials not currently leased.
    pub fn free_count(&self) -> usize {
        self.inner.slots().iter().filter(|slot| !slot.in_use).count()
    }

    /// Number of credentials currently leased.
    pub fn in_use_count(&self) -> usize {
        self.len() - self.free_count()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("len", &self.len())
            .field("free", &self.free_count())
            .finish()
    }
}

/// A held credential.
///
/// The credential returns to the pool when the lease is released or
/// dropped, whichever happens first. Dropping covers early returns, errors
/// and cancelled futures.
pub struct CredentialLease {
    pool: Arc<PoolInner>,
    id: CredentialId,
    generation: u64,
    secret: Arc<SecretString>,
    released: bool,
}

impl CredentialLease {
    pub fn id(&self) -> CredentialId {
        self.id
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Return the credential to the pool now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            if self.pool.release(self.id, Some(self.generation)) {
                debug!("Released {}", self.id);
            }
        }
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}
