//! In-memory lease store for single-process deployments and tests.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{DispatchError, LeaseRecord, LeaseStore};
use crate::util::clock::{expiry_after, now_ms};

/// Lease records kept in a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, LeaseRecord>>,
}

impl InMemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a lease regardless of holder (operator override). The current
    /// holder's next renewal fails.
    pub fn clear(&self, identity: &str) -> bool {
        self.leases.lock().remove(identity).is_some()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn try_acquire(
        &self,
        identity: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        let now = now_ms();
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(identity) {
            if existing.holder != holder && !existing.is_expired_at(now) {
                return Ok(false);
            }
            if existing.holder != holder {
                tracing::info!(identity, previous = %existing.holder, "taking over expired lease");
            }
        }
        leases.insert(identity.to_string(), LeaseRecord::new(holder, ttl, now));
        Ok(true)
    }

    fn renew(&self, identity: &str, holder: &str, ttl: Duration) -> Result<bool, DispatchError> {
        let now = now_ms();
        let mut leases = self.leases.lock();
        match leases.get_mut(identity) {
            Some(rec) if rec.holder == holder && !rec.is_expired_at(now) => {
                rec.expires_at_ms = expiry_after(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release(&self, identity: &str, holder: &str) -> Result<(), DispatchError> {
        let mut leases = self.leases.lock();
        if leases.get(identity).is_some_and(|rec| rec.holder == holder) {
            leases.remove(identity);
        }
        Ok(())
    }

    fn current(&self, identity: &str) -> Result<Option<LeaseRecord>, DispatchError> {
        Ok(self.leases.lock().get(identity).cloned())
    }
}
