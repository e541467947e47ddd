//! Exclusive run lease: one active scheduler run per identity.
//!
//! A lease is a persisted record `(holder, expires_at_ms)` keyed by the
//! scheduler identity. Acquisition succeeds when no record exists or the
//! existing one has expired; renewal and release only act when the caller's
//! holder token still matches. Contention is reported as `Ok(false)`, never
//! as an error, and acquisition is never retried: the next trigger tries again.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::DispatchError;
use crate::util::clock::now_ms;

/// Persisted lease contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Holder token of the current owner.
    pub holder: String,
    /// When the holder first acquired the lease (ms since epoch).
    pub acquired_at_ms: u128,
    /// Expiry (ms since epoch).
    pub expires_at_ms: u128,
}

impl LeaseRecord {
    /// Create a record for `holder` valid for `ttl` from `now_ms`.
    pub fn new(holder: impl Into<String>, ttl: Duration, now_ms: u128) -> Self {
        Self {
            holder: holder.into(),
            acquired_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl.as_millis()),
        }
    }

    /// Whether the lease is expired at `now_ms`.
    pub const fn is_expired_at(&self, now_ms: u128) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Whether the lease is currently expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}

/// Key-value store with TTL semantics backing [`ExclusiveRunLock`].
pub trait LeaseStore: Send + Sync {
    /// Claim `identity` for `holder` unless another holder's lease is unexpired.
    fn try_acquire(
        &self,
        identity: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError>;
    /// Extend the lease only if `holder` still owns it and it has not expired.
    fn renew(&self, identity: &str, holder: &str, ttl: Duration) -> Result<bool, DispatchError>;
    /// Drop the lease if `holder` owns it. Releasing a lease held by someone else is a no-op.
    fn release(&self, identity: &str, holder: &str) -> Result<(), DispatchError>;
    /// Current record, expired or not.
    fn current(&self, identity: &str) -> Result<Option<LeaseRecord>, DispatchError>;
}

impl<T: LeaseStore + ?Sized> LeaseStore for Arc<T> {
    fn try_acquire(
        &self,
        identity: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        (**self).try_acquire(identity, holder, ttl)
    }

    fn renew(&self, identity: &str, holder: &str, ttl: Duration) -> Result<bool, DispatchError> {
        (**self).renew(identity, holder, ttl)
    }

    fn release(&self, identity: &str, holder: &str) -> Result<(), DispatchError> {
        (**self).release(identity, holder)
    }

    fn current(&self, identity: &str) -> Result<Option<LeaseRecord>, DispatchError> {
        (**self).current(identity)
    }
}

/// Lease handle for one scheduler identity.
///
/// Each handle carries its own random holder token, so two handles for the
/// same identity contend with each other even inside one process.
pub struct ExclusiveRunLock<L> {
    store: L,
    identity: String,
    holder: String,
}

impl<L: LeaseStore> ExclusiveRunLock<L> {
    /// Create a handle with a fresh holder token.
    pub fn new(store: L, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Scheduler identity this lock guards.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Holder token written into the lease record.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Try once to take the lease.
    pub fn try_acquire(&self, ttl: Duration) -> Result<bool, DispatchError> {
        let acquired = self.store.try_acquire(&self.identity, &self.holder, ttl)?;
        if acquired {
            tracing::debug!(identity = %self.identity, holder = %self.holder, "lease acquired");
        } else {
            tracing::debug!(identity = %self.identity, "lease held elsewhere");
        }
        Ok(acquired)
    }

    /// Extend the lease. `Ok(false)` means ownership is lost and the caller
    /// must stop admitting work.
    pub fn renew(&self, ttl: Duration) -> Result<bool, DispatchError> {
        let renewed = self.store.renew(&self.identity, &self.holder, ttl)?;
        if !renewed {
            tracing::warn!(
                identity = %self.identity,
                holder = %self.holder,
                "lease renewal refused"
            );
        }
        Ok(renewed)
    }

    /// Release the lease if still held.
    pub fn release(&self) -> Result<(), DispatchError> {
        self.store.release(&self.identity, &self.holder)?;
        tracing::debug!(identity = %self.identity, "lease released");
        Ok(())
    }
}
