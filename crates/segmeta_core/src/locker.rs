//! Stripe-level exclusion gate for mode switches.

use crate::types::StripeId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Locker operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerMode {
    /// Ordinary I/O; locks always granted.
    Normal,
    /// Exclusive mode for rebuild-sensitive operations.
    Busy,
}

#[derive(Debug)]
struct LockerInner {
    working_set: HashSet<u32>,
    mode: LockerMode,
}

/// Tracks in-flight stripe operations and gates the switch to `Busy`.
///
/// Ordinary I/O registers each stripe it touches with [`Self::try_lock`]
/// and removes it with [`Self::unlock`]; both are O(1) and never block.
/// The rebuild control loop requests `Busy` with [`Self::state_change`],
/// which succeeds only once the working set has drained.
///
/// This is a polling gate, not a barrier: `state_change` never waits.
/// A caller needing "wait until busy is achievable" loops externally,
/// with its own deadline. The working set is purely in-memory and resets
/// with the process.
#[derive(Debug)]
pub struct StripeLocker {
    inner: Mutex<LockerInner>,
}

impl Default for StripeLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl StripeLocker {
    /// Creates a locker in `Normal` mode with an empty working set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockerInner {
                working_set: HashSet::new(),
                mode: LockerMode::Normal,
            }),
        }
    }

    /// Registers an in-flight operation on `stripe`. Always succeeds.
    ///
    /// Refusing locks while `Busy` is the mode-aware caller's policy,
    /// not this primitive's.
    pub fn try_lock(&self, stripe: StripeId) -> bool {
        self.inner.lock().working_set.insert(stripe.as_u32());
        true
    }

    /// Removes `stripe` from the working set.
    ///
    /// Removing an absent id is a no-op, not an error.
    pub fn unlock(&self, stripe: StripeId) {
        self.inner.lock().working_set.remove(&stripe.as_u32());
    }

    /// Requests a mode transition. Only `Normal` → `Busy` is legal.
    ///
    /// Returns `false` and leaves the mode unchanged if the requested
    /// mode is not `Busy` or the working set is non-empty; the caller
    /// polls until the in-flight stripes drain. Never waits.
    pub fn state_change(&self, requested: LockerMode) -> bool {
        if requested != LockerMode::Busy {
            tracing::warn!(?requested, "locker: requested mode is invalid");
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.working_set.is_empty() {
            tracing::debug!("locker mode changed normal to busy");
            inner.mode = LockerMode::Busy;
            return true;
        }

        tracing::debug!(
            remaining = inner.working_set.len(),
            "locker: waiting for in-flight stripe io"
        );
        false
    }

    /// Current working-set size, for diagnostics and polling.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().working_set.len()
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> LockerMode {
        self.inner.lock().mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe(id: u32) -> StripeId {
        StripeId::new(id)
    }

    #[test]
    fn starts_normal_and_empty() {
        let locker = StripeLocker::new();
        assert_eq!(locker.mode(), LockerMode::Normal);
        assert_eq!(locker.count(), 0);
    }

    #[test]
    fn try_lock_always_succeeds() {
        let locker = StripeLocker::new();
        assert!(locker.try_lock(stripe(5)));
        assert!(locker.try_lock(stripe(6)));
        assert_eq!(locker.count(), 2);
    }

    #[test]
    fn relocking_same_stripe_counts_once() {
        let locker = StripeLocker::new();
        assert!(locker.try_lock(stripe(5)));
        assert!(locker.try_lock(stripe(5)));
        assert_eq!(locker.count(), 1);
    }

    #[test]
    fn unlock_absent_is_noop() {
        let locker = StripeLocker::new();
        locker.unlock(stripe(9));
        assert_eq!(locker.count(), 0);
    }

    #[test]
    fn lock_unlock_restores_count() {
        let locker = StripeLocker::new();
        locker.try_lock(stripe(5));
        assert_eq!(locker.count(), 1);
        locker.unlock(stripe(5));
        assert_eq!(locker.count(), 0);
    }

    #[test]
    fn busy_refused_while_working_set_nonempty() {
        let locker = StripeLocker::new();
        locker.try_lock(stripe(5));

        assert!(!locker.state_change(LockerMode::Busy));
        assert_eq!(locker.mode(), LockerMode::Normal);

        locker.unlock(stripe(5));
        assert!(locker.state_change(LockerMode::Busy));
        assert_eq!(locker.mode(), LockerMode::Busy);
    }

    #[test]
    fn normal_request_always_refused() {
        let locker = StripeLocker::new();
        assert!(!locker.state_change(LockerMode::Normal));
        assert_eq!(locker.mode(), LockerMode::Normal);
    }

    #[test]
    fn busy_succeeds_immediately_when_empty() {
        let locker = StripeLocker::new();
        assert!(locker.state_change(LockerMode::Busy));
    }
}
