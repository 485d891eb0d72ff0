//! Per-network nonce tracking.
//!
//! Each chain gets one mutex-guarded slot holding the next nonce to use.
//! A lease holds that lock for the duration of a send, so concurrent
//! senders on a network are strictly serialized: committed sends hand the
//! next lease exactly nonce + 1, and a failed send invalidates the slot so
//! the next lease re-seeds from the chain's pending transaction count.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::ChainError;

#[derive(Default)]
pub struct NonceTracker {
    slots: DashMap<u64, Arc<Mutex<Option<u64>>>>,
}

/// Exclusive claim on a network's next nonce, held across the send.
///
/// Dropping the lease without committing leaves the slot unchanged, so an
/// attempt that never reached the wire reuses the same nonce.
pub struct NonceLease {
    guard: OwnedMutexGuard<Option<u64>>,
    nonce: u64,
}

impl NonceLease {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The send went out; the next lease sees nonce + 1.
    pub fn commit(mut self) {
        *self.guard = Some(self.nonce + 1);
    }

    /// The send failed and the local count may be stale; the next lease
    /// re-seeds from the chain.
    pub fn invalidate(mut self) {
        *self.guard = None;
    }
}

impl NonceTracker {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Acquire the chain's submission lock and resolve the next nonce,
    /// calling `seed` (the chain's pending transaction count) when no local
    /// count is tracked.
    pub async fn lease<F, Fut>(&self, chain_id: u64, seed: F) -> Result<NonceLease, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, ChainError>>,
    {
        let slot = {
            let entry = self.slots.entry(chain_id).or_default();
            Arc::clone(entry.value())
        };
        let mut guard = slot.lock_owned().await;
        let nonce = match *guard {
            Some(n) => n,
            None => {
                let seeded = seed().await?;
                *guard = Some(seeded);
                seeded
            }
        };
        Ok(NonceLease { guard, nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leases_never_reuse_a_nonce() {
        let tracker = Arc::new(NonceTracker::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = Arc::clone(&tracker);
            let seen = Arc::clone(&seen);
            handles.push(tokio::spawn(async move {
                let lease = tracker
                    .lease(1, || async { Ok::<_, ChainError>(5) })
                    .await
                    .unwrap();
                // Recorded while the lock is held, so the vec order is the
                // submission order.
                seen.lock().await.push(lease.nonce());
                tokio::task::yield_now().await;
                lease.commit();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 16);
        for (i, nonce) in seen.iter().enumerate() {
            assert_eq!(*nonce, 5 + i as u64);
        }
    }

    #[tokio::test]
    async fn test_invalidate_forces_reseed_and_commit_wins_over_seed() {
        let tracker = NonceTracker::new();

        let lease = tracker
            .lease(1, || async { Ok::<_, ChainError>(7) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 7);
        lease.invalidate();

        // Invalidated slot takes the fresh seed, not 7 or 8.
        let lease = tracker
            .lease(1, || async { Ok::<_, ChainError>(42) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 42);
        lease.commit();

        // A committed count makes the seed irrelevant.
        let lease = tracker
            .lease(1, || async { Ok::<_, ChainError>(99) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 43);
    }

    #[tokio::test]
    async fn test_dropped_lease_reuses_nonce_and_chains_are_independent() {
        let tracker = NonceTracker::new();

        let lease = tracker
            .lease(1, || async { Ok::<_, ChainError>(3) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 3);
        drop(lease);

        // Nothing was sent, so the same nonce comes back.
        let lease = tracker
            .lease(1, || async { Ok::<_, ChainError>(99) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 3);
        lease.commit();

        // A different chain seeds its own slot.
        let lease = tracker
            .lease(137, || async { Ok::<_, ChainError>(0) })
            .await
            .unwrap();
        assert_eq!(lease.nonce(), 0);
    }

    #[tokio::test]
    async fn test_seed_error_propagates() {
        let tracker = NonceTracker::new();
        let result = tracker
            .lease(1, || async {
                Err::<u64, _>(ChainError::Rpc("unreachable".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ChainError::Rpc(_))));
    }
}
