//! Packet storage pool
//!
//! Caps how many reassembled packets can be alive at once. The reader
//! acquires a permit before it consumes the first byte of a packet, so a dry
//! pool never costs stream data; the reader just backs off and retries. The
//! permit travels inside the packet and returns to the pool when the packet
//! is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PoolInner {
    available: AtomicUsize,
    capacity: usize,
}

/// Counted pool of packet-storage permits.
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    /// Create a pool with `capacity` permits.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                available: AtomicUsize::new(capacity),
                capacity,
            }),
        }
    }

    /// Take a permit, or `None` if the pool is dry.
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        self.inner
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| PoolPermit {
                inner: Arc::clone(&self.inner),
            })
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Total number of permits the pool was created with.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// Permission to hold one packet's backing storage. Returns to its pool on
/// drop.
pub struct PoolPermit {
    inner: Arc<PoolInner>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.inner.available.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for PoolPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolPermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_dry() {
        let pool = PacketPool::new(2);
        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_permit_returns_on_drop() {
        let pool = PacketPool::new(1);
        let permit = pool.try_acquire().expect("pool should start full");
        assert_eq!(pool.available(), 0);
        drop(permit);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }
}
