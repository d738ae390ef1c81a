use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// A resource's mutex plus the number of callers holding or waiting on it.
#[derive(Default)]
struct Slot {
    mutex: Arc<Mutex<()>>,
    users: usize,
}

/// Per-resource mutexes, created on demand and dropped once nobody holds or
/// waits on them.
#[derive(Default)]
pub struct ResourceLocks {
    slots: Arc<DashMap<Ulid, Slot>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the resource's mutex. Dropping the future before it resolves
    /// still releases this caller's claim on the entry.
    pub async fn acquire(&self, resource_id: Ulid) -> ResourceLockGuard {
        let (mutex, lease) = self.lease(resource_id);
        let guard = mutex.lock_owned().await;
        ResourceLockGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    fn lease(&self, resource_id: Ulid) -> (Arc<Mutex<()>>, Lease) {
        let mut slot = self.slots.entry(resource_id).or_default();
        slot.users += 1;
        let mutex = slot.mutex.clone();
        drop(slot);
        let lease = Lease {
            resource_id,
            slots: self.slots.clone(),
        };
        (mutex, lease)
    }

    /// Number of resources with a live lock entry.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One caller's claim on a slot, released on drop whether or not the mutex
/// was ever acquired.
struct Lease {
    resource_id: Ulid,
    slots: Arc<DashMap<Ulid, Slot>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.slots.entry(self.resource_id) {
            let slot = entry.get_mut();
            slot.users -= 1;
            if slot.users == 0 {
                entry.remove();
            }
        }
    }
}

pub struct ResourceLockGuard {
    // Fields drop in order: the mutex is released before the lease can
    // remove the entry.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_resource_is_serialized() {
        let locks = Arc::new(ResourceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let rid = Ulid::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_inside) = (locks.clone(), inside.clone(), max_inside.clone());
            handles.push(tokio::spawn(async move {
                let _g = locks.acquire(rid).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_resources_do_not_block() {
        let locks = ResourceLocks::new();
        let _a = locks.acquire(Ulid::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Ulid::new())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_removed_after_release() {
        let locks = ResourceLocks::new();
        let rid = Ulid::new();
        {
            let _g = locks.acquire(rid).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_entry() {
        let locks = ResourceLocks::new();
        let rid = Ulid::new();
        let holder = locks.acquire(rid).await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire(rid)).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(holder);
        assert!(locks.is_empty());

        // A fresh caller still gets the lock afterwards.
        let again = tokio::time::timeout(Duration::from_millis(100), locks.acquire(rid)).await;
        assert!(again.is_ok());
    }
}
