//! Resizable tab pool and adaptive scaling
//!
//! The pool hands out one slot per running tab. Capacity can be changed
//! while tabs run: growing adds permits immediately, shrinking forgets idle
//! permits and retires busy ones as their tabs finish.

pub mod monitor;
pub mod scaling;

pub use monitor::{ProcessMonitor, SysinfoMonitor};
pub use scaling::{next_capacity, LoadSample, ScaleWeights, ScalingController};

use crate::error::{AriadneError, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded pool of concurrent tab slots
#[derive(Debug)]
pub struct TabPool {
    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    running: AtomicUsize,
    /// Permits still to be retired after a shrink
    debt: AtomicUsize,
    tabs_started: AtomicU64,
    tab_timeouts: AtomicU64,
    resize: Mutex<()>,
}

/// A held pool slot; frees itself on drop
#[derive(Debug)]
pub struct PoolSlot {
    pool: Arc<TabPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl TabPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity: AtomicUsize::new(capacity),
            running: AtomicUsize::new(0),
            debt: AtomicUsize::new(0),
            tabs_started: AtomicU64::new(0),
            tab_timeouts: AtomicU64::new(0),
            resize: Mutex::new(()),
        })
    }

    /// Waits for a free slot. Fails once the pool has been released.
    pub async fn acquire(self: &Arc<Self>) -> Result<PoolSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AriadneError::PoolClosed)?;
        self.running.fetch_add(1, Ordering::SeqCst);
        self.tabs_started.fetch_add(1, Ordering::SeqCst);
        Ok(PoolSlot {
            pool: Arc::clone(self),
            permit: Some(permit),
        })
    }

    /// Applies a new capacity without disturbing running tabs
    pub fn tune(&self, new_capacity: usize) {
        let _guard = self.resize.lock().unwrap_or_else(|e| e.into_inner());
        let new_capacity = new_capacity.max(1);
        let old = self.capacity.load(Ordering::SeqCst);
        if new_capacity > old {
            let mut grow = new_capacity - old;
            let debt = self.debt.load(Ordering::SeqCst);
            let paid = debt.min(grow);
            self.debt.fetch_sub(paid, Ordering::SeqCst);
            grow -= paid;
            if grow > 0 {
                self.semaphore.add_permits(grow);
            }
        } else if new_capacity < old {
            let shrink = old - new_capacity;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.debt.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }
        self.capacity.store(new_capacity, Ordering::SeqCst);
        debug!("Tab pool capacity {} -> {}", old, new_capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn tabs_started(&self) -> u64 {
        self.tabs_started.load(Ordering::SeqCst)
    }

    pub fn tab_timeouts(&self) -> u64 {
        self.tab_timeouts.load(Ordering::SeqCst)
    }

    pub fn record_timeout(&self) {
        self.tab_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    /// Share of started tabs that hit their deadline
    pub fn timeout_ratio(&self) -> f64 {
        let started = self.tabs_started();
        if started == 0 {
            return 0.0;
        }
        self.tab_timeouts() as f64 / started as f64
    }

    /// Closes the pool; waiting and future acquisitions fail
    pub fn release(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.running.fetch_sub(1, Ordering::SeqCst);
        let Some(permit) = self.permit.take() else {
            return;
        };
        let retire = self
            .pool
            .debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok();
        if retire {
            permit.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_counts_running() {
        let pool = TabPool::new(2);
        let a = pool.acquire().await.expect("slot");
        let _b = pool.acquire().await.expect("slot");
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.tabs_started(), 2);
        drop(a);
        assert_eq!(pool.running(), 1);
    }

    #[tokio::test]
    async fn test_grow_admits_waiters() {
        let pool = TabPool::new(1);
        let _held = pool.acquire().await.expect("slot");
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        pool.tune(2);
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter admitted")
            .expect("join");
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn test_shrink_retires_busy_slots() {
        let pool = TabPool::new(3);
        let a = pool.acquire().await.expect("slot");
        let b = pool.acquire().await.expect("slot");
        let c = pool.acquire().await.expect("slot");
        pool.tune(1);
        assert_eq!(pool.capacity(), 1);
        drop(a);
        drop(b);
        // Two permits were retired, only one remains after the last slot frees
        drop(c);
        let first = pool.acquire().await.expect("slot");
        let second = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(second.is_err());
        drop(first);
    }

    #[tokio::test]
    async fn test_release_fails_acquire() {
        let pool = TabPool::new(1);
        pool.release();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(AriadneError::PoolClosed)));
    }

    #[test]
    fn test_timeout_ratio() {
        let pool = TabPool::new(1);
        assert_eq!(pool.timeout_ratio(), 0.0);
        pool.tabs_started.store(4, Ordering::SeqCst);
        pool.record_timeout();
        assert!((pool.timeout_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
