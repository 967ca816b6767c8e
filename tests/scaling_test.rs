//! Integration tests for the tab pool and adaptive scaling loop

use ariadne::pool::{ProcessMonitor, ScaleWeights, ScalingController, TabPool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct FixedMonitor {
    load: Mutex<(f64, f64)>,
}

impl FixedMonitor {
    fn new(cpu: f64, mem: f64) -> Arc<Self> {
        Arc::new(Self {
            load: Mutex::new((cpu, mem)),
        })
    }
}

impl ProcessMonitor for FixedMonitor {
    fn cpu_fraction(&self) -> f64 {
        self.load.lock().expect("lock").0
    }

    fn memory_fraction(&self) -> f64 {
        self.load.lock().expect("lock").1
    }
}

/// Saturates a pool of `capacity` slots with half of the tabs timed out
async fn saturated(capacity: usize) -> (Arc<TabPool>, Vec<ariadne::pool::PoolSlot>) {
    let pool = TabPool::new(capacity);
    let mut slots = Vec::new();
    for _ in 0..capacity {
        slots.push(pool.acquire().await.expect("slot"));
    }
    for _ in 0..capacity / 2 {
        pool.record_timeout();
    }
    (pool, slots)
}

fn controller(pool: &Arc<TabPool>, cpu: f64, mem: f64) -> ScalingController {
    ScalingController::new(
        Arc::clone(pool),
        FixedMonitor::new(cpu, mem),
        ScaleWeights::default(),
        Duration::from_millis(20),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_low_load_grows_pool() {
    let (pool, _slots) = saturated(10).await;
    assert_eq!(controller(&pool, 0.1, 0.1).tick(), 17);
    assert_eq!(pool.capacity(), 17);
}

#[tokio::test]
async fn test_high_load_halves_small_pool() {
    let (pool, _slots) = saturated(10).await;
    assert_eq!(controller(&pool, 0.8, 0.8).tick(), 5);
    assert_eq!(pool.capacity(), 5);
}

#[tokio::test]
async fn test_high_load_shrinks_large_pool_by_step() {
    let (pool, _slots) = saturated(100).await;
    assert_eq!(controller(&pool, 0.8, 0.8).tick(), 78);
}

#[tokio::test]
async fn test_idle_pool_is_not_resized() {
    let pool = TabPool::new(10);
    let _one = pool.acquire().await.expect("slot");
    assert_eq!(controller(&pool, 0.9, 0.9).tick(), 10);
}

#[tokio::test]
async fn test_loop_applies_decisions_until_cancelled() {
    let (pool, _slots) = saturated(10).await;
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(
        ScalingController::new(
            Arc::clone(&pool),
            FixedMonitor::new(0.1, 0.1),
            ScaleWeights::default(),
            Duration::from_millis(20),
            cancel.clone(),
        )
        .run(),
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pool.capacity() >= 17, "pool grew under low load");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop exits on cancel")
        .expect("join");
}

#[test]
fn test_weights_outside_range_are_rejected() {
    assert!(ScaleWeights::new(0.05, 0.5, 0.5).is_err());
    assert!(ScaleWeights::new(0.5, 0.95, 0.5).is_err());
    assert!(ScaleWeights::from_json(r#"{"CpuWeight": 0.5, "MemWeight": 0.2}"#).is_ok());
    assert!(ScaleWeights::from_json(r#"{"TabTTLWeight": 1.2}"#).is_err());
}
