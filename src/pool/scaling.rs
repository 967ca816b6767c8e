//! Load-driven pool capacity control

use super::{ProcessMonitor, TabPool};
use crate::error::{AriadneError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_WEIGHT: f64 = 0.1;
const MAX_WEIGHT: f64 = 0.9;
const HIGH_LOAD: f64 = 0.7;
const LOW_LOAD: f64 = 0.4;
const STEP_FACTOR: f64 = 30.0;

/// Weights of the three load inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleWeights {
    #[serde(rename = "CpuWeight")]
    pub cpu: f64,
    #[serde(rename = "MemWeight")]
    pub mem: f64,
    #[serde(rename = "TabTTLWeight")]
    pub tab_ttl: f64,
}

impl Default for ScaleWeights {
    fn default() -> Self {
        Self {
            cpu: 0.4,
            mem: 0.3,
            tab_ttl: 0.3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeightsInput {
    #[serde(rename = "CpuWeight")]
    cpu: Option<f64>,
    #[serde(rename = "MemWeight")]
    mem: Option<f64>,
    #[serde(rename = "TabTTLWeight")]
    tab_ttl: Option<f64>,
}

impl ScaleWeights {
    /// Builds weights, each of which must lie in [0.1, 0.9]
    pub fn new(cpu: f64, mem: f64, tab_ttl: f64) -> Result<Self> {
        for (name, value) in [("CpuWeight", cpu), ("MemWeight", mem), ("TabTTLWeight", tab_ttl)] {
            if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&value) {
                return Err(AriadneError::ConfigError(format!(
                    "{name} must be between {MIN_WEIGHT} and {MAX_WEIGHT}, got {value}"
                )));
            }
        }
        Ok(Self { cpu, mem, tab_ttl })
    }

    /// Parses `{"CpuWeight":..,"MemWeight":..,"TabTTLWeight":..}`; missing keys keep defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let input: WeightsInput = serde_json::from_str(json)
            .map_err(|e| AriadneError::ConfigError(format!("invalid scale weights: {e}")))?;
        let defaults = Self::default();
        Self::new(
            input.cpu.unwrap_or(defaults.cpu),
            input.mem.unwrap_or(defaults.mem),
            input.tab_ttl.unwrap_or(defaults.tab_ttl),
        )
    }

    pub fn load(&self, sample: &LoadSample) -> f64 {
        sample.cpu * self.cpu + sample.mem * self.mem + sample.timeout_ratio * self.tab_ttl
    }
}

/// One observation of process load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub cpu: f64,
    pub mem: f64,
    pub timeout_ratio: f64,
}

/// Capacity after one scaling decision. Only a saturated pool is resized.
pub fn next_capacity(capacity: usize, running: usize, load: f64) -> usize {
    if running < capacity {
        return capacity;
    }
    let step = (STEP_FACTOR * load).ceil().max(0.0) as usize;
    let next = if load > HIGH_LOAD {
        if step < capacity {
            capacity - step
        } else {
            capacity - capacity.div_ceil(2)
        }
    } else if load < LOW_LOAD {
        capacity + step
    } else {
        capacity
    };
    next.max(1)
}

/// Periodic loop resizing a pool from process load
pub struct ScalingController {
    pool: Arc<TabPool>,
    monitor: Arc<dyn ProcessMonitor>,
    weights: ScaleWeights,
    interval: Duration,
    cancel: CancellationToken,
}

impl ScalingController {
    pub fn new(
        pool: Arc<TabPool>,
        monitor: Arc<dyn ProcessMonitor>,
        weights: ScaleWeights,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            monitor,
            weights,
            interval,
            cancel,
        }
    }

    /// Runs until the cancellation token fires
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Scaling loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// Samples load once and applies the decision; returns the new capacity
    pub fn tick(&self) -> usize {
        let sample = LoadSample {
            cpu: self.monitor.cpu_fraction(),
            mem: self.monitor.memory_fraction(),
            timeout_ratio: self.pool.timeout_ratio(),
        };
        let load = self.weights.load(&sample);
        let capacity = self.pool.capacity();
        let next = next_capacity(capacity, self.pool.running(), load);
        if next != capacity {
            info!(
                "Load {:.2} (cpu {:.2}, mem {:.2}, timeouts {:.2}): tab pool {} -> {}",
                load, sample.cpu, sample.mem, sample.timeout_ratio, capacity, next
            );
            self.pool.tune(next);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(cpu: f64, mem: f64, ratio: f64) -> f64 {
        ScaleWeights::default().load(&LoadSample {
            cpu,
            mem,
            timeout_ratio: ratio,
        })
    }

    #[test]
    fn test_grow_under_low_load() {
        assert_eq!(next_capacity(10, 10, load(0.1, 0.1, 0.5)), 17);
    }

    #[test]
    fn test_halve_when_step_exceeds_capacity() {
        assert_eq!(next_capacity(10, 10, load(0.8, 0.8, 0.5)), 5);
    }

    #[test]
    fn test_shrink_by_step() {
        assert_eq!(next_capacity(100, 100, load(0.8, 0.8, 0.5)), 78);
    }

    #[test]
    fn test_unsaturated_pool_is_left_alone() {
        assert_eq!(next_capacity(10, 9, load(0.1, 0.1, 0.5)), 10);
        assert_eq!(next_capacity(10, 10, 0.5), 10);
    }

    #[test]
    fn test_never_below_one() {
        assert_eq!(next_capacity(1, 1, 1.0), 1);
    }

    #[test]
    fn test_weights_validation() {
        assert!(ScaleWeights::new(0.1, 0.9, 0.5).is_ok());
        assert!(ScaleWeights::new(0.05, 0.3, 0.3).is_err());
        assert!(ScaleWeights::new(0.4, 0.95, 0.3).is_err());
        assert!(ScaleWeights::from_json(r#"{"CpuWeight":0.5,"MemWeight":0.2,"TabTTLWeight":0.3}"#).is_ok());
        assert!(ScaleWeights::from_json(r#"{"TabTTLWeight":1.0}"#).is_err());
        assert!(ScaleWeights::from_json("not json").is_err());
        let partial = ScaleWeights::from_json(r#"{"MemWeight":0.2}"#).expect("valid");
        assert!((partial.cpu - 0.4).abs() < f64::EPSILON);
        assert!((partial.mem - 0.2).abs() < f64::EPSILON);
    }
}
