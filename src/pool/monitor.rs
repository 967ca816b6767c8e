//! Process load sampling for adaptive scaling

use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of process load figures, each a fraction in [0, 1]
pub trait ProcessMonitor: Send + Sync {
    fn cpu_fraction(&self) -> f64;
    fn memory_fraction(&self) -> f64;
}

/// Samples the current process through sysinfo
pub struct SysinfoMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    cores: usize,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
            cores: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }

    fn refresh(&self, system: &mut System) {
        if let Some(pid) = self.pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor for SysinfoMonitor {
    fn cpu_fraction(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        self.refresh(&mut system);
        let usage = self
            .pid
            .and_then(|pid| system.process(pid))
            .map_or(0.0, |p| f64::from(p.cpu_usage()));
        (usage / 100.0 / self.cores as f64).clamp(0.0, 1.0)
    }

    fn memory_fraction(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        self.refresh(&mut system);
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = self
            .pid
            .and_then(|pid| system.process(pid))
            .map_or(0, |p| p.memory());
        (used as f64 / total as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractions_in_range() {
        let monitor = SysinfoMonitor::new();
        let cpu = monitor.cpu_fraction();
        let mem = monitor.memory_fraction();
        assert!((0.0..=1.0).contains(&cpu));
        assert!((0.0..=1.0).contains(&mem));
    }
}
