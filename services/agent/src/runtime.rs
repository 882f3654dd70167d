//! Runtime statistics gathered on every poll tick.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;
use pulse_core::{Metric, MetricValue};
use rand::Rng;
use sysinfo::{Pid, System};
use tracing::trace;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";
pub const UPTIME: &str = "Uptime";
pub const TOTAL_MEMORY: &str = "TotalMemory";
pub const FREE_MEMORY: &str = "FreeMemory";
pub const RESIDENT_MEMORY: &str = "ResidentMemory";
pub const VIRTUAL_MEMORY: &str = "VirtualMemory";
/// Prefix of the per-CPU utilization gauges, numbered from 1.
pub const CPU_UTILIZATION: &str = "CPUutilization";

/// Latest gauges plus counter deltas not yet acknowledged by the collector.
pub struct RuntimeStats {
    started: Instant,
    pid: Option<Pid>,
    system: Mutex<System>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    gauges: BTreeMap<String, f64>,
    pending: BTreeMap<&'static str, i64>,
}

impl std::fmt::Debug for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeStats").field("started", &self.started).field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl Default for RuntimeStats {
    fn default() -> Self { Self::new() }
}

impl RuntimeStats {
    pub fn new() -> Self {
        // One System per poller; CPU usage is computed between consecutive refreshes.
        Self {
            started: Instant::now(),
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
            state: Mutex::new(State::default()),
        }
    }

    pub fn poll(&self) {
        let mut gauges = vec![
            (RANDOM_VALUE.to_owned(), rand::thread_rng().gen::<f64>()),
            (UPTIME.to_owned(), self.started.elapsed().as_secs_f64()),
        ];
        gauges.extend(self.system_gauges());
        let mut st = self.state.lock();
        st.gauges.extend(gauges);
        *st.pending.entry(POLL_COUNT).or_insert(0) += 1;
        trace!(gauges = st.gauges.len(), "runtime polled");
    }

    fn system_gauges(&self) -> Vec<(String, f64)> {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.refresh_cpu();
        let mut gauges = vec![
            (TOTAL_MEMORY.to_owned(), sys.total_memory() as f64),
            (FREE_MEMORY.to_owned(), sys.free_memory() as f64),
        ];
        for (i, cpu) in sys.cpus().iter().enumerate() {
            gauges.push((format!("{CPU_UTILIZATION}{}", i + 1), f64::from(cpu.cpu_usage())));
        }
        if let Some(pid) = self.pid {
            if sys.refresh_process(pid) {
                if let Some(process) = sys.process(pid) {
                    gauges.push((RESIDENT_MEMORY.to_owned(), process.memory() as f64));
                    gauges.push((VIRTUAL_MEMORY.to_owned(), process.virtual_memory() as f64));
                }
            }
        }
        gauges
    }

    /// Copies the current state out; nothing is reset until [`RuntimeStats::acknowledge`].
    pub fn snapshot(&self) -> Vec<Metric> {
        let st = self.state.lock();
        let gauges = st.gauges.iter().map(|(id, v)| Metric::gauge(id.as_str(), *v));
        let counters = st.pending.iter().filter(|(_, d)| **d != 0).map(|(id, d)| Metric::counter(*id, *d));
        gauges.chain(counters).collect()
    }

    /// Subtracts delivered counter deltas, keeping increments that arrived after the snapshot.
    pub fn acknowledge(&self, sent: &[Metric]) {
        let mut st = self.state.lock();
        for m in sent {
            if let MetricValue::Counter(d) = m.value {
                if let Some(pending) = st.pending.get_mut(m.id.as_str()) {
                    *pending -= d;
                }
            }
        }
    }

    pub fn pending(&self, id: &str) -> i64 {
        self.state.lock().pending.get(id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge(snap: &[Metric], id: &str) -> Option<f64> {
        snap.iter().find(|m| m.id == id).and_then(|m| match m.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        })
    }

    #[test]
    fn poll_counts_and_records_gauges() {
        let stats = RuntimeStats::new();
        stats.poll();
        stats.poll();
        let snap = stats.snapshot();
        assert!(gauge(&snap, RANDOM_VALUE).is_some());
        assert!(gauge(&snap, UPTIME).is_some());
        assert!(snap.contains(&Metric::counter(POLL_COUNT, 2)));
    }

    #[test]
    fn system_memory_gauges_reported() {
        let stats = RuntimeStats::new();
        stats.poll();
        let snap = stats.snapshot();
        let total = gauge(&snap, TOTAL_MEMORY).unwrap();
        let free = gauge(&snap, FREE_MEMORY).unwrap();
        assert!(free <= total);
        if sysinfo::IS_SUPPORTED_SYSTEM {
            assert!(total > 0.0);
            assert!(gauge(&snap, RESIDENT_MEMORY).unwrap() > 0.0);
            assert!(snap.iter().any(|m| m.id == format!("{CPU_UTILIZATION}1")));
        }
    }

    #[test]
    fn acknowledge_keeps_late_increments() {
        let stats = RuntimeStats::new();
        stats.poll();
        stats.poll();
        let snap = stats.snapshot();
        stats.poll();
        stats.acknowledge(&snap);
        assert_eq!(stats.pending(POLL_COUNT), 1);
        assert!(stats.snapshot().contains(&Metric::counter(POLL_COUNT, 1)));
    }

    #[test]
    fn empty_before_first_poll() {
        assert!(RuntimeStats::new().snapshot().is_empty());
    }
}
