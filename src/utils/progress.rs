use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, RefreshKind, System};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub batches: usize,
    pub processed: usize,
    pub successes: usize,
    pub errors: usize,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct ProcessStats {
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
}

#[cfg(feature = "cli")]
struct ProcessProbe {
    system: System,
    pid: Pid,
    peak_memory_mb: u64,
}

#[cfg(feature = "cli")]
impl ProcessProbe {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new_with_specifics(RefreshKind::everything());
        system.refresh_all();
        Some(Self {
            system,
            pid,
            peak_memory_mb: 0,
        })
    }

    fn sample(&mut self) -> Option<ProcessStats> {
        self.system.refresh_all();
        let process = self.system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;
        self.peak_memory_mb = self.peak_memory_mb.max(memory_mb);
        Some(ProcessStats {
            cpu_usage: process.cpu_usage(),
            memory_usage_mb: memory_mb,
            peak_memory_mb: self.peak_memory_mb,
        })
    }
}

/// Row and batch counters for one run, with optional process sampling.
pub struct RunProgress {
    counts: ProgressCounts,
    start_time: Instant,
    #[cfg(feature = "cli")]
    probe: Option<ProcessProbe>,
}

impl RunProgress {
    pub fn new(monitor_enabled: bool) -> Self {
        #[cfg(not(feature = "cli"))]
        let _ = monitor_enabled;

        Self {
            counts: ProgressCounts::default(),
            start_time: Instant::now(),
            #[cfg(feature = "cli")]
            probe: if monitor_enabled {
                ProcessProbe::new()
            } else {
                None
            },
        }
    }

    pub fn record_batch(&mut self, batch_index: usize, successes: usize, errors: usize) {
        self.counts.batches += 1;
        self.counts.processed += successes + errors;
        self.counts.successes += successes;
        self.counts.errors += errors;

        tracing::info!(
            "📦 Batch {} done: {} ok, {} failed (total processed: {})",
            batch_index,
            successes,
            errors,
            self.counts.processed
        );
        self.log_stats("batch");
    }

    pub fn counts(&self) -> &ProgressCounts {
        &self.counts
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[cfg(feature = "cli")]
    pub fn log_stats(&mut self, phase: &str) {
        if let Some(stats) = self.probe.as_mut().and_then(ProcessProbe::sample) {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB, Time: {:?}",
                phase,
                stats.cpu_usage,
                stats.memory_usage_mb,
                stats.peak_memory_mb,
                self.start_time.elapsed()
            );
        }
    }

    #[cfg(not(feature = "cli"))]
    pub fn log_stats(&mut self, _phase: &str) {}

    pub fn log_final(&mut self) {
        tracing::info!(
            "📊 Final: {} rows in {} batches ({} ok, {} failed) in {:?}",
            self.counts.processed,
            self.counts.batches,
            self.counts.successes,
            self.counts.errors,
            self.start_time.elapsed()
        );
        self.log_stats("final");
    }
}
