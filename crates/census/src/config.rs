use std::time::Duration;

use tracing::warn;

/// Engine configuration: plain values plus environment overrides.
#[derive(Clone, Debug)]
pub struct CensusConfig {
    /// Cadence of the analysis cycle.
    pub analysis_interval: Duration,
    /// Threads of the runtime that drives the cycle and asynchronous
    /// notification delivery.
    pub worker_threads: usize,
    /// Soft cap on the tracked population; registrations past it are
    /// rejected.
    pub max_tracked_objects: usize,
    /// Register every nth eligible construction; 1 tracks everything.
    pub sample_every: u32,
    /// Whether the heap pass runs each cycle.
    pub heap_analysis: bool,
    /// Whether the reference-graph pass runs each cycle.
    pub reference_tracking: bool,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            analysis_interval: Duration::from_millis(1000),
            worker_threads: 4,
            max_tracked_objects: 100_000,
            sample_every: 1,
            heap_analysis: true,
            reference_tracking: true,
        }
    }
}

impl CensusConfig {
    /// Defaults overridden by `CENSUS_*` environment variables. Anything
    /// unparseable keeps its default with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = read_env::<u64>("CENSUS_INTERVAL_MS") {
            cfg.analysis_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = read_env::<usize>("CENSUS_WORKER_THREADS") {
            cfg.worker_threads = n.max(1);
        }
        if let Some(n) = read_env("CENSUS_MAX_TRACKED") {
            cfg.max_tracked_objects = n;
        }
        if let Some(n) = read_env::<u32>("CENSUS_SAMPLE_EVERY") {
            cfg.sample_every = n.max(1);
        }
        if let Some(enabled) = read_env("CENSUS_HEAP_ANALYSIS") {
            cfg.heap_analysis = enabled;
        }
        if let Some(enabled) = read_env("CENSUS_REFERENCE_TRACKING") {
            cfg.reference_tracking = enabled;
        }
        cfg
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CensusConfig::default();
        assert_eq!(cfg.analysis_interval, Duration::from_millis(1000));
        assert_eq!(cfg.max_tracked_objects, 100_000);
        assert_eq!(cfg.sample_every, 1);
        assert!(cfg.heap_analysis);
        assert!(cfg.reference_tracking);
    }

    // One test so the process environment is only touched from one thread.
    #[test]
    fn env_overrides() {
        // SAFETY: no other test reads or writes these variables.
        unsafe { std::env::set_var("CENSUS_INTERVAL_MS", "250") };
        let cfg = CensusConfig::from_env();
        assert_eq!(cfg.analysis_interval, Duration::from_millis(250));

        // Unparseable values keep the default.
        unsafe { std::env::set_var("CENSUS_SAMPLE_EVERY", "every-other") };
        let cfg = CensusConfig::from_env();
        assert_eq!(cfg.sample_every, 1);

        // A zero interval is clamped rather than spinning the scheduler.
        unsafe { std::env::set_var("CENSUS_INTERVAL_MS", "0") };
        let cfg = CensusConfig::from_env();
        assert_eq!(cfg.analysis_interval, Duration::from_millis(1));

        unsafe {
            std::env::remove_var("CENSUS_INTERVAL_MS");
            std::env::remove_var("CENSUS_SAMPLE_EVERY");
        }
    }
}
