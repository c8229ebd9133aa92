//! Process-wide memory counters.
//!
//! Maps native process accounting onto the heap/non-heap split the
//! snapshot reports: anonymous RSS is "heap" (allocator-backed memory),
//! file+shmem RSS is "non-heap", virtual size is "committed", and the
//! machine's total memory is the ceiling the process could grow to.
//! Everything here is best-effort: a missing `/proc` or an unknown pid
//! degrades to zeros, never to an error.

use census_types::MemoryCounters;
use parking_lot::Mutex;
use std::sync::OnceLock;
use sysinfo::System;
use tracing::debug;

/// Read the current counters. Cheap enough to run once per cycle.
pub fn sample() -> MemoryCounters {
    let (heap_max, heap_committed, rss_total) = system_counters();
    let rss = RssBreakdown::read();
    MemoryCounters {
        heap_used: rss.anon.unwrap_or(rss_total),
        heap_max,
        heap_committed,
        non_heap_used: rss.file_backed.unwrap_or(0),
    }
}

/// (total system memory, process virtual size, process RSS), zeros when
/// unavailable.
fn system_counters() -> (u64, u64, u64) {
    static SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();
    let mut sys = SYSTEM.get_or_init(|| Mutex::new(System::new())).lock();
    sys.refresh_memory();
    let total = sys.total_memory();

    let (virt, rss) = match sysinfo::get_current_pid() {
        Ok(pid) => {
            sys.refresh_process(pid);
            match sys.process(pid) {
                Some(me) => (me.virtual_memory(), me.memory()),
                None => (0, 0),
            }
        }
        Err(err) => {
            debug!(error = err, "current pid unavailable; process counters degraded to zero");
            (0, 0)
        }
    };
    (total, virt, rss)
}

/// Anonymous vs file-backed resident memory, from `/proc/self/status`.
struct RssBreakdown {
    anon: Option<u64>,
    file_backed: Option<u64>,
}

impl RssBreakdown {
    #[cfg(target_os = "linux")]
    fn read() -> Self {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(err) => {
                // `/proc` may be absent in sandboxed environments; only log
                // unexpected filesystem errors.
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(error = %err, "failed to read /proc/self/status while sampling rss");
                }
                return Self {
                    anon: None,
                    file_backed: None,
                };
            }
        };

        let mut anon = None;
        let mut file_backed = 0u64;
        let mut saw_file_backed = false;
        for line in status.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix("RssAnon:") {
                anon = parse_kb_line(rest);
            } else if let Some(rest) = line.strip_prefix("RssFile:") {
                if let Some(bytes) = parse_kb_line(rest) {
                    file_backed = file_backed.saturating_add(bytes);
                    saw_file_backed = true;
                }
            } else if let Some(rest) = line.strip_prefix("RssShmem:") {
                if let Some(bytes) = parse_kb_line(rest) {
                    file_backed = file_backed.saturating_add(bytes);
                    saw_file_backed = true;
                }
            }
        }
        Self {
            anon,
            file_backed: saw_file_backed.then_some(file_backed),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read() -> Self {
        Self {
            anon: None,
            file_backed: None,
        }
    }
}

/// Parse the `<n> kB` tail of a `/proc/self/status` line into bytes.
#[cfg(target_os = "linux")]
fn parse_kb_line(rest: &str) -> Option<u64> {
    let kb = rest.split_whitespace().next()?;
    match kb.parse::<u64>() {
        Ok(kb) => Some(kb.saturating_mul(1024)),
        Err(err) => {
            debug!(value = kb, error = %err, "failed to parse rss line from /proc/self/status");
            None
        }
    }
}
