use facet::Facet;
use std::collections::BTreeMap;

use crate::PTime;

/// Process-wide memory counters read from the host at the start of a
/// cycle. All zero when the host exposes nothing — degraded, never an
/// error.
#[derive(Facet, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    pub heap_used: u64,
    pub heap_max: u64,
    pub heap_committed: u64,
    pub non_heap_used: u64,
}

/// Immutable result of one heap-analysis cycle.
///
/// One snapshot wins per cycle; the previous one is replaced wholesale and
/// no history is retained.
#[derive(Facet, Clone, Debug)]
pub struct HeapSnapshot {
    pub heap_used: u64,
    pub heap_max: u64,
    pub heap_committed: u64,
    pub non_heap_used: u64,
    pub tracked_objects: u64,
    pub tracked_bytes: u64,
    pub count_by_type: BTreeMap<String, u64>,
    pub bytes_by_type: BTreeMap<String, u64>,
    pub taken_at: PTime,
}

impl HeapSnapshot {
    /// Heap usage as a percentage of the maximum; exactly 0 when the
    /// maximum is unknown.
    pub fn heap_usage_percent(&self) -> f64 {
        if self.heap_max == 0 {
            0.0
        } else {
            self.heap_used as f64 * 100.0 / self.heap_max as f64
        }
    }
}

/// Per-type aggregate rebuilt by every heap cycle. Retained across cycles
/// only in the analyzer's last-known table for external display.
#[derive(Facet, Clone, Debug)]
pub struct ClassAggregate {
    pub type_name: String,
    pub instances: u64,
    pub total_bytes: u64,
    pub updated_at: PTime,
}

impl ClassAggregate {
    pub fn average_bytes(&self) -> u64 {
        if self.instances == 0 {
            0
        } else {
            self.total_bytes / self.instances
        }
    }
}
