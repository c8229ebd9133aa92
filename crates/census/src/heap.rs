//! Heap statistics over the tracked population.

use census_types::{
    CensusEvent, ClassAggregate, HeapSnapshot, PTime, Shape, ValueKind,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::events::EventBus;
use crate::process;
use crate::registry::ObjectRegistry;

/// Fixed header cost charged to every object.
pub const OBJECT_HEADER_BYTES: u64 = 16;
/// Fixed cost of a reference-typed slot (pointer width).
pub const REFERENCE_BYTES: u64 = 8;

/// Estimated footprint of an object with the given declared shape.
///
/// A deterministic heuristic, not an authoritative layout: header plus the
/// declared slot widths, rounded up to the next multiple of 8. Never
/// recurses into referenced objects, so nothing is double-counted and
/// cycles cost nothing.
pub fn estimate_size(shape: &Shape) -> u64 {
    let mut size = OBJECT_HEADER_BYTES;
    match shape {
        Shape::Array { elem, len } => {
            size += *len as u64 * slot_width(*elem);
        }
        Shape::Object { fields } => {
            for field in fields {
                size += slot_width(field.kind);
            }
        }
    }
    align8(size)
}

fn slot_width(kind: ValueKind) -> u64 {
    match kind {
        ValueKind::Prim(prim) => prim.width(),
        ValueKind::Reference => REFERENCE_BYTES,
    }
}

fn align8(size: u64) -> u64 {
    size.div_ceil(8) * 8
}

/// Builds one immutable [`HeapSnapshot`] per cycle from the registry's
/// alive population plus process-wide counters.
pub struct HeapAnalyzer {
    registry: Arc<ObjectRegistry>,
    events: Arc<EventBus>,
    analyzing: AtomicBool,
    last_snapshot: Mutex<Option<Arc<HeapSnapshot>>>,
    class_stats: Mutex<BTreeMap<&'static str, ClassAggregate>>,
}

impl HeapAnalyzer {
    pub fn new(registry: Arc<ObjectRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            registry,
            events,
            analyzing: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
            class_stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn start(&self) {
        self.analyzing.store(true, Ordering::SeqCst);
        info!("heap analyzer started");
    }

    pub fn stop(&self) {
        self.analyzing.store(false, Ordering::SeqCst);
        info!("heap analyzer stopped");
    }

    /// Run one analysis pass. `None` while stopped. On success the new
    /// snapshot replaces the previous one and `HeapAnalyzed` is published
    /// after the replacement is visible.
    pub fn analyze(&self) -> Option<Arc<HeapSnapshot>> {
        if !self.analyzing.load(Ordering::SeqCst) {
            return None;
        }
        let started = Instant::now();
        let counters = process::sample();
        let entries = self.registry.enumerate_alive();
        let now = PTime::now();

        let mut count_by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut bytes_by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut aggregates: BTreeMap<&'static str, ClassAggregate> = BTreeMap::new();
        let mut tracked_bytes = 0u64;

        for entry in &entries {
            // Reclaimed between the purge and this fold: skip, the next
            // enumeration retires the entry.
            let Some(instance) = entry.instance() else {
                continue;
            };
            let type_name = entry.type_name();
            let size = match instance.shape() {
                Ok(shape) => estimate_size(&shape),
                Err(err) => {
                    debug!(
                        id = %entry.id(),
                        type_name,
                        error = %err,
                        "shape unreadable; charging header only"
                    );
                    align8(OBJECT_HEADER_BYTES)
                }
            };

            tracked_bytes += size;
            *count_by_type.entry(type_name.to_owned()).or_insert(0) += 1;
            *bytes_by_type.entry(type_name.to_owned()).or_insert(0) += size;
            let aggregate = aggregates.entry(type_name).or_insert_with(|| ClassAggregate {
                type_name: type_name.to_owned(),
                instances: 0,
                total_bytes: 0,
                updated_at: now,
            });
            aggregate.instances += 1;
            aggregate.total_bytes += size;
        }

        let snapshot = Arc::new(HeapSnapshot {
            heap_used: counters.heap_used,
            heap_max: counters.heap_max,
            heap_committed: counters.heap_committed,
            non_heap_used: counters.non_heap_used,
            tracked_objects: entries.len() as u64,
            tracked_bytes,
            count_by_type,
            bytes_by_type,
            taken_at: now,
        });

        *self.last_snapshot.lock() = Some(Arc::clone(&snapshot));
        {
            let mut stats = self.class_stats.lock();
            for (type_name, aggregate) in aggregates {
                stats.insert(type_name, aggregate);
            }
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            objects = entries.len(),
            "heap analysis completed"
        );
        self.events.publish(CensusEvent::HeapAnalyzed {
            snapshot: Arc::clone(&snapshot),
        });
        Some(snapshot)
    }

    /// Most recent successful snapshot, if any cycle has completed.
    pub fn last_snapshot(&self) -> Option<Arc<HeapSnapshot>> {
        self.last_snapshot.lock().clone()
    }

    /// Last-known per-type aggregates, retained for display. Types absent
    /// from the latest cycle keep their previous values.
    pub fn class_statistics(&self) -> Vec<ClassAggregate> {
        self.class_stats.lock().values().cloned().collect()
    }

    pub fn clear_statistics(&self) {
        self.class_stats.lock().clear();
    }
}
