//! Engine wiring and the periodic analysis scheduler.

use census_types::{CensusEvent, ObjectId, PTime};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::analytics::{AnalyticsBridge, ObjectRecord};
use crate::config::CensusConfig;
use crate::events::EventBus;
use crate::graph::ReferenceGraph;
use crate::heap::{HeapAnalyzer, OBJECT_HEADER_BYTES, estimate_size};
use crate::registry::ObjectRegistry;

/// Point-in-time description of one tracked object, combining the
/// registry, size, and graph views.
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub type_name: &'static str,
    pub estimated_size: u64,
    pub incoming_references: usize,
    pub outgoing_references: usize,
    pub tracked_at: PTime,
}

/// The assembled engine: registry, analyzers, scheduler, and notifier.
///
/// One cycle = heap analysis, then a graph rebuild, then an
/// `AnalysisComplete` notification. Cycles run inside a single loop task,
/// so at most one is ever in flight; a cycle that overruns the interval
/// delays the next tick instead of overlapping it.
pub struct Census {
    config: CensusConfig,
    events: Arc<EventBus>,
    registry: Arc<ObjectRegistry>,
    heap: Arc<HeapAnalyzer>,
    graph: Arc<ReferenceGraph>,
    analytics: AnalyticsBridge,
    runtime: Runtime,
    running: AtomicBool,
    // Bumped on every start/stop; a scheduler loop exits as soon as the
    // value moves past the epoch it was spawned with.
    run_epoch: watch::Sender<u64>,
}

impl Census {
    pub fn new(config: CensusConfig) -> Self {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ObjectRegistry::new(Arc::clone(&events), &config));
        let heap = Arc::new(HeapAnalyzer::new(
            Arc::clone(&registry),
            Arc::clone(&events),
        ));
        let graph = Arc::new(ReferenceGraph::new(
            Arc::clone(&registry),
            Arc::clone(&events),
        ));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("census-worker")
            .enable_time()
            .build()
            .expect("failed to build census worker runtime");
        events.set_dispatcher(runtime.handle().clone());
        let (run_epoch, _) = watch::channel(0);

        Self {
            config,
            events,
            registry,
            heap,
            graph,
            analytics: AnalyticsBridge::builtin(),
            runtime,
            running: AtomicBool::new(false),
            run_epoch,
        }
    }

    /// Swap in a different analytics collaborator (or
    /// [`AnalyticsBridge::disabled`] for none).
    pub fn with_analytics(mut self, analytics: AnalyticsBridge) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn heap(&self) -> &Arc<HeapAnalyzer> {
        &self.heap
    }

    pub fn graph(&self) -> &Arc<ReferenceGraph> {
        &self.graph
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn analytics(&self) -> &AnalyticsBridge {
        &self.analytics
    }

    pub fn config(&self) -> &CensusConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the components and the periodic cycle. Idempotent; a second
    /// call warns and returns.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("census core already running");
            return;
        }
        info!(
            interval_ms = self.config.analysis_interval.as_millis() as u64,
            "starting census core"
        );

        self.registry.start();
        if self.config.heap_analysis {
            self.heap.start();
        }
        if self.config.reference_tracking {
            self.graph.start();
        }

        self.run_epoch.send_modify(|epoch| *epoch += 1);
        let epoch = *self.run_epoch.borrow();
        let mut stop_signal = self.run_epoch.subscribe();
        let interval = self.config.analysis_interval.max(Duration::from_millis(1));
        let core = Arc::clone(self);
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *stop_signal.borrow() != epoch {
                            break;
                        }
                        core.run_cycle();
                    }
                    changed = stop_signal.changed() => {
                        if changed.is_err() || *stop_signal.borrow() != epoch {
                            break;
                        }
                    }
                }
            }
        });

        self.events.publish(CensusEvent::CoreStarted);
        info!("census core started");
    }

    /// Stop scheduling new cycles. An in-flight cycle is left to finish;
    /// tracked entries remain queryable.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping census core");
        self.run_epoch.send_modify(|epoch| *epoch += 1);

        self.graph.stop();
        self.heap.stop();
        self.registry.stop();

        self.events.publish(CensusEvent::CoreStopped);
        info!("census core stopped");
    }

    /// One analysis cycle. Failures are caught at this boundary: the
    /// previous snapshot and graph stay exposed and the scheduler moves on
    /// to the next tick.
    fn run_cycle(&self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.heap.analyze();
            self.graph.update();
        }));
        match outcome {
            Ok(()) => self.events.publish(CensusEvent::AnalysisComplete),
            Err(_) => error!("analysis cycle failed; keeping previous snapshot and graph"),
        }
    }

    /// Run one cycle immediately on the caller's thread, outside the
    /// schedule — the on-demand snapshot entry point.
    pub fn run_once(&self) {
        self.run_cycle();
    }

    /// Plain per-object records for the analytics boundary.
    pub fn object_records(&self) -> Vec<ObjectRecord> {
        self.registry
            .enumerate_alive()
            .into_iter()
            .filter_map(|entry| {
                let instance = entry.instance()?;
                let size = match instance.shape() {
                    Ok(shape) => estimate_size(&shape),
                    Err(_) => OBJECT_HEADER_BYTES,
                };
                Some(ObjectRecord {
                    id: entry.id(),
                    type_name: entry.type_name().to_owned(),
                    size,
                })
            })
            .collect()
    }

    /// Point-in-time view of one tracked object; `None` when the id is
    /// unknown or the instance is already reclaimed.
    pub fn object_info(&self, id: ObjectId) -> Option<ObjectInfo> {
        let entry = self.registry.lookup(id)?;
        let instance = entry.instance()?;
        let estimated_size = match instance.shape() {
            Ok(shape) => estimate_size(&shape),
            Err(_) => OBJECT_HEADER_BYTES,
        };
        Some(ObjectInfo {
            id,
            type_name: entry.type_name(),
            estimated_size,
            incoming_references: self.graph.reference_count(id),
            outgoing_references: self.graph.outgoing_of(id).len(),
            tracked_at: entry.tracked_at(),
        })
    }

    /// Drop all tracking state: registry entries and both graph maps.
    pub fn clear_all(&self) {
        self.registry.clear();
        self.graph.clear();
        info!("all tracking data cleared");
    }
}

impl Drop for Census {
    fn drop(&mut self) {
        self.stop();
        self.events.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use census_types::{FieldDecl, Observe, PrimKind, Shape, ShapeError, ValueKind};

    struct Widget;

    impl Observe for Widget {
        fn type_name(&self) -> &'static str {
            "Widget"
        }

        fn shape(&self) -> Result<Shape, ShapeError> {
            Ok(Shape::Object {
                fields: vec![FieldDecl {
                    name: "weight",
                    kind: ValueKind::Prim(PrimKind::U32),
                }],
            })
        }
    }

    fn idle_core() -> Arc<Census> {
        // Long interval: the immediate first tick runs one cycle, then the
        // scheduler stays quiet for the duration of the test.
        Arc::new(Census::new(CensusConfig {
            analysis_interval: Duration::from_secs(3600),
            worker_threads: 1,
            ..CensusConfig::default()
        }))
    }

    #[test]
    fn run_once_before_start_is_a_noop() {
        let core = idle_core();
        core.run_once();
        assert!(core.heap().last_snapshot().is_none());
        assert!(core.graph().full_graph().is_empty());
    }

    #[test]
    fn start_is_idempotent_and_stop_is_symmetric() {
        let core = idle_core();
        assert!(!core.is_running());
        core.start();
        assert!(core.is_running());
        core.start();
        assert!(core.is_running());
        core.stop();
        assert!(!core.is_running());
        core.stop();
        assert!(!core.is_running());
    }

    #[test]
    fn manual_cycle_populates_snapshot_and_info() {
        let core = idle_core();
        core.start();
        let widget = core.registry().adopt(Widget);
        let id = core.registry().register(&widget).unwrap();

        core.run_once();
        let snapshot = core.heap().last_snapshot().unwrap();
        assert!(snapshot.tracked_objects >= 1);

        let info = core.object_info(id).unwrap();
        assert_eq!(info.type_name, "Widget");
        assert_eq!(info.estimated_size, 24); // 16 + 4 -> 24
        assert_eq!(info.incoming_references, 0);

        let records = core.object_records();
        assert!(records.iter().any(|r| r.id == id && r.size == 24));
        core.stop();
    }

    #[test]
    fn restart_after_stop_schedules_again() {
        let core = idle_core();
        core.start();
        core.stop();
        core.start();
        assert!(core.is_running());
        core.stop();
    }

    #[test]
    fn clear_all_empties_registry_and_graph() {
        let core = idle_core();
        core.start();
        let _widget = core.registry().adopt(Widget);
        core.run_once();

        core.clear_all();
        assert_eq!(core.registry().count(), 0);
        assert!(core.graph().full_graph().is_empty());
        core.stop();
    }
}
