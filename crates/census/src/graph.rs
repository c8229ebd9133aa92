//! Directed reference graph between tracked objects.

use census_types::{CensusEvent, ObjectId, ReferenceEdge};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::events::EventBus;
use crate::registry::{ObjectRegistry, TrackedEntry};

#[derive(Default)]
struct GraphState {
    outgoing: BTreeMap<ObjectId, BTreeSet<ReferenceEdge>>,
    incoming: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
}

/// Rebuilds the outgoing/incoming edge maps once per cycle from the alive
/// population.
///
/// Deliberately a full rebuild, not an incremental diff: the CPU spent
/// buys the invariant that the exposed graph never contains a stale or
/// never-tracked endpoint, and that graphs from different cycles are never
/// merged. Readers only ever observe a complete graph — the new maps are
/// built off to the side and swapped in under the state lock.
pub struct ReferenceGraph {
    registry: Arc<ObjectRegistry>,
    events: Arc<EventBus>,
    active: AtomicBool,
    state: Mutex<GraphState>,
}

impl ReferenceGraph {
    pub fn new(registry: Arc<ObjectRegistry>, events: Arc<EventBus>) -> Self {
        Self {
            registry,
            events,
            active: AtomicBool::new(false),
            state: Mutex::new(GraphState::default()),
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!("reference graph started");
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("reference graph stopped");
    }

    /// Rebuild both maps and swap them in; a no-op while stopped.
    pub fn update(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let started = Instant::now();
        let entries = self.registry.enumerate_alive();
        let mut next = GraphState::default();

        for entry in &entries {
            self.collect_references(entry, &mut next);
        }

        let edges: usize = next.outgoing.values().map(BTreeSet::len).sum();
        *self.state.lock() = next;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            objects = entries.len(),
            edges,
            "reference graph updated"
        );
        self.events.publish(CensusEvent::ReferenceGraphUpdated);
    }

    fn collect_references(&self, entry: &TrackedEntry, state: &mut GraphState) {
        let Some(instance) = entry.instance() else {
            return;
        };
        let slots = match instance.slots() {
            Ok(slots) => slots,
            Err(err) => {
                debug!(
                    id = %entry.id(),
                    type_name = entry.type_name(),
                    error = %err,
                    "slots unreadable; object contributes no edges this cycle"
                );
                return;
            }
        };

        let source = entry.id();
        let mut edges = BTreeSet::new();
        for slot in slots {
            let Some(target_ident) = slot.target else {
                continue;
            };
            // Only edges between two currently-tracked alive objects count.
            let Some(target) = self.registry.id_of(target_ident) else {
                continue;
            };
            let Some(target_entry) = self.registry.lookup(target) else {
                continue;
            };
            edges.insert(ReferenceEdge {
                source,
                target,
                label: slot.label.to_string(),
                kind: slot.label.kind(),
                target_type: target_entry.type_name().to_owned(),
            });
        }

        for edge in &edges {
            state.incoming.entry(edge.target).or_default().insert(source);
        }
        state.outgoing.insert(source, edges);
    }

    /// Outgoing edges of `id`; empty when absent.
    pub fn outgoing_of(&self, id: ObjectId) -> BTreeSet<ReferenceEdge> {
        self.state
            .lock()
            .outgoing
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of objects holding a reference to `id`; empty when absent.
    pub fn incoming_of(&self, id: ObjectId) -> BTreeSet<ObjectId> {
        self.state
            .lock()
            .incoming
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reference_count(&self, id: ObjectId) -> usize {
        self.state.lock().incoming.get(&id).map_or(0, BTreeSet::len)
    }

    /// Walk incoming edges up to a root of the tracked subgraph (a node
    /// with no incoming edges — not necessarily a true host-runtime root)
    /// and return the path in root→target order.
    ///
    /// Empty when no acyclic path to a root exists, e.g. the target is
    /// only reachable through cycles. Among several parents the smallest
    /// id wins, so a fixed graph always yields the same path.
    pub fn path_to_root(&self, id: ObjectId) -> Vec<ObjectId> {
        let state = self.state.lock();
        let mut path = Vec::new();
        let mut visited = BTreeSet::new();
        if Self::ascend(&state, id, &mut path, &mut visited) {
            path.reverse();
            path
        } else {
            Vec::new()
        }
    }

    fn ascend(
        state: &GraphState,
        id: ObjectId,
        path: &mut Vec<ObjectId>,
        visited: &mut BTreeSet<ObjectId>,
    ) -> bool {
        if !visited.insert(id) {
            return false;
        }
        path.push(id);

        match state.incoming.get(&id) {
            None => return true,
            Some(parents) if parents.is_empty() => return true,
            Some(parents) => {
                for &parent in parents {
                    if Self::ascend(state, parent, path, visited) {
                        return true;
                    }
                }
            }
        }

        path.pop();
        false
    }

    /// Drop both maps without touching the registry.
    pub fn clear(&self) {
        *self.state.lock() = GraphState::default();
    }

    /// Copy of the full outgoing map, for display layers.
    pub fn full_graph(&self) -> BTreeMap<ObjectId, BTreeSet<ReferenceEdge>> {
        self.state.lock().outgoing.clone()
    }

    /// Plain adjacency form (source → targets) handed to the analytics
    /// boundary.
    pub fn adjacency(&self) -> BTreeMap<ObjectId, Vec<ObjectId>> {
        let state = self.state.lock();
        state
            .outgoing
            .iter()
            .map(|(&id, edges)| (id, edges.iter().map(|edge| edge.target).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CensusConfig;
    use census_types::{
        FieldDecl, ObjIdent, Observe, Shape, ShapeError, SlotKind, SlotLabel, SlotValue, ValueKind,
    };

    struct Node {
        next: Mutex<Option<Arc<Node>>>,
    }

    impl Node {
        fn leaf() -> Self {
            Self {
                next: Mutex::new(None),
            }
        }

        fn to(next: &Arc<Node>) -> Self {
            Self {
                next: Mutex::new(Some(Arc::clone(next))),
            }
        }
    }

    impl Observe for Node {
        fn type_name(&self) -> &'static str {
            "Node"
        }

        fn shape(&self) -> Result<Shape, ShapeError> {
            Ok(Shape::Object {
                fields: vec![FieldDecl {
                    name: "next",
                    kind: ValueKind::Reference,
                }],
            })
        }

        fn slots(&self) -> Result<Vec<SlotValue>, ShapeError> {
            let next = self.next.try_lock().ok_or(ShapeError::Busy)?;
            Ok(vec![SlotValue {
                label: SlotLabel::Field("next"),
                target: next.as_ref().map(|arc| ObjIdent::of(arc)),
            }])
        }
    }

    struct Bag {
        items: Mutex<Vec<Arc<Node>>>,
    }

    impl Observe for Bag {
        fn type_name(&self) -> &'static str {
            "Bag"
        }

        fn shape(&self) -> Result<Shape, ShapeError> {
            let items = self.items.try_lock().ok_or(ShapeError::Busy)?;
            Ok(Shape::Array {
                elem: ValueKind::Reference,
                len: items.len(),
            })
        }

        fn slots(&self) -> Result<Vec<SlotValue>, ShapeError> {
            let items = self.items.try_lock().ok_or(ShapeError::Busy)?;
            Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| SlotValue {
                    label: SlotLabel::Index(i),
                    target: Some(ObjIdent::of(item)),
                })
                .collect())
        }
    }

    fn graph() -> (Arc<ObjectRegistry>, ReferenceGraph) {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ObjectRegistry::new(
            Arc::clone(&events),
            &CensusConfig::default(),
        ));
        registry.start();
        let graph = ReferenceGraph::new(Arc::clone(&registry), events);
        graph.start();
        (registry, graph)
    }

    #[test]
    fn chain_produces_expected_edges_and_path() {
        let (registry, graph) = graph();
        let c = registry.adopt(Node::leaf());
        let b = registry.adopt(Node::to(&c));
        let a = registry.adopt(Node::to(&b));
        let (a_id, b_id, c_id) = (
            registry.register(&a).unwrap(),
            registry.register(&b).unwrap(),
            registry.register(&c).unwrap(),
        );

        graph.update();

        let out_a = graph.outgoing_of(a_id);
        assert_eq!(out_a.len(), 1);
        let edge = out_a.iter().next().unwrap();
        assert_eq!(edge.target, b_id);
        assert_eq!(edge.label, "next");
        assert_eq!(edge.kind, SlotKind::Field);
        assert_eq!(edge.target_type, "Node");

        assert_eq!(
            graph.incoming_of(c_id).into_iter().collect::<Vec<_>>(),
            vec![b_id]
        );
        assert_eq!(graph.reference_count(c_id), 1);
        assert_eq!(graph.reference_count(a_id), 0);
        assert_eq!(graph.path_to_root(c_id), vec![a_id, b_id, c_id]);
    }

    #[test]
    fn untracked_targets_produce_no_edges() {
        let (registry, graph) = graph();
        let stranger = Arc::new(Node::leaf());
        let a = registry.adopt(Node::to(&stranger));
        let a_id = registry.register(&a).unwrap();

        graph.update();
        assert!(graph.outgoing_of(a_id).is_empty());
    }

    #[test]
    fn unregistered_target_loses_its_edges_next_cycle() {
        let (registry, graph) = graph();
        let b = registry.adopt(Node::leaf());
        let a = registry.adopt(Node::to(&b));
        let (a_id, b_id) = (
            registry.register(&a).unwrap(),
            registry.register(&b).unwrap(),
        );

        graph.update();
        assert_eq!(graph.reference_count(b_id), 1);

        registry.unregister(b_id);
        graph.update();
        assert!(graph.outgoing_of(a_id).is_empty());
        assert!(graph.incoming_of(b_id).is_empty());
    }

    #[test]
    fn array_elements_are_labelled_by_index() {
        let (registry, graph) = graph();
        let x = registry.adopt(Node::leaf());
        let y = registry.adopt(Node::leaf());
        let bag = registry.adopt(Bag {
            items: Mutex::new(vec![Arc::clone(&x), Arc::clone(&y), Arc::clone(&x)]),
        });
        let bag_id = registry.register(&bag).unwrap();
        let x_id = registry.register(&x).unwrap();

        graph.update();

        let edges = graph.outgoing_of(bag_id);
        let labels: Vec<&str> = edges.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["[0]", "[1]", "[2]"]);
        assert!(edges.iter().all(|e| e.kind == SlotKind::Element));
        // Two distinct slots referencing the same target keep two edges.
        assert_eq!(edges.iter().filter(|e| e.target == x_id).count(), 2);
        assert_eq!(graph.reference_count(x_id), 1);
    }

    #[test]
    fn cycle_has_no_path_to_root() {
        let (registry, graph) = graph();
        let a = registry.adopt(Node::leaf());
        let b = registry.adopt(Node::to(&a));
        *a.next.lock() = Some(Arc::clone(&b));
        let (a_id, b_id) = (
            registry.register(&a).unwrap(),
            registry.register(&b).unwrap(),
        );

        graph.update();
        assert!(graph.path_to_root(a_id).is_empty());
        assert!(graph.path_to_root(b_id).is_empty());
    }

    #[test]
    fn busy_object_is_skipped_without_aborting_the_cycle() {
        let (registry, graph) = graph();
        let target = registry.adopt(Node::leaf());
        let busy = registry.adopt(Node::to(&target));
        let ok = registry.adopt(Node::to(&target));
        let (busy_id, ok_id, target_id) = (
            registry.register(&busy).unwrap(),
            registry.register(&ok).unwrap(),
            registry.register(&target).unwrap(),
        );

        // Hold the lock so introspection of `busy` fails with Busy.
        let guard = busy.next.lock();
        graph.update();
        drop(guard);

        assert!(graph.outgoing_of(busy_id).is_empty());
        assert_eq!(graph.outgoing_of(ok_id).len(), 1);
        assert_eq!(
            graph.incoming_of(target_id).into_iter().collect::<Vec<_>>(),
            vec![ok_id]
        );
    }

    #[test]
    fn clear_drops_both_maps() {
        let (registry, graph) = graph();
        let b = registry.adopt(Node::leaf());
        let a = registry.adopt(Node::to(&b));
        let a_id = registry.register(&a).unwrap();

        graph.update();
        assert!(!graph.outgoing_of(a_id).is_empty());

        graph.clear();
        assert!(graph.outgoing_of(a_id).is_empty());
        assert!(graph.full_graph().is_empty());
        // The registry is untouched.
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn cleared_registry_empties_graph_on_next_update() {
        let (registry, graph) = graph();
        let b = registry.adopt(Node::leaf());
        let _a = registry.adopt(Node::to(&b));

        graph.update();
        assert!(!graph.full_graph().is_empty());

        registry.clear();
        graph.update();
        assert!(graph.full_graph().is_empty());
        assert!(graph.adjacency().is_empty());
    }

    #[test]
    fn stopped_graph_ignores_update() {
        let (registry, graph) = graph();
        let b = registry.adopt(Node::leaf());
        let _a = registry.adopt(Node::to(&b));

        graph.stop();
        graph.update();
        assert!(graph.full_graph().is_empty());
    }
}
