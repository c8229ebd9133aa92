//! Failure-tolerant boundary to an optional analytics collaborator.
//!
//! The engine hands plain records across this boundary and takes whatever
//! comes back; a missing or failing backend always degrades to the empty
//! result and never disturbs tracking or the graph.

use census_types::{HeapSnapshot, ObjectId, PTime};
use facet::Facet;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

/// Plain per-object record crossing the analytics boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub type_name: String,
    pub size: u64,
}

/// Derived in/out-degree summary of a reference graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternReport {
    /// Nodes with no incoming references.
    pub roots: Vec<ObjectId>,
    /// Nodes with no outgoing references.
    pub leaves: Vec<ObjectId>,
    /// Top nodes by incoming reference count, descending.
    pub highly_referenced: Vec<(ObjectId, usize)>,
    /// Top nodes by outgoing reference count, descending.
    pub highly_referencing: Vec<(ObjectId, usize)>,
    pub total_references: usize,
}

/// Derived per-type memory distribution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStatistics {
    pub total_bytes: u64,
    pub average_bytes: u64,
    pub object_count: usize,
    /// (type name, instance count, total bytes), largest total first.
    pub by_type: Vec<(String, u64, u64)>,
    pub top_consumers: Vec<(String, u64, u64)>,
}

/// Edge-list form of the reference graph: source → targets.
pub type Adjacency = BTreeMap<ObjectId, Vec<ObjectId>>;

/// The collaborator contract: plain records in, derived summaries out.
pub trait Analytics: Send + Sync {
    fn find_cycles(&self, adjacency: &Adjacency) -> Vec<Vec<ObjectId>>;
    fn reference_patterns(&self, adjacency: &Adjacency) -> PatternReport;
    fn memory_statistics(&self, records: &[ObjectRecord]) -> MemoryStatistics;
}

/// Guarded front door the engine actually calls. Every call is isolated: a
/// panicking backend is logged and the empty result returned instead.
pub struct AnalyticsBridge {
    backend: Option<Box<dyn Analytics>>,
}

impl AnalyticsBridge {
    pub fn new(backend: Box<dyn Analytics>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// The built-in native backend.
    pub fn builtin() -> Self {
        Self::new(Box::new(DefaultAnalytics))
    }

    /// Collaborator unavailable: every query returns its empty default.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn find_cycles(&self, adjacency: &Adjacency) -> Vec<Vec<ObjectId>> {
        self.guarded("find_cycles", |backend| backend.find_cycles(adjacency))
    }

    pub fn reference_patterns(&self, adjacency: &Adjacency) -> PatternReport {
        self.guarded("reference_patterns", |backend| {
            backend.reference_patterns(adjacency)
        })
    }

    pub fn memory_statistics(&self, records: &[ObjectRecord]) -> MemoryStatistics {
        self.guarded("memory_statistics", |backend| {
            backend.memory_statistics(records)
        })
    }

    fn guarded<R: Default>(
        &self,
        op: &'static str,
        call: impl FnOnce(&dyn Analytics) -> R,
    ) -> R {
        let Some(backend) = self.backend.as_deref() else {
            return R::default();
        };
        match catch_unwind(AssertUnwindSafe(|| call(backend))) {
            Ok(result) => result,
            Err(_) => {
                error!(op, "analytics backend failed; returning empty result");
                R::default()
            }
        }
    }
}

#[derive(Facet)]
struct SnapshotExportRef<'a> {
    /// Process-relative milliseconds at the moment of export.
    ptime_now_ms: u64,
    snapshot: &'a HeapSnapshot,
}

/// Encode a snapshot for an external display or analytics consumer. `None`
/// (with a log) when encoding fails — this boundary never propagates
/// errors.
pub fn serialize_snapshot(snapshot: &HeapSnapshot) -> Option<String> {
    let export = SnapshotExportRef {
        ptime_now_ms: PTime::now().as_millis(),
        snapshot,
    };
    let bytes = match facet_json::to_vec(&export) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to encode heap snapshot");
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(json) => Some(json),
        Err(err) => {
            error!(error = %err, "heap snapshot encoded to non-utf8 json");
            None
        }
    }
}

/// Native implementation of the collaborator contract.
pub struct DefaultAnalytics;

impl Analytics for DefaultAnalytics {
    /// Enumerate cycles reachable from each unvisited node: depth-first
    /// with a current-path set; hitting a node already on the path records
    /// the closing slice as one cycle.
    fn find_cycles(&self, adjacency: &Adjacency) -> Vec<Vec<ObjectId>> {
        fn dfs(
            node: ObjectId,
            adjacency: &Adjacency,
            visited: &mut BTreeSet<ObjectId>,
            path: &mut Vec<ObjectId>,
            on_path: &mut BTreeSet<ObjectId>,
            cycles: &mut Vec<Vec<ObjectId>>,
        ) {
            if on_path.contains(&node) {
                if let Some(start) = path.iter().position(|&seen| seen == node) {
                    cycles.push(path[start..].to_vec());
                }
                return;
            }
            if !visited.insert(node) {
                return;
            }
            path.push(node);
            on_path.insert(node);
            if let Some(targets) = adjacency.get(&node) {
                for &target in targets {
                    dfs(target, adjacency, visited, path, on_path, cycles);
                }
            }
            on_path.remove(&node);
            path.pop();
        }

        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        let mut on_path = BTreeSet::new();
        for &node in adjacency.keys() {
            if !visited.contains(&node) {
                dfs(
                    node,
                    adjacency,
                    &mut visited,
                    &mut path,
                    &mut on_path,
                    &mut cycles,
                );
            }
        }
        cycles
    }

    fn reference_patterns(&self, adjacency: &Adjacency) -> PatternReport {
        let mut in_degree: BTreeMap<ObjectId, usize> = BTreeMap::new();
        let mut out_degree: BTreeMap<ObjectId, usize> = BTreeMap::new();
        for (&node, targets) in adjacency {
            out_degree.insert(node, targets.len());
            for &target in targets {
                *in_degree.entry(target).or_insert(0) += 1;
            }
        }

        let roots = adjacency
            .keys()
            .copied()
            .filter(|node| in_degree.get(node).copied().unwrap_or(0) == 0)
            .collect();
        let leaves = adjacency
            .keys()
            .copied()
            .filter(|node| out_degree.get(node).copied().unwrap_or(0) == 0)
            .collect();
        let total_references = out_degree.values().sum();

        PatternReport {
            roots,
            leaves,
            highly_referenced: top_ten(&in_degree),
            highly_referencing: top_ten(&out_degree),
            total_references,
        }
    }

    fn memory_statistics(&self, records: &[ObjectRecord]) -> MemoryStatistics {
        let total_bytes: u64 = records.iter().map(|record| record.size).sum();
        let object_count = records.len();
        let average_bytes = if object_count == 0 {
            0
        } else {
            total_bytes / object_count as u64
        };

        let mut per_type: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for record in records {
            let slot = per_type.entry(record.type_name.as_str()).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += record.size;
        }
        let mut by_type: Vec<(String, u64, u64)> = per_type
            .into_iter()
            .map(|(name, (count, bytes))| (name.to_owned(), count, bytes))
            .collect();
        by_type.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        let top_consumers = by_type.iter().take(10).cloned().collect();

        MemoryStatistics {
            total_bytes,
            average_bytes,
            object_count,
            by_type,
            top_consumers,
        }
    }
}

/// Largest counts first, ties broken by ascending id, capped at ten.
fn top_ten(degrees: &BTreeMap<ObjectId, usize>) -> Vec<(ObjectId, usize)> {
    let mut ranked: Vec<(ObjectId, usize)> = degrees
        .iter()
        .map(|(&node, &count)| (node, count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(10);
    ranked
}
