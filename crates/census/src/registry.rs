//! Non-owning registry of live tracked objects.

use census_types::{CensusEvent, ObjIdent, ObjectId, Observe, PTime};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::CensusConfig;
use crate::events::EventBus;

/// Access statistics shared between the registry and handed-out entry
/// copies; resolving the instance through any copy bumps them.
#[derive(Debug, Default)]
struct EntryStats {
    last_access_ms: AtomicU64,
    access_count: AtomicU64,
}

/// Registry record pairing a stable id with a non-owning handle to an
/// observed object. Cheap to clone; all copies share the same access
/// statistics.
#[derive(Clone)]
pub struct TrackedEntry {
    id: ObjectId,
    handle: Weak<dyn Observe>,
    type_name: &'static str,
    ident: ObjIdent,
    tracked_at: PTime,
    stats: Arc<EntryStats>,
}

impl TrackedEntry {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn ident(&self) -> ObjIdent {
        self.ident
    }

    pub fn tracked_at(&self) -> PTime {
        self.tracked_at
    }

    pub fn last_access(&self) -> PTime {
        PTime::from_millis(self.stats.last_access_ms.load(Ordering::Relaxed))
    }

    pub fn access_count(&self) -> u64 {
        self.stats.access_count.load(Ordering::Relaxed)
    }

    /// Resolve the tracked instance. `None` once the instance has been
    /// reclaimed — the entry is stale. A successful resolution updates the
    /// access statistics.
    pub fn instance(&self) -> Option<Arc<dyn Observe>> {
        let instance = self.handle.upgrade()?;
        self.stats
            .last_access_ms
            .store(PTime::now().as_millis(), Ordering::Relaxed);
        self.stats.access_count.fetch_add(1, Ordering::Relaxed);
        Some(instance)
    }

    /// Alive iff the non-owning handle still resolves.
    pub fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

impl fmt::Debug for TrackedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("ident", &self.ident)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[derive(Default)]
struct RegistryDb {
    entries: BTreeMap<ObjectId, TrackedEntry>,
    by_ident: HashMap<ObjIdent, ObjectId>,
}

/// Identity-keyed, non-owning mapping from live instances to stable ids.
///
/// Registration arrives synchronously from whatever thread constructs an
/// instrumented object; enumeration runs on the analysis thread. Both take
/// the same short mutex — there is no stop-the-world phase, and an entry
/// never keeps its instance alive.
pub struct ObjectRegistry {
    db: Mutex<RegistryDb>,
    next_id: AtomicU64,
    registration_seq: AtomicU64,
    tracking: AtomicBool,
    max_tracked: usize,
    sample_every: u64,
    events: Arc<EventBus>,
}

impl ObjectRegistry {
    /// A new registry starts stopped: `register` is a no-op until
    /// [`ObjectRegistry::start`].
    pub fn new(events: Arc<EventBus>, config: &CensusConfig) -> Self {
        Self {
            db: Mutex::new(RegistryDb::default()),
            next_id: AtomicU64::new(1),
            registration_seq: AtomicU64::new(0),
            tracking: AtomicBool::new(false),
            max_tracked: config.max_tracked_objects,
            sample_every: u64::from(config.sample_every.max(1)),
            events,
        }
    }

    pub fn start(&self) {
        if self.tracking.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("object registry started");
    }

    /// Stopping prevents new registrations; existing entries remain
    /// queryable until explicitly cleared.
    pub fn stop(&self) {
        self.tracking.store(false, Ordering::SeqCst);
        info!("object registry stopped");
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    /// Register a live instance. Idempotent: an instance already tracked
    /// (matched by identity, not equality) keeps its id. Returns `None`
    /// when the registry is stopped, the population is at the soft cap, or
    /// sampling skips this construction. Never retains a strong reference.
    pub fn register<T: Observe + 'static>(&self, instance: &Arc<T>) -> Option<ObjectId> {
        if !self.is_tracking() {
            return None;
        }
        let ident = ObjIdent::of(instance);
        let type_name = instance.type_name();
        let weak: Weak<T> = Arc::downgrade(instance);
        let handle: Weak<dyn Observe> = weak;

        let mut db = self.db.lock();
        if let Some(&existing) = db.by_ident.get(&ident) {
            if db.entries.get(&existing).is_some_and(TrackedEntry::is_alive) {
                return Some(existing);
            }
            // Recycled allocation address: the previous tenant died but was
            // not yet purged. Retire it and register afresh.
            db.entries.remove(&existing);
            db.by_ident.remove(&ident);
        }

        let seq = self.registration_seq.fetch_add(1, Ordering::Relaxed);
        if self.sample_every > 1 && seq % self.sample_every != 0 {
            return None;
        }
        if db.entries.len() >= self.max_tracked {
            debug!(
                cap = self.max_tracked,
                "tracked population at soft cap; rejecting registration"
            );
            return None;
        }

        let id = ObjectId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = PTime::now();
        db.entries.insert(
            id,
            TrackedEntry {
                id,
                handle,
                type_name,
                ident,
                tracked_at: now,
                stats: Arc::new(EntryStats {
                    last_access_ms: AtomicU64::new(now.as_millis()),
                    access_count: AtomicU64::new(0),
                }),
            },
        );
        db.by_ident.insert(ident, id);
        drop(db);

        self.events
            .publish(CensusEvent::ObjectTracked { id, type_name });
        Some(id)
    }

    /// Construction-site entry point: allocate and register in one step.
    /// This is the factory the instrumentation layer opts into instead of
    /// any load-time rewriting.
    pub fn adopt<T: Observe + 'static>(&self, value: T) -> Arc<T> {
        let instance = Arc::new(value);
        self.register(&instance);
        instance
    }

    /// Remove an entry. No-op when absent.
    pub fn unregister(&self, id: ObjectId) {
        let removed = {
            let mut db = self.db.lock();
            match db.entries.remove(&id) {
                Some(entry) => {
                    if db.by_ident.get(&entry.ident) == Some(&id) {
                        db.by_ident.remove(&entry.ident);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.events.publish(CensusEvent::ObjectUntracked { id });
        }
    }

    pub fn lookup(&self, id: ObjectId) -> Option<TrackedEntry> {
        self.db.lock().entries.get(&id).cloned()
    }

    /// Reverse lookup by identity. Stale entries answer `None`, so a
    /// recycled address can never alias a reclaimed object.
    pub fn id_of(&self, ident: ObjIdent) -> Option<ObjectId> {
        let db = self.db.lock();
        let id = *db.by_ident.get(&ident)?;
        db.entries
            .get(&id)
            .is_some_and(TrackedEntry::is_alive)
            .then_some(id)
    }

    /// Purge stale entries, then return the remaining alive ones as a
    /// point-in-time copy. Registrations racing with the enumeration may or
    /// may not be included.
    pub fn enumerate_alive(&self) -> Vec<TrackedEntry> {
        let mut db = self.db.lock();
        let stale: Vec<ObjectId> = db
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_alive())
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(entry) = db.entries.remove(id) {
                if db.by_ident.get(&entry.ident) == Some(id) {
                    db.by_ident.remove(&entry.ident);
                }
            }
        }
        if !stale.is_empty() {
            debug!(
                purged = stale.len(),
                remaining = db.entries.len(),
                "purged stale object references"
            );
        }
        db.entries.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.db.lock().entries.len()
    }

    /// Drop every entry. Issued ids are never reused: the id counter is
    /// deliberately not reset.
    pub fn clear(&self) {
        let mut db = self.db.lock();
        db.entries.clear();
        db.by_ident.clear();
        drop(db);
        info!("cleared all tracked objects");
    }
}
