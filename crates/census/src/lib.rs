//! Live object population tracking and analysis.
//!
//! census watches a set of application objects without extending their
//! lifetime and derives two views on a fixed cadence: per-type heap
//! statistics and a directed reference graph between tracked objects.
//!
//! Objects opt in at construction through [`ObjectRegistry::adopt`] (or
//! [`ObjectRegistry::register`] for an existing `Arc`), and describe their
//! own layout through the [`Observe`] schema trait — the engine never
//! reflects over memory. The registry holds only `Weak` handles: dropping
//! the last application reference makes the entry stale, and the next
//! analysis cycle purges it.
//!
//! ```rust
//! use census::{Census, CensusConfig, EventKind, Observe, Shape, ShapeError};
//! use std::sync::Arc;
//!
//! struct Session {
//!     user: String,
//! }
//!
//! impl Observe for Session {
//!     fn type_name(&self) -> &'static str {
//!         "Session"
//!     }
//!
//!     fn shape(&self) -> Result<Shape, ShapeError> {
//!         // One reference-typed field: the user name's backing storage.
//!         Ok(Shape::Object {
//!             fields: vec![census::FieldDecl {
//!                 name: "user",
//!                 kind: census::ValueKind::Reference,
//!             }],
//!         })
//!     }
//! }
//!
//! let core = Arc::new(Census::new(CensusConfig::default()));
//! core.events().subscribe(EventKind::HeapAnalyzed, |event| {
//!     if let census::CensusEvent::HeapAnalyzed { snapshot } = event {
//!         println!("{} tracked objects", snapshot.tracked_objects);
//!     }
//! });
//! core.start();
//!
//! let session = core.registry().adopt(Session {
//!     user: "ada".to_owned(),
//! });
//! core.run_once();
//! assert!(core.heap().last_snapshot().is_some());
//! drop(session);
//! core.stop();
//! ```

pub mod analytics;
pub mod config;
pub mod core;
pub mod events;
pub mod graph;
pub mod heap;
pub mod process;
pub mod registry;

pub use self::analytics::{
    Adjacency, Analytics, AnalyticsBridge, DefaultAnalytics, MemoryStatistics, ObjectRecord,
    PatternReport, serialize_snapshot,
};
pub use self::config::CensusConfig;
pub use self::core::{Census, ObjectInfo};
pub use self::events::{EventBus, SubscriptionId};
pub use self::graph::ReferenceGraph;
pub use self::heap::{HeapAnalyzer, OBJECT_HEADER_BYTES, REFERENCE_BYTES, estimate_size};
pub use self::registry::{ObjectRegistry, TrackedEntry};

pub use census_types::{
    CensusEvent, ClassAggregate, EventKind, FieldDecl, HeapSnapshot, MemoryCounters, ObjIdent,
    ObjectId, Observe, PTime, PrimKind, ReferenceEdge, Shape, ShapeError, SlotKind, SlotLabel,
    SlotValue, ValueKind,
};
