use std::sync::Arc;

use crate::{HeapSnapshot, ObjectId};

/// Discriminant of [`CensusEvent`], used to key subscriber lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    CoreStarted,
    CoreStopped,
    ObjectTracked,
    ObjectUntracked,
    HeapAnalyzed,
    ReferenceGraphUpdated,
    AnalysisComplete,
    ObjectSelected,
    FilterChanged,
}

/// Closed set of notifications crossing the engine boundary.
///
/// The engine publishes everything up to `AnalysisComplete`. The last two
/// variants are published by display consumers; the engine carries them but
/// never consumes them.
#[derive(Clone, Debug)]
pub enum CensusEvent {
    CoreStarted,
    CoreStopped,
    ObjectTracked { id: ObjectId, type_name: &'static str },
    ObjectUntracked { id: ObjectId },
    HeapAnalyzed { snapshot: Arc<HeapSnapshot> },
    ReferenceGraphUpdated,
    AnalysisComplete,
    ObjectSelected { id: ObjectId },
    FilterChanged { filter: String },
}

impl CensusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CensusEvent::CoreStarted => EventKind::CoreStarted,
            CensusEvent::CoreStopped => EventKind::CoreStopped,
            CensusEvent::ObjectTracked { .. } => EventKind::ObjectTracked,
            CensusEvent::ObjectUntracked { .. } => EventKind::ObjectUntracked,
            CensusEvent::HeapAnalyzed { .. } => EventKind::HeapAnalyzed,
            CensusEvent::ReferenceGraphUpdated => EventKind::ReferenceGraphUpdated,
            CensusEvent::AnalysisComplete => EventKind::AnalysisComplete,
            CensusEvent::ObjectSelected { .. } => EventKind::ObjectSelected,
            CensusEvent::FilterChanged { .. } => EventKind::FilterChanged,
        }
    }
}
