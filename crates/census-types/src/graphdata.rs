use facet::Facet;

use crate::ObjectId;

/// Whether a reference was observed in a declared field or an array
/// element.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum SlotKind {
    Field,
    Element,
}

/// A directed reference between two tracked objects, as observed during one
/// graph rebuild.
///
/// Identity is `(source, target, label)`: the same object pair carries one
/// edge per distinct slot. Field order puts that identity first so the
/// derived `Ord` gives edge sets a deterministic iteration order.
#[derive(Facet, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceEdge {
    pub source: ObjectId,
    pub target: ObjectId,
    /// Field name, or `[i]` for array elements.
    pub label: String,
    pub kind: SlotKind,
    pub target_type: String,
}
