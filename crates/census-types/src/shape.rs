use std::fmt;

use crate::ObjIdent;
use crate::SlotKind;

/// Width class of a primitive slot. The size heuristic charges a fixed
/// byte cost per class (1/2/4/8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
    Usize,
}

impl PrimKind {
    pub fn width(self) -> u64 {
        match self {
            PrimKind::Bool | PrimKind::U8 | PrimKind::I8 => 1,
            PrimKind::U16 | PrimKind::I16 => 2,
            PrimKind::U32 | PrimKind::I32 | PrimKind::F32 => 4,
            PrimKind::U64 | PrimKind::I64 | PrimKind::F64 | PrimKind::Usize => 8,
        }
    }
}

/// What a declared slot holds: an inline primitive, or a reference to
/// another (possibly tracked) object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Prim(PrimKind),
    Reference,
}

/// One declared field of a non-array shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldDecl {
    pub name: &'static str,
    pub kind: ValueKind,
}

/// Declared shape of a tracked object, as reported by its schema provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Homogeneous array-like storage: `len` elements of one kind.
    Array { elem: ValueKind, len: usize },
    /// Record with a fixed set of declared fields.
    Object { fields: Vec<FieldDecl> },
}

/// Introspection failure for a single object. Recovered locally by the
/// analysis passes: the object contributes a header-only size estimate, or
/// no edges, for the slots that could not be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeError {
    /// Interior state could not be read without blocking (e.g. a try_lock
    /// lost the race against a writer).
    Busy,
    /// The provider declined to describe this instance.
    Unreadable(&'static str),
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::Busy => f.write_str("interior state busy"),
            ShapeError::Unreadable(what) => write!(f, "unreadable: {what}"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// Label of a reference-typed slot: a declared field name, or an array
/// index rendered as `[i]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotLabel {
    Field(&'static str),
    Index(usize),
}

impl SlotLabel {
    pub fn kind(self) -> SlotKind {
        match self {
            SlotLabel::Field(_) => SlotKind::Field,
            SlotLabel::Index(_) => SlotKind::Element,
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotLabel::Field(name) => f.write_str(name),
            SlotLabel::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Point-in-time observation of one reference-typed slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotValue {
    pub label: SlotLabel,
    /// Identity of the referenced instance; `None` for an empty slot.
    pub target: Option<ObjIdent>,
}

/// Schema provider for tracked objects.
///
/// The engine never reflects over memory: everything it knows about an
/// object's layout arrives through this trait — the stable type name, the
/// declared shape consumed by the size heuristic, and the current values
/// of reference-typed slots consumed by the graph builder.
///
/// `shape` and `slots` run on the analysis thread while the application may
/// be mutating the object. Implementations over interior-mutable state
/// should read via `try_lock` and report [`ShapeError::Busy`] rather than
/// block the cycle.
pub trait Observe: Send + Sync {
    /// Stable type descriptor, e.g. the type's path.
    fn type_name(&self) -> &'static str;

    /// Declared shape for size estimation. Arrays report their current
    /// length; field sets are fixed per type.
    fn shape(&self) -> Result<Shape, ShapeError>;

    /// Current reference-typed slots, one entry per slot as observed at
    /// this instant. Primitive-typed fields are not reported.
    fn slots(&self) -> Result<Vec<SlotValue>, ShapeError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prim_widths() {
        assert_eq!(PrimKind::Bool.width(), 1);
        assert_eq!(PrimKind::I16.width(), 2);
        assert_eq!(PrimKind::F32.width(), 4);
        assert_eq!(PrimKind::U64.width(), 8);
        assert_eq!(PrimKind::Usize.width(), 8);
    }

    #[test]
    fn slot_labels_render_like_field_paths() {
        assert_eq!(SlotLabel::Field("next").to_string(), "next");
        assert_eq!(SlotLabel::Index(3).to_string(), "[3]");
        assert_eq!(SlotLabel::Field("next").kind(), SlotKind::Field);
        assert_eq!(SlotLabel::Index(0).kind(), SlotKind::Element);
    }
}
