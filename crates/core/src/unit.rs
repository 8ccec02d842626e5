use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a method in the host object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u64);

/// Opaque reference to a class in the host object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassRef(pub u64);

/// Address of compiled (or interpreter) code for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryPoint(pub u64);

/// Identity of one compilable unit.
///
/// Two requests target the same unit when method and redefinition epoch
/// both match; a class redefinition bumps the epoch, so requests made
/// against the old definition never merge with new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitRef {
    pub method: MethodId,
    /// Class that owns the method (pinned while compiling).
    pub class: ClassRef,
    /// Redefinition epoch supplied by the host.
    pub epoch: u32,
}

impl UnitRef {
    pub fn new(method: u64, class: u64) -> Self {
        Self {
            method: MethodId(method),
            class: ClassRef(class),
            epoch: 0,
        }
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{:#x}@{}", self.method.0, self.epoch)
    }
}

/// What flavour of code a request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// A normal method body.
    Ordinary,
    /// A call thunk generated on behalf of `class`.
    Thunk { class: ClassRef },
    /// Transfer into compiled code from a loop that is already running
    /// in the interpreter, entering at `byte_offset`.
    InProgress { byte_offset: u32 },
}

impl RequestKind {
    /// Whether invalidating `class` should cancel this request for `unit`.
    pub fn belongs_to(&self, unit: &UnitRef, class: ClassRef) -> bool {
        match self {
            RequestKind::Thunk { class: owner } => *owner == class || unit.class == class,
            RequestKind::Ordinary | RequestKind::InProgress { .. } => unit.class == class,
        }
    }
}

/// Static facts about a unit used by the weight table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitShape {
    /// Size of the unit's bytecode in bytes.
    pub bytecode_size: u32,
    pub has_loops: bool,
}
