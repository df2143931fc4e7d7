//! Type and method metadata consumed by the devirtualization pass.
//!
//! The pass never touches the metadata store directly: every query goes through a
//! [`MetadataAccess`] handshake and yields owned descriptor snapshots, so nothing
//! borrowed from the store outlives the scoped acquisition.

mod handles;
mod handshake;
mod store;

use std::fmt;

use serde::Serialize;

pub use handles::{HandleScope, TypeHandle};
pub use handshake::{MetadataAccess, MetadataHandshake};
pub use store::{ClassTable, ReferenceTable, TypeResolutionStore, TypeShape};

/// Identity of a type descriptor in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identity of a method descriptor in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identity of a compilation unit (and its reference table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(pub u32);

/// Index of a type entry in a compilation unit's reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeIndex(pub u32);

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t#{}", self.0)
    }
}

/// Index of a method entry in a compilation unit's reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodIndex(pub u32);

impl fmt::Display for MethodIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m#{}", self.0)
    }
}

/// Which override lookup applies to a polymorphic call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchKind {
    Virtual,
    Interface,
}

impl DispatchKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchKind::Virtual => "virtual",
            DispatchKind::Interface => "interface",
        }
    }
}

/// Snapshot of a resolved type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: String,
    pub is_final: bool,
    pub is_interface: bool,
    pub superclass: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub methods: Vec<MethodId>,
}

/// Snapshot of a resolved method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub id: MethodId,
    pub name: String,
    pub declaring_type: TypeId,
    pub is_final: bool,
    pub is_abstract: bool,
}

impl MethodDescriptor {
    /// `Owner::name`-style rendering used in trace output.
    #[must_use]
    pub fn pretty(&self, owner: Option<&TypeDescriptor>) -> String {
        match owner {
            Some(owner) => format!("{}::{}", owner.name, self.name),
            None => format!("{}::{}", self.declaring_type, self.name),
        }
    }
}
