//! Observed receiver types for call sites.
//!
//! Profile-guided prediction is a pluggable interface: the pass asks a
//! [`ProfileSource`] for the receiver types seen at a call site and treats an empty
//! answer as "no data". The shipped [`NoProfile`] source never has data, so
//! speculation only happens for targets proven exact by static analysis unless a host
//! plugs in a real source.

use crate::metadata::{MethodId, MethodIndex, TypeId};
use crate::mir::InstrId;

/// Identifies the call site a profile lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileQuery {
    pub site: InstrId,
    pub pc: u32,
    pub declared: MethodIndex,
}

/// Supplier of observed receiver types.
pub trait ProfileSource {
    /// Receiver types observed at `query` while executing `caller`, most frequent first.
    /// May be empty.
    fn types_for(&self, query: &ProfileQuery, caller: MethodId) -> Vec<TypeId>;
}

/// Profile source with no data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProfile;

impl ProfileSource for NoProfile {
    fn types_for(&self, _query: &ProfileQuery, _caller: MethodId) -> Vec<TypeId> {
        Vec::new()
    }
}
