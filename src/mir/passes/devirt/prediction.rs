//! Receiver type prediction and the per-site prediction cache.

use super::{Devirtualization, SiteState};
use crate::error::DevirtError;
use crate::metadata::{
    MetadataAccess, MethodDescriptor, TypeDescriptor, TypeHandle, TypeResolutionStore,
};
use crate::mir::{CallKind, CompiledMethod, Graph, InstrId, InstrKind, Invoke, ReferenceTypeInfo};
use crate::profile::ProfileQuery;

/// Non-empty, ordered list of predicted receiver types. The first entry is primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    primary: TypeHandle,
    rest: Vec<TypeHandle>,
}

impl Candidates {
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn new(types: Vec<TypeHandle>) -> Option<Self> {
        let mut types = types.into_iter();
        let primary = types.next()?;
        Some(Self {
            primary,
            rest: types.collect(),
        })
    }

    #[must_use]
    pub fn primary(&self) -> TypeHandle {
        self.primary
    }

    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeHandle> + '_ {
        std::iter::once(self.primary).chain(self.rest.iter().copied())
    }
}

/// What the pass believes about a call site's receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    /// Proven by static analysis; no guard is required.
    Precise(TypeHandle),
    /// Observed at runtime; must be guarded.
    Imprecise(Candidates),
}

impl Prediction {
    #[must_use]
    pub fn primary(&self) -> TypeHandle {
        match self {
            Prediction::Precise(handle) => *handle,
            Prediction::Imprecise(candidates) => candidates.primary(),
        }
    }

    #[must_use]
    pub fn is_precise(&self) -> bool {
        matches!(self, Prediction::Precise(_))
    }

    /// Every handle the prediction refers to, primary first.
    pub fn handles(&self) -> Box<dyn Iterator<Item = TypeHandle> + '_> {
        match self {
            Prediction::Precise(handle) => Box::new(std::iter::once(*handle)),
            Prediction::Imprecise(candidates) => Box::new(candidates.iter()),
        }
    }
}

/// Prediction computed from metadata but not yet recorded in the cache.
enum Observed {
    Precise(TypeDescriptor),
    Imprecise(Vec<TypeDescriptor>),
}

/// The invoke at `site`, when it is a polymorphic call this pass may rewrite.
pub(super) fn candidate_invoke(graph: &Graph, site: InstrId) -> Result<&Invoke, DevirtError> {
    let invoke = graph
        .instruction(site)
        .and_then(|instr| instr.kind.as_invoke())
        .ok_or(DevirtError::NotCandidate { site })?;
    match invoke.kind {
        CallKind::Virtual | CallKind::Interface if invoke.intrinsic.is_none() => Ok(invoke),
        _ => Err(DevirtError::NotCandidate { site }),
    }
}

pub(super) fn compiled_method(graph: &Graph) -> Result<CompiledMethod, DevirtError> {
    graph
        .owner()
        .ok_or_else(|| DevirtError::malformed("graph is not attached to a compiled method"))
}

/// Type facts about the receiver, looking through one null check.
fn receiver_type_info(graph: &Graph, invoke: &Invoke) -> Option<ReferenceTypeInfo> {
    let mut receiver = graph.instruction(invoke.receiver?)?;
    if let InstrKind::NullCheck { value } = receiver.kind {
        receiver = graph.instruction(value)?;
    }
    receiver.type_info
}

impl<M: MetadataAccess> Devirtualization<'_, M> {
    /// Virtual and interface calls that were not already bound to an intrinsic.
    #[must_use]
    pub fn is_candidate(&self, graph: &Graph, site: InstrId) -> bool {
        candidate_invoke(graph, site).is_ok()
    }

    /// Whether `site` has a usable prediction. Cached results are returned as-is.
    ///
    /// With `update` the freshly computed prediction is recorded and the site's state
    /// advances; without it, nothing is cached and no handles are allocated.
    pub fn has_prediction(&mut self, graph: &Graph, site: InstrId, update: bool) -> bool {
        if self.predictions.contains_key(&site) {
            return true;
        }
        if self.site_state(site) == SiteState::Excluded {
            return false;
        }
        match self.observe(graph, site) {
            Ok(observed) if update => match self.record(site, observed) {
                Ok(()) => true,
                Err(err) => {
                    self.log_site(site, "predict", false, &err.to_string());
                    false
                }
            },
            Ok(_) => true,
            Err(err) => {
                self.log_site(site, "predict", false, &err.to_string());
                if update && self.site_state(site) == SiteState::Unknown {
                    self.states.insert(site, SiteState::Excluded);
                }
                false
            }
        }
    }

    /// The primary predicted type of `site`.
    ///
    /// # Errors
    ///
    /// Fails with [`DevirtError::NoPrediction`] when nothing was recorded.
    pub fn primary_type(&self, site: InstrId) -> Result<TypeHandle, DevirtError> {
        self.recorded(site).map(Prediction::primary)
    }

    /// Whether two predicted sites speculate on the same type.
    ///
    /// # Errors
    ///
    /// Both sites must be candidates with recorded predictions.
    pub fn is_prediction_same(
        &self,
        graph: &Graph,
        first: InstrId,
        second: InstrId,
    ) -> Result<bool, DevirtError> {
        let first_call = candidate_invoke(graph, first)?;
        let second_call = candidate_invoke(graph, second)?;
        let first_type = self.primary_type(first)?;
        let second_type = self.primary_type(second)?;
        if first_call.receiver.is_some() && first_call.receiver == second_call.receiver {
            return Ok(true);
        }
        Ok(self.handles.type_id(first_type)? == self.handles.type_id(second_type)?)
    }

    /// Receiver types the profile saw at `site`, resolved to snapshots. Unknown and
    /// repeated types are skipped; an empty result means no profile data.
    ///
    /// # Errors
    ///
    /// Fails when `site` is not a candidate or metadata is unavailable.
    pub fn find_types_from_profile(
        &self,
        graph: &Graph,
        site: InstrId,
    ) -> Result<Vec<TypeDescriptor>, DevirtError> {
        let invoke = candidate_invoke(graph, site)?;
        let owner = compiled_method(graph)?;
        let pc = graph.instruction(site).map_or(0, |instr| instr.pc);
        let query = ProfileQuery {
            site,
            pc,
            declared: invoke.method,
        };
        let mut observed = self.profile.types_for(&query, owner.method);
        if observed.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = Vec::with_capacity(observed.len());
        observed.retain(|ty| {
            let fresh = !seen.contains(ty);
            seen.push(*ty);
            fresh
        });
        self.metadata.with_access(|store| {
            observed
                .iter()
                .filter_map(|ty| store.type_descriptor(*ty))
                .collect()
        })
    }

    pub(super) fn recorded(&self, site: InstrId) -> Result<&Prediction, DevirtError> {
        self.predictions
            .get(&site)
            .ok_or(DevirtError::NoPrediction { site })
    }

    fn observe(&self, graph: &Graph, site: InstrId) -> Result<Observed, DevirtError> {
        let invoke = candidate_invoke(graph, site)?;
        let owner = compiled_method(graph)?;
        let resolved = self
            .metadata
            .with_access(|store| store.resolve_method(owner.unit, invoke.method))?
            .ok_or(DevirtError::UnresolvedTarget {
                index: invoke.method,
            })?;
        if let Some(exact) = self.find_exact_type(graph, invoke, &resolved)? {
            return Ok(Observed::Precise(exact));
        }
        let observed = self.find_types_from_profile(graph, site)?;
        if observed.is_empty() {
            return Err(DevirtError::NoPrediction { site });
        }
        Ok(Observed::Imprecise(observed))
    }

    fn find_exact_type(
        &self,
        graph: &Graph,
        invoke: &Invoke,
        resolved: &MethodDescriptor,
    ) -> Result<Option<TypeDescriptor>, DevirtError> {
        let declaring = self.metadata.with_access(|store| {
            if store.is_method_or_declaring_type_final(resolved) {
                store.type_descriptor(resolved.declaring_type)
            } else {
                None
            }
        })?;
        if declaring.is_some() {
            return Ok(declaring);
        }
        let (Some(info), Some(dispatch)) =
            (receiver_type_info(graph, invoke), invoke.kind.dispatch_kind())
        else {
            return Ok(None);
        };
        self.metadata.with_access(|store| {
            let receiver = store.type_descriptor(info.ty)?;
            if !info.is_exact && !receiver.is_final {
                return None;
            }
            let actual = store.find_override(resolved, receiver.id, dispatch)?;
            if store.is_method_or_declaring_type_final(&actual) {
                store.type_descriptor(actual.declaring_type)
            } else {
                Some(receiver)
            }
        })
    }

    fn record(&mut self, site: InstrId, observed: Observed) -> Result<(), DevirtError> {
        let (prediction, state) = match observed {
            Observed::Precise(ty) => {
                let handle = self.handles.new_handle(ty)?;
                (Prediction::Precise(handle), SiteState::Precise)
            }
            Observed::Imprecise(types) => {
                let mut handles = Vec::with_capacity(types.len());
                for ty in types {
                    handles.push(self.handles.new_handle(ty)?);
                }
                let candidates = Candidates::new(handles)
                    .ok_or(DevirtError::NoPrediction { site })?;
                let count = candidates.count();
                (
                    Prediction::Imprecise(candidates),
                    SiteState::Imprecise(count),
                )
            }
        };
        self.transition(site, state)?;
        let detail = match &prediction {
            Prediction::Precise(_) => "precise".to_string(),
            Prediction::Imprecise(candidates) => {
                format!("imprecise x{}", candidates.count())
            }
        };
        self.predictions.insert(site, prediction);
        self.log_site(site, "predict", true, &detail);
        Ok(())
    }
}
