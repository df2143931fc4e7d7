//! Speculative devirtualization of virtual and interface calls.
//!
//! For every polymorphic call the pass tries to predict the receiver type. A
//! *precise* prediction is proven by static analysis and needs no guard; an
//! *imprecise* prediction comes from observed receiver types and is protected by a
//! runtime type check. Either way the call is rewritten into a direct call to the
//! predicted type's override, and a recovery policy is chosen for mispredictions.
//!
//! Predictions are cached per call site for the lifetime of the pass. Metadata is
//! only consulted inside short [`MetadataAccess`] scopes; IR edits never happen while
//! one is held.

mod cost;
mod guard;
mod prediction;
mod recovery;
mod specialize;
mod state;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;

pub use cost::MispredictRate;
pub use prediction::{Candidates, Prediction};
pub use recovery::RecoveryPolicy;
pub use state::SiteState;

use super::speculation::SpeculationPass;
use crate::config::DevirtConfig;
use crate::error::{DevirtError, Result};
use crate::logging::LOG_TARGET;
use crate::metadata::{HandleScope, MetadataAccess};
use crate::mir::{Graph, InstrId};
use crate::profile::ProfileSource;

/// One run of the devirtualization pass over a single method.
pub struct Devirtualization<'a, M: MetadataAccess> {
    metadata: &'a M,
    profile: &'a dyn ProfileSource,
    config: DevirtConfig,
    handles: HandleScope,
    predictions: HashMap<InstrId, Prediction>,
    states: HashMap<InstrId, SiteState>,
}

/// Internal bookkeeping that disagrees with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A cached prediction refers to a handle the scope cannot resolve.
    DanglingHandle { site: InstrId },
    /// The site's state does not match its cached prediction.
    StateMismatch { site: InstrId, state: SiteState },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::DanglingHandle { site } => {
                write!(f, "{site}: prediction refers to an unknown type handle")
            }
            InvariantViolation::StateMismatch { site, state } => {
                write!(f, "{site}: state {state} does not match the cached prediction")
            }
        }
    }
}

impl<'a, M: MetadataAccess> Devirtualization<'a, M> {
    pub fn new(metadata: &'a M, profile: &'a dyn ProfileSource, config: DevirtConfig) -> Self {
        Self {
            metadata,
            profile,
            config,
            handles: HandleScope::new(),
            predictions: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// The pass needs to know which method it is compiling.
    #[must_use]
    pub fn gate(&self, graph: &Graph) -> bool {
        self.config.enabled && graph.owner().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &DevirtConfig {
        &self.config
    }

    #[must_use]
    pub fn site_state(&self, site: InstrId) -> SiteState {
        self.states.get(&site).copied().unwrap_or(SiteState::Unknown)
    }

    /// The cached prediction for `site`, if one was recorded.
    #[must_use]
    pub fn prediction(&self, site: InstrId) -> Option<&Prediction> {
        self.predictions.get(&site)
    }

    #[must_use]
    pub fn handles(&self) -> &HandleScope {
        &self.handles
    }

    /// Cross-check cached predictions against per-site states and live handles.
    ///
    /// # Errors
    ///
    /// Returns every violation found; any violation is a defect in the pass itself.
    pub fn check_invariants(&self) -> std::result::Result<(), Vec<InvariantViolation>> {
        let mut violations = Vec::new();
        for (site, prediction) in &self.predictions {
            if prediction
                .handles()
                .any(|handle| self.handles.get(handle).is_err())
            {
                violations.push(InvariantViolation::DanglingHandle { site: *site });
            }
            let state = self.site_state(*site);
            let consistent = match (state, prediction) {
                (SiteState::Precise, Prediction::Precise(_)) => true,
                (SiteState::Imprecise(count), Prediction::Imprecise(candidates)) => {
                    count == candidates.count()
                }
                (SiteState::GuardInserted, Prediction::Imprecise(_))
                | (SiteState::Specialized | SiteState::Aborted, _) => true,
                _ => false,
            };
            if !consistent {
                violations.push(InvariantViolation::StateMismatch { site: *site, state });
            }
        }
        for (site, state) in &self.states {
            if matches!(state, SiteState::Excluded) && self.predictions.contains_key(site) {
                violations.push(InvariantViolation::StateMismatch {
                    site: *site,
                    state: *state,
                });
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Tear the pass down and release its type handles. Returns how many were live.
    ///
    /// # Errors
    ///
    /// Fails when bookkeeping is inconsistent or the handles were already released.
    pub fn finish(mut self) -> Result<usize> {
        if let Err(violations) = self.check_invariants() {
            let rendered = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            let _ = self.handles.release();
            return Err(crate::error::Error::internal(format!(
                "devirtualization bookkeeping is inconsistent: {rendered}"
            )));
        }
        self.handles.release()
    }

    fn ensure_transition(
        &self,
        site: InstrId,
        next: SiteState,
    ) -> std::result::Result<(), DevirtError> {
        let current = self.site_state(site);
        if current.can_transition_to(next) {
            Ok(())
        } else {
            Err(DevirtError::InvalidTransition {
                site,
                from: current.to_string(),
                to: next.to_string(),
            })
        }
    }

    fn transition(&mut self, site: InstrId, next: SiteState) -> std::result::Result<(), DevirtError> {
        self.ensure_transition(site, next)?;
        self.states.insert(site, next);
        Ok(())
    }

    /// Move `site` to `Aborted` when its state allows it and report why.
    pub fn abort(&mut self, site: InstrId, reason: &DevirtError) {
        if self.site_state(site).can_transition_to(SiteState::Aborted) {
            self.states.insert(site, SiteState::Aborted);
        }
        self.log_site(site, "abort", false, &reason.to_string());
    }

    fn log_site(&self, site: InstrId, stage: &'static str, accepted: bool, detail: &str) {
        if self.config.verbose {
            tracing::info!(target: LOG_TARGET, stage, site = %site, accepted, detail);
        } else {
            tracing::debug!(target: LOG_TARGET, stage, site = %site, accepted, detail);
        }
    }
}

impl<M: MetadataAccess> Drop for Devirtualization<'_, M> {
    fn drop(&mut self) {
        if self.handles.is_released() {
            return;
        }
        debug_assert!(
            self.check_invariants().is_ok(),
            "devirtualization bookkeeping is inconsistent at teardown"
        );
        let _ = self.handles.release();
    }
}

impl<M: MetadataAccess> SpeculationPass for Devirtualization<'_, M> {
    fn name(&self) -> &'static str {
        "devirtualization"
    }

    fn gate(&self, graph: &Graph) -> bool {
        Devirtualization::gate(self, graph)
    }

    fn is_candidate(&self, graph: &Graph, site: InstrId) -> bool {
        Devirtualization::is_candidate(self, graph, site)
    }

    fn has_prediction(&mut self, graph: &Graph, site: InstrId, update: bool) -> bool {
        Devirtualization::has_prediction(self, graph, site, update)
    }

    fn max_cost(&self) -> u64 {
        Devirtualization::max_cost(self)
    }

    fn cost(&self, graph: &Graph, site: InstrId) -> std::result::Result<u64, DevirtError> {
        Devirtualization::cost(self, graph, site)
    }

    fn profit(&self, graph: &Graph, site: InstrId) -> std::result::Result<u64, DevirtError> {
        Devirtualization::profit(self, graph, site)
    }

    fn mispredict_rate(&self, site: InstrId) -> std::result::Result<MispredictRate, DevirtError> {
        Devirtualization::mispredict_rate(self, site)
    }

    fn is_prediction_same(
        &self,
        graph: &Graph,
        first: InstrId,
        second: InstrId,
    ) -> std::result::Result<bool, DevirtError> {
        Devirtualization::is_prediction_same(self, graph, first, second)
    }

    fn needs_guard(&self, site: InstrId) -> std::result::Result<bool, DevirtError> {
        Devirtualization::needs_guard(self, site)
    }

    fn insert_guard(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        cursor: InstrId,
    ) -> std::result::Result<InstrId, DevirtError> {
        Devirtualization::insert_guard(self, graph, site, cursor)
    }

    fn handle_speculation(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        guard_inserted: bool,
    ) -> std::result::Result<InstrId, DevirtError> {
        Devirtualization::handle_speculation(self, graph, site, guard_inserted)
    }

    fn recovery_policy(&self, site: InstrId) -> std::result::Result<RecoveryPolicy, DevirtError> {
        Devirtualization::recovery_policy(self, site)
    }

    fn mark_aborted(&mut self, site: InstrId, reason: &DevirtError) {
        Devirtualization::abort(self, site, reason);
    }

    fn site_state(&self, site: InstrId) -> SiteState {
        Devirtualization::site_state(self, site)
    }
}
