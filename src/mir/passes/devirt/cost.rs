use serde::Serialize;

use super::prediction::compiled_method;
use super::{Devirtualization, Prediction};
use crate::error::DevirtError;
use crate::metadata::MetadataAccess;
use crate::mir::{Graph, InstrId};

/// Expected share of executions where the primary prediction is wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MispredictRate {
    pub numerator: u64,
    pub denominator: u64,
}

impl MispredictRate {
    #[must_use]
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl std::fmt::Display for MispredictRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl<M: MetadataAccess> Devirtualization<'_, M> {
    /// Cost of guarding one candidate whose type lives in another reference table.
    #[must_use]
    pub fn max_cost(&self) -> u64 {
        self.config
            .costs
            .load_foreign_type
            .saturating_add(self.config.costs.devirt_check)
    }

    /// Guard cost of `site`. Precise predictions are free; each imprecise candidate
    /// costs a type load plus a check, cheaper when it is the compiled method's own type.
    ///
    /// # Errors
    ///
    /// Fails when `site` has no recorded prediction.
    pub fn cost(&self, graph: &Graph, site: InstrId) -> Result<u64, DevirtError> {
        let candidates = match self.recorded(site)? {
            Prediction::Precise(_) => return Ok(0),
            Prediction::Imprecise(candidates) => candidates,
        };
        let referrer = compiled_method(graph)?.declaring_type;
        let self_cost = self
            .config
            .costs
            .load_self_type
            .saturating_add(self.config.costs.devirt_check);
        candidates.iter().try_fold(0u64, |total, handle| -> Result<u64, DevirtError> {
            let each = if self.handles.type_id(handle)? == referrer {
                self_cost
            } else {
                self.max_cost()
            };
            Ok(total.saturating_add(each))
        })
    }

    /// # Errors
    ///
    /// Fails when `site` has no recorded prediction.
    pub fn mispredict_rate(&self, site: InstrId) -> Result<MispredictRate, DevirtError> {
        let rate = match self.recorded(site)? {
            Prediction::Precise(_) => MispredictRate::new(0, 10),
            Prediction::Imprecise(candidates) if candidates.count() == 1 => {
                MispredictRate::new(1, 10)
            }
            Prediction::Imprecise(candidates) => {
                let count = candidates.count() as u64;
                MispredictRate::new(count - 1, count)
            }
        };
        Ok(rate)
    }

    /// Savings from the direct call: the fixed dispatch saving plus one unit per
    /// argument (receiver included) and one for the return value.
    ///
    /// # Errors
    ///
    /// Fails when `site` has no recorded prediction or is no longer an invoke.
    pub fn profit(&self, graph: &Graph, site: InstrId) -> Result<u64, DevirtError> {
        self.recorded(site)?;
        let invoke = graph
            .instruction(site)
            .and_then(|instr| instr.kind.as_invoke())
            .ok_or(DevirtError::NotCandidate { site })?;
        let arguments = u64::try_from(invoke.argument_count()).unwrap_or(u64::MAX);
        Ok(self
            .config
            .costs
            .baseline_invoke_savings
            .saturating_add(arguments)
            .saturating_add(1))
    }
}
