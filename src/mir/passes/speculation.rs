//! Generic speculation-pass contract and the reference driver that runs it.
//!
//! A pass predicts something about an instruction, prices the speculation, guards it
//! when the prediction is not proven, and rewrites the instruction. The driver owns the
//! order of those steps and the decision whether a site is worth speculating on.

use super::devirt::{MispredictRate, RecoveryPolicy, SiteState};
use super::report::{self, PassReport, SiteDecision, SiteOutcome};
use crate::config::DriverThresholds;
use crate::error::DevirtError;
use crate::logging::LOG_TARGET;
use crate::mir::{Graph, InstrId};

/// Result of a committed speculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Speculation {
    pub guard: Option<InstrId>,
    pub call: InstrId,
    pub recovery: RecoveryPolicy,
}

pub trait SpeculationPass {
    fn name(&self) -> &'static str;

    /// Whether the pass runs on `graph` at all.
    fn gate(&self, graph: &Graph) -> bool;

    fn is_candidate(&self, graph: &Graph, site: InstrId) -> bool;

    fn has_prediction(&mut self, graph: &Graph, site: InstrId, update: bool) -> bool;

    fn max_cost(&self) -> u64;

    fn cost(&self, graph: &Graph, site: InstrId) -> Result<u64, DevirtError>;

    fn profit(&self, graph: &Graph, site: InstrId) -> Result<u64, DevirtError>;

    fn mispredict_rate(&self, site: InstrId) -> Result<MispredictRate, DevirtError>;

    fn is_prediction_same(
        &self,
        graph: &Graph,
        first: InstrId,
        second: InstrId,
    ) -> Result<bool, DevirtError>;

    fn needs_guard(&self, site: InstrId) -> Result<bool, DevirtError>;

    fn insert_guard(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        cursor: InstrId,
    ) -> Result<InstrId, DevirtError>;

    fn handle_speculation(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        guard_inserted: bool,
    ) -> Result<InstrId, DevirtError>;

    fn recovery_policy(&self, site: InstrId) -> Result<RecoveryPolicy, DevirtError>;

    fn mark_aborted(&mut self, site: InstrId, reason: &DevirtError);

    fn site_state(&self, site: InstrId) -> SiteState;

    /// Guard (when needed) and specialize `site` as one unit.
    ///
    /// If either step fails the graph is rolled back to its state before the call and
    /// the site is marked aborted.
    ///
    /// # Errors
    ///
    /// Whatever the failing step reported.
    fn speculate(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        cursor: InstrId,
    ) -> Result<Speculation, DevirtError> {
        let checkpoint = graph.checkpoint();
        match speculate_in_place(self, graph, site, cursor) {
            Ok(speculation) => Ok(speculation),
            Err(err) => {
                graph.rollback(checkpoint);
                self.mark_aborted(site, &err);
                Err(err)
            }
        }
    }
}

fn speculate_in_place<P: SpeculationPass + ?Sized>(
    pass: &mut P,
    graph: &mut Graph,
    site: InstrId,
    cursor: InstrId,
) -> Result<Speculation, DevirtError> {
    let recovery = pass.recovery_policy(site)?;
    let guard = if pass.needs_guard(site)? {
        Some(pass.insert_guard(graph, site, cursor)?)
    } else {
        None
    };
    let call = pass.handle_speculation(graph, site, guard.is_some())?;
    Ok(Speculation {
        guard,
        call,
        recovery,
    })
}

/// Runs a [`SpeculationPass`] over every invoke of a graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeculationDriver {
    thresholds: DriverThresholds,
}

impl SpeculationDriver {
    #[must_use]
    pub fn new(thresholds: DriverThresholds) -> Self {
        Self { thresholds }
    }

    /// Predict, price and speculate each candidate site in block order, guarding
    /// immediately before the site itself.
    pub fn run<P: SpeculationPass + ?Sized>(&self, pass: &mut P, graph: &mut Graph) -> PassReport {
        let mut report = PassReport::new(pass.name());
        if !pass.gate(graph) {
            report.gated = true;
            tracing::debug!(target: LOG_TARGET, stage = "gate", pass = pass.name(), "pass gated off");
            return report;
        }
        for site in graph.invokes() {
            if !pass.is_candidate(graph, site) {
                continue;
            }
            let pc = graph.instruction(site).map_or(0, |instr| instr.pc);
            if !pass.has_prediction(graph, site, true) {
                report.decisions.push(SiteDecision::excluded(site, pc));
                continue;
            }
            let decision = match self.price(pass, graph, site, pc) {
                Ok(decision) if decision.outcome == SiteOutcome::Declined => decision,
                Ok(decision) => {
                    let outcome = match pass.speculate(graph, site, site) {
                        Ok(speculation) => SiteOutcome::Specialized {
                            guarded: speculation.guard.is_some(),
                        },
                        Err(err) => SiteOutcome::Aborted {
                            reason: err.label().to_string(),
                        },
                    };
                    SiteDecision { outcome, ..decision }
                }
                Err(err) => {
                    pass.mark_aborted(site, &err);
                    SiteDecision {
                        outcome: SiteOutcome::Aborted {
                            reason: err.label().to_string(),
                        },
                        ..SiteDecision::excluded(site, pc)
                    }
                }
            };
            report.decisions.push(SiteDecision {
                state: pass.site_state(site),
                ..decision
            });
        }
        let summary = report.summary();
        tracing::info!(
            target: LOG_TARGET,
            stage = "summary",
            pass = report.pass,
            considered = summary.considered,
            specialized = summary.specialized,
            guarded = summary.guarded,
            aborted = summary.aborted,
            excluded = summary.excluded,
            declined = summary.declined
        );
        report::record_pass_report(&report);
        report
    }

    fn price<P: SpeculationPass + ?Sized>(
        &self,
        pass: &P,
        graph: &Graph,
        site: InstrId,
        pc: u32,
    ) -> Result<SiteDecision, DevirtError> {
        let cost = pass.cost(graph, site)?;
        let profit = pass.profit(graph, site)?;
        let declined = cost > self.thresholds.max_cost || profit < self.thresholds.min_profit;
        Ok(SiteDecision {
            site,
            pc,
            state: pass.site_state(site),
            outcome: if declined {
                SiteOutcome::Declined
            } else {
                SiteOutcome::Specialized {
                    guarded: pass.needs_guard(site)?,
                }
            },
            cost: Some(cost),
            profit: Some(profit),
            mispredict: Some(pass.mispredict_rate(site)?),
            recovery: Some(pass.recovery_policy(site)?),
        })
    }
}
