use super::prediction::{candidate_invoke, compiled_method};
use super::{Devirtualization, Prediction, SiteState};
use crate::error::DevirtError;
use crate::metadata::{MetadataAccess, TypeResolutionStore};
use crate::mir::{Graph, InstrId, InstrKind, Instruction, ValueType};

impl<M: MetadataAccess> Devirtualization<'_, M> {
    /// Only imprecise predictions are guarded.
    ///
    /// # Errors
    ///
    /// Fails when `site` has no recorded prediction.
    pub fn needs_guard(&self, site: InstrId) -> Result<bool, DevirtError> {
        Ok(matches!(self.recorded(site)?, Prediction::Imprecise(_)))
    }

    /// Emit `runtime type of receiver == primary predicted type` immediately before
    /// `cursor` and return the guard instruction.
    ///
    /// On any failure the graph is left exactly as it was and the site is aborted.
    ///
    /// # Errors
    ///
    /// [`DevirtError::NotRepresentable`] when the predicted type cannot be named from
    /// the compiled method's unit; structural errors for bad sites or cursors.
    pub fn insert_guard(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        cursor: InstrId,
    ) -> Result<InstrId, DevirtError> {
        let checkpoint = graph.checkpoint();
        match self.emit_guard(graph, site, cursor) {
            Ok(guard) => {
                self.log_site(site, "guard", true, &format!("guard {guard}"));
                Ok(guard)
            }
            Err(err) => {
                graph.rollback(checkpoint);
                self.abort(site, &err);
                Err(err)
            }
        }
    }

    fn emit_guard(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        cursor: InstrId,
    ) -> Result<InstrId, DevirtError> {
        self.ensure_transition(site, SiteState::GuardInserted)?;
        let owner = compiled_method(graph)?;
        let (receiver, pc) = {
            let invoke = candidate_invoke(graph, site)?;
            let receiver = invoke
                .receiver
                .ok_or_else(|| DevirtError::malformed(format!("{site} has no receiver")))?;
            let pc = graph.instruction(site).map_or(0, |instr| instr.pc);
            (receiver, pc)
        };
        if graph.position(cursor).is_none() {
            return Err(DevirtError::malformed(format!(
                "guard cursor {cursor} is not scheduled"
            )));
        }
        let predicted_type = self.handles.type_id(self.primary_type(site)?)?;
        let type_index = self
            .metadata
            .with_access(|store| store.type_index_in(predicted_type, owner.unit))?
            .ok_or(DevirtError::NotRepresentable { ty: predicted_type })?;

        let actual = graph.add_detached(Instruction::new(
            InstrKind::LoadRuntimeType { object: receiver },
            ValueType::Reference,
            pc,
        ));
        let predicted = graph.add_detached(Instruction::new(
            InstrKind::LoadType {
                type_index,
                is_referrer: predicted_type == owner.declaring_type,
            },
            ValueType::Reference,
            pc,
        ));
        let guard = graph.add_detached(Instruction::new(
            InstrKind::DevirtGuard { predicted, actual },
            ValueType::Void,
            pc,
        ));
        graph.insert_before(actual, cursor)?;
        graph.insert_after(predicted, actual)?;
        graph.insert_after(guard, predicted)?;
        self.transition(site, SiteState::GuardInserted)?;
        Ok(guard)
    }
}
