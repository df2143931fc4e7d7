use super::prediction::{candidate_invoke, compiled_method};
use super::{Devirtualization, SiteState};
use crate::error::DevirtError;
use crate::metadata::{MetadataAccess, TypeResolutionStore};
use crate::mir::{CallKind, DirectCall, Graph, InstrId, Instruction, Invoke, ValueType};

impl<M: MetadataAccess> Devirtualization<'_, M> {
    /// Rewrite the call at `site` into a direct call to the predicted type's override.
    ///
    /// Returns the replacement instruction. Every use of the original call, including
    /// frame states, is redirected to it. On failure the site is aborted; the caller
    /// owns rolling back any guard it already inserted.
    ///
    /// # Errors
    ///
    /// Representability, override lookup and reference-table lookup failures, plus
    /// structural errors when the site is not in a state that allows specialization.
    pub fn handle_speculation(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        guard_inserted: bool,
    ) -> Result<InstrId, DevirtError> {
        match self.specialize(graph, site, guard_inserted) {
            Ok(call) => {
                self.log_site(site, "specialize", true, &format!("direct call {call}"));
                Ok(call)
            }
            Err(err) => {
                self.abort(site, &err);
                Err(err)
            }
        }
    }

    fn specialize(
        &mut self,
        graph: &mut Graph,
        site: InstrId,
        guard_inserted: bool,
    ) -> Result<InstrId, DevirtError> {
        self.ensure_transition(site, SiteState::Specialized)?;
        if guard_inserted != (self.site_state(site) == SiteState::GuardInserted) {
            return Err(DevirtError::malformed(format!(
                "{site} is {} but the caller reported guard_inserted={guard_inserted}",
                self.site_state(site)
            )));
        }
        let owner = compiled_method(graph)?;
        let (invoke, pc, env) = {
            let invoke = candidate_invoke(graph, site)?.clone();
            let instr = graph
                .instruction(site)
                .ok_or(DevirtError::NotCandidate { site })?;
            (invoke, instr.pc, instr.env.clone())
        };
        let dispatch = invoke
            .kind
            .dispatch_kind()
            .ok_or(DevirtError::NotCandidate { site })?;
        let predicted = self.handles.get(self.primary_type(site)?)?.clone();

        // A guard already proved the type nameable; debug builds check again.
        if !guard_inserted || cfg!(debug_assertions) {
            self.metadata
                .with_access(|store| store.type_index_in(predicted.id, owner.unit))?
                .ok_or(DevirtError::NotRepresentable { ty: predicted.id })?;
        }

        let resolved = self
            .metadata
            .with_access(|store| store.resolve_method(owner.unit, invoke.method))?
            .ok_or(DevirtError::UnresolvedTarget {
                index: invoke.method,
            })?;
        let actual = self
            .metadata
            .with_access(|store| {
                if store.is_method_or_declaring_type_final(&resolved) {
                    Some(resolved.clone())
                } else {
                    store.find_override(&resolved, predicted.id, dispatch)
                }
            })?
            .ok_or_else(|| DevirtError::MissingOverride {
                method: resolved.name.clone(),
                ty: predicted.id,
            })?;
        let method = self
            .metadata
            .with_access(|store| store.method_index_in(actual.id, owner.unit, invoke.method))?
            .ok_or_else(|| DevirtError::TargetNotNameable {
                method: actual.name.clone(),
            })?;

        let load_kind = self.config.method_load_kind;
        let current_method = if load_kind.needs_current_method() {
            Some(graph.current_method()?)
        } else {
            None
        };
        let result_info = match invoke.result {
            ValueType::Reference => invoke.result_info,
            _ => None,
        };
        let direct = Invoke {
            kind: CallKind::Direct(DirectCall {
                original: dispatch,
                load_kind,
            }),
            method,
            receiver: invoke.receiver,
            args: invoke.args,
            current_method,
            result: invoke.result,
            result_info,
            intrinsic: None,
        };
        let mut replacement = Instruction::invoke(direct, pc);
        replacement.env = env;
        let replacement = graph.add_detached(replacement);
        graph.replace_and_remove(site, replacement)?;
        self.transition(site, SiteState::Specialized)?;
        Ok(replacement)
    }
}
