//! Structural verification for speculation IR graphs.

use std::collections::HashMap;
use std::fmt;

use super::data::{BlockId, CallKind, InstrId, InstrKind};
use super::graph::Graph;

/// Validate the structural invariants of a graph.
///
/// # Errors
///
/// Returns every [`VerifyError`] found.
pub fn verify_graph(graph: &Graph) -> Result<(), Vec<VerifyError>> {
    let verifier = Verifier::new(graph);
    verifier.run()
}

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    UnknownInstruction { id: InstrId },
    ScheduledTwice { id: InstrId },
    BlockMismatch { id: InstrId, listed_in: BlockId },
    DeadInput { user: InstrId, input: InstrId },
    UseBeforeDefinition { user: InstrId, input: InstrId },
    MalformedGuard { guard: InstrId },
    CurrentMethodInput { call: InstrId, expected: bool },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::UnknownInstruction { id } => write!(f, "{id} is not in the arena"),
            VerifyError::ScheduledTwice { id } => write!(f, "{id} is scheduled more than once"),
            VerifyError::BlockMismatch { id, listed_in } => {
                write!(f, "{id} is listed in {listed_in} but records another block")
            }
            VerifyError::DeadInput { user, input } => {
                write!(f, "{user} uses {input}, which is not scheduled")
            }
            VerifyError::UseBeforeDefinition { user, input } => {
                write!(f, "{user} uses {input} before it is defined")
            }
            VerifyError::MalformedGuard { guard } => {
                write!(f, "{guard} does not compare a type constant with a runtime type")
            }
            VerifyError::CurrentMethodInput { call, expected } => {
                if *expected {
                    write!(f, "{call} is missing its current-method input")
                } else {
                    write!(f, "{call} carries an unexpected current-method input")
                }
            }
        }
    }
}

struct Verifier<'a> {
    graph: &'a Graph,
    errors: Vec<VerifyError>,
    placement: HashMap<InstrId, (BlockId, usize)>,
}

impl<'a> Verifier<'a> {
    fn new(graph: &'a Graph) -> Self {
        Self {
            graph,
            errors: Vec::new(),
            placement: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<(), Vec<VerifyError>> {
        self.check_placement();
        self.check_operands();
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn check_placement(&mut self) {
        let graph = self.graph;
        for block in graph.blocks() {
            for (index, id) in block.instructions.iter().enumerate() {
                let Some(instr) = graph.instruction(*id) else {
                    self.errors.push(VerifyError::UnknownInstruction { id: *id });
                    continue;
                };
                if self.placement.insert(*id, (block.id, index)).is_some() {
                    self.errors.push(VerifyError::ScheduledTwice { id: *id });
                }
                if instr.block() != Some(block.id) {
                    self.errors.push(VerifyError::BlockMismatch {
                        id: *id,
                        listed_in: block.id,
                    });
                }
            }
        }
    }

    fn check_operands(&mut self) {
        let graph = self.graph;
        for (id, instr) in graph.scheduled_instructions() {
            let Some(&(block, index)) = self.placement.get(&id) else {
                continue;
            };
            for input in instr.kind.inputs() {
                match self.placement.get(&input) {
                    None => self.errors.push(VerifyError::DeadInput { user: id, input }),
                    Some(&(input_block, input_index))
                        if input_block == block && input_index >= index =>
                    {
                        self.errors
                            .push(VerifyError::UseBeforeDefinition { user: id, input });
                    }
                    Some(_) => {}
                }
            }
            match &instr.kind {
                InstrKind::DevirtGuard { predicted, actual } => {
                    let predicted_ok = graph
                        .instruction(*predicted)
                        .is_some_and(|instr| matches!(instr.kind, InstrKind::LoadType { .. }));
                    let actual_ok = graph.instruction(*actual).is_some_and(|instr| {
                        matches!(instr.kind, InstrKind::LoadRuntimeType { .. })
                    });
                    if !predicted_ok || !actual_ok {
                        self.errors.push(VerifyError::MalformedGuard { guard: id });
                    }
                }
                InstrKind::Invoke(invoke) => {
                    let expected = match invoke.kind {
                        CallKind::Direct(direct) => direct.load_kind.needs_current_method(),
                        CallKind::Virtual | CallKind::Interface | CallKind::Static => false,
                    };
                    if expected != invoke.current_method.is_some() {
                        self.errors
                            .push(VerifyError::CurrentMethodInput { call: id, expected });
                    }
                }
                _ => {}
            }
        }
    }
}
