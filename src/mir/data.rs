//! Instruction-level data structures for the speculation IR.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::{DispatchKind, MethodId, MethodIndex, TypeId, TypeIndex, UnitId};

/// Identifier of an instruction inside a [`super::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstrId(pub usize);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Identifier of a basic block inside a [`super::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Machine-level value category produced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Void,
    Bool,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Void => "void",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Reference => "ref",
        }
    }
}

/// Statically refined type of a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceTypeInfo {
    pub ty: TypeId,
    pub is_exact: bool,
}

/// Execution-state snapshot used to rebuild the interpreter frame on deoptimization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameState {
    pub pc: u32,
    pub values: Vec<Option<InstrId>>,
}

/// How a direct call materialises its target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodLoadKind {
    /// Load the target through the current method's reference table.
    #[default]
    ViaCurrentMethod,
    /// Call the target's code directly.
    Direct,
}

impl MethodLoadKind {
    /// Whether the call needs the executing method as an extra trailing input.
    #[must_use]
    pub fn needs_current_method(self) -> bool {
        matches!(self, MethodLoadKind::ViaCurrentMethod)
    }
}

/// Direct call produced by devirtualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectCall {
    /// The dispatch the call had before it was rewritten.
    pub original: DispatchKind,
    pub load_kind: MethodLoadKind,
}

/// Dispatch mechanism of an invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Virtual,
    Interface,
    Static,
    Direct(DirectCall),
}

impl CallKind {
    /// The override lookup a polymorphic call needs, `None` for calls with a fixed target.
    #[must_use]
    pub fn dispatch_kind(self) -> Option<DispatchKind> {
        match self {
            CallKind::Virtual => Some(DispatchKind::Virtual),
            CallKind::Interface => Some(DispatchKind::Interface),
            CallKind::Static | CallKind::Direct(_) => None,
        }
    }
}

/// A call instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoke {
    pub kind: CallKind,
    /// Declared target in the caller's reference table.
    pub method: MethodIndex,
    pub receiver: Option<InstrId>,
    pub args: Vec<InstrId>,
    /// Implicit executing-method input required by some addressing modes.
    pub current_method: Option<InstrId>,
    pub result: ValueType,
    pub result_info: Option<ReferenceTypeInfo>,
    /// Set when an earlier pass already bound the call to an intrinsic implementation.
    pub intrinsic: Option<String>,
}

impl Invoke {
    #[must_use]
    pub fn virtual_call(method: MethodIndex, receiver: InstrId, args: Vec<InstrId>) -> Self {
        Self::instance(CallKind::Virtual, method, receiver, args)
    }

    #[must_use]
    pub fn interface_call(method: MethodIndex, receiver: InstrId, args: Vec<InstrId>) -> Self {
        Self::instance(CallKind::Interface, method, receiver, args)
    }

    fn instance(kind: CallKind, method: MethodIndex, receiver: InstrId, args: Vec<InstrId>) -> Self {
        Self {
            kind,
            method,
            receiver: Some(receiver),
            args,
            current_method: None,
            result: ValueType::Void,
            result_info: None,
            intrinsic: None,
        }
    }

    #[must_use]
    pub fn returning(mut self, result: ValueType, info: Option<ReferenceTypeInfo>) -> Self {
        self.result = result;
        self.result_info = info;
        self
    }

    /// Number of arguments passed to the callee, counting the receiver of instance
    /// calls but not implicit inputs.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        usize::from(self.receiver.is_some()) + self.args.len()
    }

    fn inputs(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.receiver
            .iter()
            .chain(self.args.iter())
            .chain(self.current_method.iter())
            .copied()
    }

    fn inputs_mut(&mut self) -> impl Iterator<Item = &mut InstrId> + '_ {
        self.receiver
            .iter_mut()
            .chain(self.args.iter_mut())
            .chain(self.current_method.iter_mut())
    }
}

/// Instruction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrKind {
    Parameter { index: u32 },
    Constant(i64),
    /// The method currently executing.
    CurrentMethod,
    NullCheck { value: InstrId },
    Invoke(Invoke),
    /// Load of an object's runtime type. The field is immutable after construction.
    LoadRuntimeType { object: InstrId },
    /// Load of a type constant from the caller's reference table.
    LoadType { type_index: TypeIndex, is_referrer: bool },
    /// Compare the two types and mark the start of the speculative region.
    DevirtGuard { predicted: InstrId, actual: InstrId },
    Return { value: Option<InstrId> },
}

impl InstrKind {
    /// Operands of the instruction, in evaluation order.
    #[must_use]
    pub fn inputs(&self) -> Vec<InstrId> {
        match self {
            InstrKind::Parameter { .. }
            | InstrKind::Constant(_)
            | InstrKind::CurrentMethod
            | InstrKind::LoadType { .. } => Vec::new(),
            InstrKind::NullCheck { value } => vec![*value],
            InstrKind::LoadRuntimeType { object } => vec![*object],
            InstrKind::DevirtGuard { predicted, actual } => vec![*predicted, *actual],
            InstrKind::Return { value } => value.iter().copied().collect(),
            InstrKind::Invoke(invoke) => invoke.inputs().collect(),
        }
    }

    pub(crate) fn replace_input(&mut self, old: InstrId, new: InstrId) {
        let swap = |slot: &mut InstrId| {
            if *slot == old {
                *slot = new;
            }
        };
        match self {
            InstrKind::Parameter { .. }
            | InstrKind::Constant(_)
            | InstrKind::CurrentMethod
            | InstrKind::LoadType { .. } => {}
            InstrKind::NullCheck { value } => swap(value),
            InstrKind::LoadRuntimeType { object } => swap(object),
            InstrKind::DevirtGuard { predicted, actual } => {
                swap(predicted);
                swap(actual);
            }
            InstrKind::Return { value } => value.iter_mut().for_each(swap),
            InstrKind::Invoke(invoke) => invoke.inputs_mut().for_each(swap),
        }
    }

    #[must_use]
    pub fn as_invoke(&self) -> Option<&Invoke> {
        match self {
            InstrKind::Invoke(invoke) => Some(invoke),
            _ => None,
        }
    }
}

/// A single IR instruction plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstrKind,
    pub ty: ValueType,
    /// Source position of the originating bytecode.
    pub pc: u32,
    pub type_info: Option<ReferenceTypeInfo>,
    pub env: Option<FrameState>,
    pub has_side_effects: bool,
    pub(crate) block: Option<BlockId>,
}

impl Instruction {
    #[must_use]
    pub fn new(kind: InstrKind, ty: ValueType, pc: u32) -> Self {
        let has_side_effects = matches!(
            kind,
            InstrKind::Invoke(_)
                | InstrKind::NullCheck { .. }
                | InstrKind::DevirtGuard { .. }
                | InstrKind::Return { .. }
        );
        Self {
            kind,
            ty,
            pc,
            type_info: None,
            env: None,
            has_side_effects,
            block: None,
        }
    }

    /// Build an invoke instruction whose value type follows the call's result type.
    #[must_use]
    pub fn invoke(invoke: Invoke, pc: u32) -> Self {
        let ty = invoke.result;
        let info = invoke.result_info;
        let mut instr = Self::new(InstrKind::Invoke(invoke), ty, pc);
        instr.type_info = info;
        instr
    }

    #[must_use]
    pub fn with_type_info(mut self, info: ReferenceTypeInfo) -> Self {
        self.type_info = Some(info);
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: FrameState) -> Self {
        self.env = Some(env);
        self
    }

    /// The block this instruction lives in, `None` when detached.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }
}

/// A straight-line sequence of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<InstrId>,
}

/// The method a graph is being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledMethod {
    pub unit: UnitId,
    pub method: MethodId,
    /// Declaring type of the compiled method ("self" for addressing purposes).
    pub declaring_type: TypeId,
}
