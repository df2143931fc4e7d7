use std::fmt::Write;

use super::data::{
    CallKind, FrameState, InstrId, InstrKind, Instruction, Invoke, MethodLoadKind,
    ReferenceTypeInfo,
};
use super::graph::Graph;

/// Render a graph into a human-readable string.
#[must_use]
pub fn format_graph(graph: &Graph) -> String {
    let mut out = String::new();
    match graph.owner() {
        Some(owner) => {
            let _ = writeln!(
                out,
                "method {} of {} (unit {})",
                owner.method, owner.declaring_type, owner.unit.0
            );
        }
        None => {
            let _ = writeln!(out, "method <unknown>");
        }
    }
    for block in graph.blocks() {
        let _ = writeln!(out, "{}:", block.id);
        for id in &block.instructions {
            if let Some(instr) = graph.instruction(*id) {
                format_instruction(*id, instr, &mut out);
            }
        }
    }
    out
}

fn format_instruction(id: InstrId, instr: &Instruction, out: &mut String) {
    let body = match &instr.kind {
        InstrKind::Parameter { index } => format!("param #{index}"),
        InstrKind::Constant(value) => format!("const {value}"),
        InstrKind::CurrentMethod => "current_method".to_string(),
        InstrKind::NullCheck { value } => format!("null_check {value}"),
        InstrKind::Invoke(invoke) => format_invoke(invoke),
        InstrKind::LoadRuntimeType { object } => format!("load_runtime_type {object}"),
        InstrKind::LoadType {
            type_index,
            is_referrer,
        } => {
            if *is_referrer {
                format!("load_type {type_index} self")
            } else {
                format!("load_type {type_index}")
            }
        }
        InstrKind::DevirtGuard { predicted, actual } => {
            format!("devirt_guard {predicted} == {actual}")
        }
        InstrKind::Return { value } => match value {
            Some(value) => format!("return {value}"),
            None => "return".to_string(),
        },
    };
    let _ = write!(out, "  {id} = {body} : {}", instr.ty.as_str());
    if let Some(info) = instr.type_info {
        let _ = write!(out, " {}", format_type_info(info));
    }
    if !instr.has_side_effects && matches!(instr.kind, InstrKind::LoadRuntimeType { .. }) {
        let _ = write!(out, " pure");
    }
    let _ = write!(out, " @{}", instr.pc);
    if let Some(env) = &instr.env {
        let _ = write!(out, " {}", format_env(env));
    }
    let _ = writeln!(out);
}

fn format_invoke(invoke: &Invoke) -> String {
    let kind = match invoke.kind {
        CallKind::Virtual => "invoke.virtual".to_string(),
        CallKind::Interface => "invoke.interface".to_string(),
        CallKind::Static => "invoke.static".to_string(),
        CallKind::Direct(direct) => {
            let load = match direct.load_kind {
                MethodLoadKind::ViaCurrentMethod => "via-current-method",
                MethodLoadKind::Direct => "direct",
            };
            format!("invoke.direct[{}, {load}]", direct.original.as_str())
        }
    };
    let receiver = invoke
        .receiver
        .map_or_else(String::new, |receiver| receiver.to_string());
    let args = invoke
        .args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let mut text = format!("{kind} {} {receiver}({args}", invoke.method);
    if let Some(current) = invoke.current_method {
        let _ = write!(text, "; {current}");
    }
    text.push(')');
    if let Some(intrinsic) = &invoke.intrinsic {
        let _ = write!(text, " intrinsic={intrinsic}");
    }
    text
}

fn format_type_info(info: ReferenceTypeInfo) -> String {
    if info.is_exact {
        format!("[={}]", info.ty)
    } else {
        format!("[{}]", info.ty)
    }
}

fn format_env(env: &FrameState) -> String {
    let values = env
        .values
        .iter()
        .map(|value| value.map_or_else(|| "-".to_string(), |id| id.to_string()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("env@{}({values})", env.pc)
}
