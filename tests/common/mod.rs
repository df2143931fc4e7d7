use std::collections::HashMap;

use chic_devirt::metadata::{
    ClassTable, MetadataHandshake, MethodId, MethodIndex, TypeId, TypeShape,
};
use chic_devirt::mir::{
    CompiledMethod, Graph, InstrId, InstrKind, Instruction, Invoke, ReferenceTypeInfo, ValueType,
};
use chic_devirt::logging::{LogOptions, init_test_logging};
use chic_devirt::{DevirtConfig, ProfileQuery, ProfileSource};

/// `Drawable` interface, `View` base class, final `Label`, open `Button`, and a
/// `Hidden` subclass the compiled unit never references.
pub struct Widgets {
    pub metadata: MetadataHandshake<ClassTable>,
    pub owner: CompiledMethod,
    pub view: TypeId,
    pub label: TypeId,
    pub button: TypeId,
    pub hidden: TypeId,
    pub view_draw: MethodIndex,
    pub label_draw: MethodIndex,
    pub drawable_draw: MethodIndex,
}

/// Route the pass's per-site events into the test output. `DEVIRT_LOG_LEVEL` and
/// `DEVIRT_LOG_FORMAT` still apply.
pub fn init_logging() {
    let verbose = DevirtConfig {
        verbose: true,
        ..DevirtConfig::default()
    };
    let _ = init_test_logging(&LogOptions::from_env(&verbose));
}

pub fn widgets() -> Widgets {
    init_logging();
    let mut table = ClassTable::new();
    let drawable = table.define_type(
        "Drawable",
        TypeShape {
            is_interface: true,
            ..TypeShape::default()
        },
    );
    let view = table.define_type(
        "View",
        TypeShape {
            interfaces: vec![drawable],
            ..TypeShape::default()
        },
    );
    let subclass = |table: &mut ClassTable, name: &str, is_final: bool| {
        table.define_type(
            name,
            TypeShape {
                superclass: Some(view),
                is_final,
                ..TypeShape::default()
            },
        )
    };
    let label = subclass(&mut table, "Label", true);
    let button = subclass(&mut table, "Button", false);
    let hidden = subclass(&mut table, "Hidden", false);

    let drawable_draw = table.define_method(drawable, "draw", false, true).unwrap();
    let view_draw = table.define_method(view, "draw", false, false).unwrap();
    let render = table.define_method(view, "render", false, false).unwrap();
    let label_draw = table.define_method(label, "draw", false, false).unwrap();
    let button_draw = table.define_method(button, "draw", false, false).unwrap();
    table.define_method(hidden, "draw", false, false).unwrap();

    let unit = table.add_unit();
    for ty in [view, label, button] {
        table.reference_type(unit, ty).unwrap();
    }
    let view_draw_idx = table.reference_method(unit, view_draw).unwrap();
    let label_draw_idx = table.reference_method(unit, label_draw).unwrap();
    let drawable_draw_idx = table.reference_method(unit, drawable_draw).unwrap();
    table.reference_method(unit, button_draw).unwrap();

    Widgets {
        metadata: MetadataHandshake::new(table),
        owner: CompiledMethod {
            unit,
            method: render,
            declaring_type: view,
        },
        view,
        label,
        button,
        hidden,
        view_draw: view_draw_idx,
        label_draw: label_draw_idx,
        drawable_draw: drawable_draw_idx,
    }
}

/// Call sites of `View::render`.
pub struct RenderSites {
    pub on_label: InstrId,
    pub on_view: InstrId,
    pub on_drawable: InstrId,
}

/// `View::render(label: Label, view: View, drawable: Drawable)` calling `draw` on each
/// argument at pcs 10, 20 and 30.
pub fn render_method(widgets: &Widgets) -> (Graph, RenderSites) {
    let mut graph = Graph::new(Some(widgets.owner));
    let bb = graph.add_block();
    let param = |graph: &mut Graph, index: u32, info: Option<ReferenceTypeInfo>| {
        let mut instr =
            Instruction::new(InstrKind::Parameter { index }, ValueType::Reference, 0);
        instr.type_info = info;
        graph.append(bb, instr).unwrap()
    };
    let label = param(
        &mut graph,
        0,
        Some(ReferenceTypeInfo {
            ty: widgets.label,
            is_exact: false,
        }),
    );
    let view = param(&mut graph, 1, None);
    let drawable = param(&mut graph, 2, None);

    let on_label = graph
        .append(
            bb,
            Instruction::invoke(Invoke::virtual_call(widgets.label_draw, label, Vec::new()), 10),
        )
        .unwrap();
    let on_view = graph
        .append(
            bb,
            Instruction::invoke(Invoke::virtual_call(widgets.view_draw, view, Vec::new()), 20),
        )
        .unwrap();
    let on_drawable = graph
        .append(
            bb,
            Instruction::invoke(
                Invoke::interface_call(widgets.drawable_draw, drawable, Vec::new()),
                30,
            ),
        )
        .unwrap();
    graph
        .append(
            bb,
            Instruction::new(InstrKind::Return { value: None }, ValueType::Void, 40),
        )
        .unwrap();
    (
        graph,
        RenderSites {
            on_label,
            on_view,
            on_drawable,
        },
    )
}

/// Receiver types keyed by call-site pc.
#[derive(Default)]
pub struct ProfileByPc(pub HashMap<u32, Vec<TypeId>>);

impl ProfileByPc {
    pub fn with(mut self, pc: u32, types: Vec<TypeId>) -> Self {
        self.0.insert(pc, types);
        self
    }
}

impl ProfileSource for ProfileByPc {
    fn types_for(&self, query: &ProfileQuery, _caller: MethodId) -> Vec<TypeId> {
        self.0.get(&query.pc).cloned().unwrap_or_default()
    }
}

#[allow(dead_code)]
pub fn guard_count(graph: &Graph) -> usize {
    graph
        .scheduled_instructions()
        .filter(|(_, instr)| matches!(instr.kind, InstrKind::DevirtGuard { .. }))
        .count()
}
