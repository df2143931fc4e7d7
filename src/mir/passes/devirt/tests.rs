use expect_test::expect;

use super::*;
use crate::config::DevirtConfig;
use crate::metadata::{
    ClassTable, MetadataHandshake, MethodId, MethodIndex, TypeId, TypeShape,
};
use crate::mir::passes::speculation::SpeculationPass;
use crate::mir::{
    CallKind, CompiledMethod, FrameState, InstrKind, Instruction, Invoke, MethodLoadKind,
    ReferenceTypeInfo, ValueType, format_graph, verify_graph,
};
use crate::profile::{NoProfile, ProfileQuery, ProfileSource};

struct World {
    metadata: MetadataHandshake<ClassTable>,
    owner: CompiledMethod,
    base: TypeId,
    circle: TypeId,
    square: TypeId,
    hidden: TypeId,
    triangle: TypeId,
    unrelated: TypeId,
    base_area: MethodIndex,
    circle_area: MethodIndex,
    shape_area: MethodIndex,
    unresolved_run: MethodIndex,
}

fn class(table: &mut ClassTable, name: &str, superclass: Option<TypeId>, is_final: bool) -> TypeId {
    table.define_type(
        name,
        TypeShape {
            superclass,
            is_final,
            ..TypeShape::default()
        },
    )
}

fn world() -> World {
    let mut table = ClassTable::new();
    let shape = table.define_type(
        "Shape",
        TypeShape {
            is_interface: true,
            ..TypeShape::default()
        },
    );
    let base = table.define_type(
        "Base",
        TypeShape {
            interfaces: vec![shape],
            ..TypeShape::default()
        },
    );
    let circle = class(&mut table, "Circle", Some(base), true);
    let square = class(&mut table, "Square", Some(base), false);
    let hidden = class(&mut table, "Hidden", Some(base), false);
    let triangle = class(&mut table, "Triangle", Some(base), false);
    let unrelated = class(&mut table, "Unrelated", None, false);

    let shape_area = table.define_method(shape, "area", false, true).unwrap();
    let base_area = table.define_method(base, "area", false, false).unwrap();
    let base_run = table.define_method(base, "run", false, false).unwrap();
    let circle_area = table.define_method(circle, "area", false, false).unwrap();
    let square_area = table.define_method(square, "area", false, false).unwrap();
    table.define_method(hidden, "area", false, false).unwrap();
    table.define_method(triangle, "area", false, false).unwrap();
    table.define_method(unrelated, "area", false, false).unwrap();

    let unit = table.add_unit();
    for ty in [base, circle, square, triangle, unrelated] {
        table.reference_type(unit, ty).unwrap();
    }
    let base_area_idx = table.reference_method(unit, base_area).unwrap();
    let circle_area_idx = table.reference_method(unit, circle_area).unwrap();
    let shape_area_idx = table.reference_method(unit, shape_area).unwrap();
    table.reference_method(unit, square_area).unwrap();
    let unresolved_run = table.reference_unresolved_method(unit, base_run).unwrap();

    World {
        metadata: MetadataHandshake::new(table),
        owner: CompiledMethod {
            unit,
            method: base_run,
            declaring_type: base,
        },
        base,
        circle,
        square,
        hidden,
        triangle,
        unrelated,
        base_area: base_area_idx,
        circle_area: circle_area_idx,
        shape_area: shape_area_idx,
        unresolved_run,
    }
}

struct Observed(Vec<TypeId>);

impl ProfileSource for Observed {
    fn types_for(&self, _query: &ProfileQuery, _caller: MethodId) -> Vec<TypeId> {
        self.0.clone()
    }
}

struct Site {
    kind: CallKind,
    method: MethodIndex,
    receiver: Option<ReferenceTypeInfo>,
    null_check: bool,
    args: usize,
}

impl Site {
    fn virtual_call(method: MethodIndex) -> Self {
        Self {
            kind: CallKind::Virtual,
            method,
            receiver: None,
            null_check: false,
            args: 1,
        }
    }

    fn interface_call(method: MethodIndex) -> Self {
        Self {
            kind: CallKind::Interface,
            ..Self::virtual_call(method)
        }
    }

    fn receiver(mut self, ty: TypeId, is_exact: bool) -> Self {
        self.receiver = Some(ReferenceTypeInfo { ty, is_exact });
        self
    }

    fn null_checked(mut self) -> Self {
        self.null_check = true;
        self
    }

    fn args(mut self, args: usize) -> Self {
        self.args = args;
        self
    }

    fn build(self, world: &World) -> (Graph, InstrId) {
        let mut graph = Graph::new(Some(world.owner));
        let bb = graph.add_block();
        let mut param =
            Instruction::new(InstrKind::Parameter { index: 0 }, ValueType::Reference, 0);
        if let Some(info) = self.receiver {
            param = param.with_type_info(info);
        }
        let mut receiver = graph.append(bb, param).unwrap();
        if self.null_check {
            receiver = graph
                .append(
                    bb,
                    Instruction::new(
                        InstrKind::NullCheck { value: receiver },
                        ValueType::Reference,
                        1,
                    ),
                )
                .unwrap();
        }
        let args: Vec<_> = (0..self.args)
            .map(|value| {
                graph
                    .append(
                        bb,
                        Instruction::new(InstrKind::Constant(value as i64), ValueType::Int, 2),
                    )
                    .unwrap()
            })
            .collect();
        let mut values = vec![Some(receiver)];
        values.extend(args.iter().copied().map(Some));
        let call = Invoke {
            kind: self.kind,
            method: self.method,
            receiver: Some(receiver),
            args,
            current_method: None,
            result: ValueType::Reference,
            result_info: Some(ReferenceTypeInfo {
                ty: world.base,
                is_exact: false,
            }),
            intrinsic: None,
        };
        let site = graph
            .append(bb, Instruction::invoke(call, 5).with_env(FrameState { pc: 5, values }))
            .unwrap();
        graph
            .append(
                bb,
                Instruction::new(InstrKind::Return { value: Some(site) }, ValueType::Void, 6),
            )
            .unwrap();
        (graph, site)
    }
}

fn predicted_types<M: MetadataAccess>(pass: &Devirtualization<'_, M>, site: InstrId) -> Vec<TypeId> {
    pass.prediction(site)
        .unwrap()
        .handles()
        .map(|handle| pass.handles().type_id(handle).unwrap())
        .collect()
}

#[test]
fn only_plain_virtual_and_interface_calls_are_candidates() {
    let world = world();
    let pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());

    let (graph, site) = Site::virtual_call(world.base_area).build(&world);
    assert!(pass.is_candidate(&graph, site));
    let (iface, iface_site) = Site::interface_call(world.shape_area).build(&world);
    assert!(pass.is_candidate(&iface, iface_site));

    let static_call = Site {
        kind: CallKind::Static,
        ..Site::virtual_call(world.base_area)
    };
    let (static_graph, static_site) = static_call.build(&world);
    assert!(!pass.is_candidate(&static_graph, static_site));

    let mut intrinsic = graph.clone();
    if let Some(InstrKind::Invoke(invoke)) =
        intrinsic.instruction_mut(site).map(|instr| &mut instr.kind)
    {
        invoke.intrinsic = Some("math.hypot".into());
    }
    assert!(!pass.is_candidate(&intrinsic, site));
    assert!(!pass.is_candidate(&graph, InstrId(1)), "constants are not calls");
}

#[test]
fn final_declaring_type_gives_precise_prediction() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.circle_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert!(pass.prediction(site).unwrap().is_precise());
    assert_eq!(predicted_types(&pass, site), vec![world.circle]);
    assert_eq!(pass.site_state(site), SiteState::Precise);
    assert_eq!(pass.cost(&graph, site), Ok(0));
    assert_eq!(pass.mispredict_rate(site), Ok(MispredictRate::new(0, 10)));
    assert_eq!(pass.recovery_policy(site), Ok(RecoveryPolicy::NotNeeded));
    assert_eq!(pass.needs_guard(site), Ok(false));
}

#[test]
fn exact_receiver_type_gives_precise_prediction() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area)
        .receiver(world.square, true)
        .build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(predicted_types(&pass, site), vec![world.square]);
}

#[test]
fn final_receiver_type_is_seen_through_null_check() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, site) = Site::interface_call(world.shape_area)
        .receiver(world.circle, false)
        .null_checked()
        .build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert!(pass.prediction(site).unwrap().is_precise());
    assert_eq!(predicted_types(&pass, site), vec![world.circle]);
}

#[test]
fn inexact_receiver_without_profile_is_excluded() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area)
        .receiver(world.square, false)
        .build(&world);

    assert!(!pass.has_prediction(&graph, site, true));
    assert_eq!(pass.site_state(site), SiteState::Excluded);
    assert!(pass.prediction(site).is_none());
    assert!(pass.handles().is_empty());
    assert_eq!(pass.cost(&graph, site), Err(DevirtError::NoPrediction { site }));
    assert!(!pass.has_prediction(&graph, site, true));
}

#[test]
fn unresolved_target_is_excluded() {
    let world = world();
    let profile = Observed(vec![world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.unresolved_run).build(&world);

    assert!(!pass.has_prediction(&graph, site, true));
    assert_eq!(pass.site_state(site), SiteState::Excluded);
}

#[test]
fn single_self_type_candidate_is_cheap_and_deopts() {
    let world = world();
    let profile = Observed(vec![world.base]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.site_state(site), SiteState::Imprecise(1));
    assert_eq!(pass.cost(&graph, site), Ok(3));
    assert_eq!(pass.mispredict_rate(site), Ok(MispredictRate::new(1, 10)));
    assert_eq!(pass.recovery_policy(site), Ok(RecoveryPolicy::Deopt));
    assert_eq!(pass.needs_guard(site), Ok(true));
}

#[test]
fn several_candidates_price_each_guard_and_keep_a_slow_path() {
    let world = world();
    let profile = Observed(vec![world.square, world.base, world.triangle]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(
        predicted_types(&pass, site),
        vec![world.square, world.base, world.triangle]
    );
    assert_eq!(pass.max_cost(), 6);
    assert_eq!(pass.cost(&graph, site), Ok(6 + 3 + 6));
    assert_eq!(pass.mispredict_rate(site), Ok(MispredictRate::new(2, 3)));
    assert_eq!(pass.recovery_policy(site), Ok(RecoveryPolicy::CodeVersioning));
}

#[test]
fn two_foreign_candidates_cost_a_full_guard_each() {
    let world = world();
    let profile = Observed(vec![world.square, world.triangle]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.site_state(site), SiteState::Imprecise(2));
    assert_eq!(pass.cost(&graph, site), Ok(2 * (4 + 2)));
    assert_eq!(pass.mispredict_rate(site), Ok(MispredictRate::new(1, 2)));
}

#[test]
fn oversized_cost_table_saturates_instead_of_overflowing() {
    let world = world();
    let config = DevirtConfig::from_yaml_str(
        "costs:\n  load_foreign_type: 18446744073709551615\n  load_self_type: 18446744073709551615\n  baseline_invoke_savings: 18446744073709551615\n",
        "devirt.yaml",
    )
    .unwrap();
    let profile = Observed(vec![world.square, world.base]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, config);
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.max_cost(), u64::MAX);
    assert_eq!(pass.cost(&graph, site), Ok(u64::MAX));
    assert_eq!(pass.profit(&graph, site), Ok(u64::MAX));
}

#[test]
fn repeated_and_unknown_profile_types_are_dropped() {
    let world = world();
    let profile = Observed(vec![world.square, TypeId(99), world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(predicted_types(&pass, site), vec![world.square]);
    assert_eq!(pass.recovery_policy(site), Ok(RecoveryPolicy::Deopt));
}

#[test]
fn profit_counts_receiver_arguments_and_return() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.circle_area).args(1).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.profit(&graph, site), Ok(5 + 2 + 1));
}

#[test]
fn query_without_update_leaves_cache_untouched() {
    let world = world();
    let profile = Observed(vec![world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, false));
    assert!(pass.has_prediction(&graph, site, false));
    assert!(pass.prediction(site).is_none());
    assert!(pass.handles().is_empty());
    assert_eq!(pass.site_state(site), SiteState::Unknown);

    assert!(pass.has_prediction(&graph, site, true));
    let recorded = pass.prediction(site).cloned();
    let handles = pass.handles().len();

    // Refining the receiver afterwards does not replace the cached prediction.
    graph.instruction_mut(InstrId(0)).unwrap().type_info = Some(ReferenceTypeInfo {
        ty: world.circle,
        is_exact: true,
    });
    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.prediction(site).cloned(), recorded);
    assert_eq!(pass.handles().len(), handles);
    assert_eq!(pass.site_state(site), SiteState::Imprecise(1));
}

#[test]
fn prediction_sameness_by_receiver_or_primary_type() {
    let world = world();
    let profile = Observed(vec![world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());

    let mut graph = Graph::new(Some(world.owner));
    let bb = graph.add_block();
    let first_receiver = graph
        .append(
            bb,
            Instruction::new(InstrKind::Parameter { index: 0 }, ValueType::Reference, 0),
        )
        .unwrap();
    let second_receiver = graph
        .append(
            bb,
            Instruction::new(InstrKind::Parameter { index: 1 }, ValueType::Reference, 0),
        )
        .unwrap();
    let mut call = |receiver, method, pc| {
        graph
            .append(
                bb,
                Instruction::invoke(Invoke::virtual_call(method, receiver, Vec::new()), pc),
            )
            .unwrap()
    };
    let a = call(first_receiver, world.base_area, 1);
    let b = call(first_receiver, world.base_area, 2);
    let c = call(second_receiver, world.base_area, 3);
    let d = call(second_receiver, world.circle_area, 4);

    for site in [a, b, c, d] {
        assert!(pass.has_prediction(&graph, site, true));
    }
    assert_eq!(pass.is_prediction_same(&graph, a, b), Ok(true));
    assert_eq!(pass.is_prediction_same(&graph, a, c), Ok(true));
    assert_eq!(pass.is_prediction_same(&graph, a, d), Ok(false));
    assert_eq!(
        pass.is_prediction_same(&graph, a, first_receiver),
        Err(DevirtError::NotCandidate {
            site: first_receiver
        })
    );
}

#[test]
fn guard_and_specialization_splice_in_order() {
    let world = world();
    let profile = Observed(vec![world.base, world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    let guard = pass.insert_guard(&mut graph, site, site).unwrap();
    assert_eq!(pass.site_state(site), SiteState::GuardInserted);
    assert!(matches!(
        graph.instruction(guard).unwrap().kind,
        InstrKind::DevirtGuard { .. }
    ));
    expect![[r#"
        method m2 of t1 (unit 0)
        bb0:
          i0 = param #0 : ref @0
          i1 = const 0 : int @2
          i4 = load_runtime_type i0 : ref pure @5
          i5 = load_type t#0 self : ref @5
          i6 = devirt_guard i5 == i4 : void @5
          i2 = invoke.virtual m#0 i0(i1) : ref [t1] @5 env@5(i0, i1)
          i3 = return i2 : void @6
    "#]]
    .assert_eq(&format_graph(&graph));

    let call = pass.handle_speculation(&mut graph, site, true).unwrap();
    assert_eq!(pass.site_state(site), SiteState::Specialized);
    expect![[r#"
        method m2 of t1 (unit 0)
        bb0:
          i7 = current_method : ref @0
          i0 = param #0 : ref @0
          i1 = const 0 : int @2
          i4 = load_runtime_type i0 : ref pure @5
          i5 = load_type t#0 self : ref @5
          i6 = devirt_guard i5 == i4 : void @5
          i8 = invoke.direct[virtual, via-current-method] m#0 i0(i1; i7) : ref [t1] @5 env@5(i0, i1)
          i3 = return i8 : void @6
    "#]]
    .assert_eq(&format_graph(&graph));
    assert_eq!(call, InstrId(8));
    assert_eq!(verify_graph(&graph), Ok(()));
    assert_eq!(pass.check_invariants(), Ok(()));
}

#[test]
fn unrepresentable_prediction_aborts_without_touching_the_graph() {
    let world = world();
    let profile = Observed(vec![world.hidden]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);
    assert!(pass.has_prediction(&graph, site, true));

    let snapshot = graph.clone();
    let err = pass.insert_guard(&mut graph, site, site).unwrap_err();
    assert_eq!(err, DevirtError::NotRepresentable { ty: world.hidden });
    assert_eq!(graph, snapshot);
    assert_eq!(pass.site_state(site), SiteState::Aborted);
}

#[test]
fn guarding_a_precise_site_is_rejected() {
    let world = world();
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.circle_area).build(&world);
    assert!(pass.has_prediction(&graph, site, true));

    let snapshot = graph.clone();
    let err = pass.insert_guard(&mut graph, site, site).unwrap_err();
    assert_eq!(err.label(), "invalid-transition");
    assert_eq!(graph, snapshot);
}

#[test]
fn precise_interface_call_becomes_direct_call_to_override() {
    let world = world();
    let config = DevirtConfig {
        method_load_kind: MethodLoadKind::Direct,
        ..DevirtConfig::default()
    };
    let mut pass = Devirtualization::new(&world.metadata, &NoProfile, config);
    let (mut graph, site) = Site::interface_call(world.shape_area)
        .receiver(world.circle, true)
        .build(&world);

    let speculation = pass.speculate(&mut graph, site, site);
    assert!(speculation.is_err(), "speculating needs a recorded prediction");
    assert!(pass.has_prediction(&graph, site, true));
    let speculation = pass.speculate(&mut graph, site, site).unwrap();
    assert_eq!(speculation.guard, None);
    assert_eq!(speculation.recovery, RecoveryPolicy::NotNeeded);

    let replacement = graph.instruction(speculation.call).unwrap();
    let invoke = replacement.kind.as_invoke().unwrap();
    assert_eq!(invoke.method, world.circle_area);
    assert_eq!(invoke.current_method, None);
    assert_eq!(invoke.receiver, Some(InstrId(0)));
    assert_eq!(invoke.args, vec![InstrId(1)]);
    assert_eq!(invoke.result_info.map(|info| info.ty), Some(world.base));
    assert_eq!(replacement.env.as_ref().map(|env| env.pc), Some(5));
    assert_eq!(graph.instruction(site).unwrap().block(), None);
    assert_eq!(
        graph.instruction(InstrId(3)).unwrap().kind.inputs(),
        vec![speculation.call]
    );
    assert_eq!(verify_graph(&graph), Ok(()));
}

#[test]
fn specialization_failure_rolls_back_the_guard() {
    let world = world();
    let profile = Observed(vec![world.triangle]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);
    assert!(pass.has_prediction(&graph, site, true));

    let snapshot = graph.clone();
    let err = pass.speculate(&mut graph, site, site).unwrap_err();
    assert_eq!(
        err,
        DevirtError::TargetNotNameable {
            method: "area".into()
        }
    );
    assert_eq!(graph, snapshot);
    assert_eq!(pass.site_state(site), SiteState::Aborted);
}

#[test]
fn unrelated_predicted_type_has_no_override() {
    let world = world();
    let profile = Observed(vec![world.unrelated]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);
    assert!(pass.has_prediction(&graph, site, true));

    let snapshot = graph.clone();
    let err = pass.speculate(&mut graph, site, site).unwrap_err();
    assert_eq!(err.label(), "missing-override");
    assert_eq!(graph, snapshot);
}

#[test]
fn metadata_scopes_are_closed_between_queries() {
    let world = world();
    let profile = Observed(vec![world.square]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (mut graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    pass.speculate(&mut graph, site, site).unwrap();
    assert_eq!(world.metadata.active_scopes(), 0);
    assert!(world.metadata.acquisitions() > 0);
}

#[test]
fn gate_requires_owner_and_enabled_config() {
    let world = world();
    let pass = Devirtualization::new(&world.metadata, &NoProfile, DevirtConfig::default());
    let (graph, _) = Site::virtual_call(world.base_area).build(&world);
    assert!(pass.gate(&graph));
    assert!(!pass.gate(&Graph::new(None)));

    let disabled = DevirtConfig {
        enabled: false,
        ..DevirtConfig::default()
    };
    let pass = Devirtualization::new(&world.metadata, &NoProfile, disabled);
    assert!(!pass.gate(&graph));
}

#[test]
fn finish_releases_every_handle() {
    let world = world();
    let profile = Observed(vec![world.square, world.base]);
    let mut pass = Devirtualization::new(&world.metadata, &profile, DevirtConfig::default());
    let (graph, site) = Site::virtual_call(world.base_area).build(&world);

    assert!(pass.has_prediction(&graph, site, true));
    assert_eq!(pass.handles().len(), 2);
    assert_eq!(pass.check_invariants(), Ok(()));
    assert_eq!(pass.finish().unwrap(), 2);
}
