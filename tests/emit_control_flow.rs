// Emission tests for the structured control-flow lowerings: conditionals become a
// JmpTrue/Jmp pair with backpatched forward targets, loops become a pre-loop skip
// check plus a single conditional backward jump, and both leave identical register
// state behind on every path.

mod common;

use common::{check_register_discipline, find_all, init_logging, interpret};
use tenvm::{
    emit_model, Attrs, Dtype, EmitOptions, Model, OpKind, Opcode, Operand, Program, Tensor,
    ValueId, PENDING_TARGET,
};

fn emit(model: &Model) -> Program {
    emit_model(model, &EmitOptions::default()).expect("emission failed")
}

fn int_constant(model: &mut Model, g: tenvm::GraphId, name: &str, value: i64) -> ValueId {
    let out = model.add_temp(g, name);
    model.add_node(
        g,
        OpKind::Constant,
        format!("const_{name}"),
        vec![],
        vec![out],
        Attrs { tensor: Some(Tensor::from_ints(Dtype::Int64, vec![], &[value])), ..Attrs::default() },
    );
    out
}

/// y = select ? -x : x
fn conditional_model() -> Model {
    let mut model = Model::new("main");
    let g = model.root();
    let sel = model.add_input(g, "sel");
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");

    let then_g = model.add_graph("then");
    let tx = model.add_input(then_g, "tx");
    let ty = model.add_output(then_g, "ty");
    model.add_node(then_g, OpKind::Neg, "then_neg", vec![tx], vec![ty], Attrs::default());

    let else_g = model.add_graph("else");
    let ex = model.add_input(else_g, "ex");
    let ey = model.add_output(else_g, "ey");
    model.add_node(else_g, OpKind::Identity, "else_id", vec![ex], vec![ey], Attrs::default());

    model.add_construct(g, OpKind::If, "if0", vec![sel, x], vec![y], vec![then_g, else_g], Attrs::default());
    model
}

#[test]
fn test_conditional_takes_both_arms() {
    init_logging();
    let prog = emit(&conditional_model());
    check_register_discipline(&prog);
    assert_eq!(interpret(&prog, &[("sel", 1), ("x", 6)]).output("y").as_int(), -6);
    assert_eq!(interpret(&prog, &[("sel", 0), ("x", 6)]).output("y").as_int(), 6);
}

#[test]
fn test_conditional_jump_structure() {
    let prog = emit(&conditional_model());

    let branch = find_all(&prog, Opcode::JmpTrue);
    let done = find_all(&prog, Opcode::Jmp);
    assert_eq!(branch.len(), 1);
    assert_eq!(done.len(), 1);

    // JmpTrue lands just past the Jmp that ends the else-block; the Jmp
    // lands past the whole construct. No pending sentinel survives.
    let then_start = match prog.insts()[branch[0]].operands[1] {
        Operand::Int(t) => t,
        ref other => panic!("unexpected operand {other:?}"),
    };
    let after = match prog.insts()[done[0]].operands[0] {
        Operand::Int(t) => t,
        ref other => panic!("unexpected operand {other:?}"),
    };
    assert_ne!(then_start, PENDING_TARGET);
    assert_ne!(after, PENDING_TARGET);
    assert_eq!(then_start, done[0] as i64 + 1);
    assert!(after > then_start);
}

#[test]
fn test_conditional_null_branch_output_becomes_null_constant() {
    let mut model = Model::new("main");
    let g = model.root();
    let sel = model.add_input(g, "sel");
    let x = model.add_input(g, "x");
    let y0 = model.add_output(g, "y0");
    let y1 = model.add_output(g, "y1");

    let then_g = model.add_graph("then");
    let tx = model.add_input(then_g, "tx");
    let ta = model.add_output(then_g, "ta");
    let tb = model.add_output(then_g, "tb");
    model.add_node(then_g, OpKind::Neg, "then_neg", vec![tx], vec![ta], Attrs::default());
    model.add_node(then_g, OpKind::Identity, "then_id", vec![tx], vec![tb], Attrs::default());

    // The else-arm yields a value for the first slot and nothing for the
    // second.
    let else_g = model.add_graph("else");
    let ex = model.add_input(else_g, "ex");
    let ea = model.add_output(else_g, "ea");
    model.add_value(else_g, "", tenvm::ValueKind::Output);
    model.add_node(else_g, OpKind::Identity, "else_id", vec![ex], vec![ea], Attrs::default());

    model.add_construct(
        g,
        OpKind::If,
        "if0",
        vec![sel, x],
        vec![y0, y1],
        vec![then_g, else_g],
        Attrs::default(),
    );

    let prog = emit(&model);
    check_register_discipline(&prog);

    // Exactly one NullConstant, inside the else-block.
    let nulls = find_all(&prog, Opcode::NullConstant);
    assert_eq!(nulls.len(), 1);
    let branch_at = find_all(&prog, Opcode::JmpTrue)[0];
    let done_at = find_all(&prog, Opcode::Jmp)[0];
    assert!(branch_at < nulls[0] && nulls[0] < done_at);

    // The then-path binds both outputs; the else-path leaves the second null.
    let run = interpret(&prog, &[("sel", 1), ("x", 5)]);
    assert_eq!(run.output("y0").as_int(), -5);
    assert_eq!(run.output("y1").as_int(), 5);
    let run = interpret(&prog, &[("sel", 0), ("x", 5)]);
    assert_eq!(run.output("y0").as_int(), 5);
    assert_eq!(run.output("y1"), &common::Cell::Null);
}

/// Sums the iteration counter: with a trip count of n the final state is
/// 0 + 1 + ... + (n-1).
fn trip_count_loop(trip: i64) -> Model {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let trip = int_constant(&mut model, g, "trip", trip);
    let no_terminal = model.add_null(g);

    let body = model.add_graph("body");
    let iter = model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    let st = model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    let st_out = model.add_output(body, "st_out");
    model.add_node(
        body,
        OpKind::Constant,
        "always",
        vec![],
        vec![cond_out],
        Attrs { tensor: Some(Tensor::from_ints(Dtype::Bool, vec![], &[1])), ..Attrs::default() },
    );
    model.add_node(body, OpKind::Add, "acc", vec![st, iter], vec![st_out], Attrs::default());

    model.add_construct(g, OpKind::Loop, "loop0", vec![trip, no_terminal, x], vec![y], vec![body], Attrs::default());
    model
}

#[test]
fn test_loop_runs_trip_count_times() {
    init_logging();
    let prog = emit(&trip_count_loop(5));
    check_register_discipline(&prog);
    assert_eq!(interpret(&prog, &[("x", 0)]).output("y").as_int(), 10);
    assert_eq!(interpret(&prog, &[("x", 100)]).output("y").as_int(), 110);
}

#[test]
fn test_zero_trip_count_skips_the_body() {
    let prog = emit(&trip_count_loop(0));
    check_register_discipline(&prog);
    // The initial state passes through untouched.
    assert_eq!(interpret(&prog, &[("x", 42)]).output("y").as_int(), 42);
}

#[test]
fn test_loop_has_one_backward_jump() {
    let prog = emit(&trip_count_loop(3));

    let back = find_all(&prog, Opcode::JmpTrue);
    assert_eq!(back.len(), 1);
    let target = match prog.insts()[back[0]].operands[1] {
        Operand::Int(t) => t,
        ref other => panic!("unexpected operand {other:?}"),
    };
    assert!((target as usize) < back[0], "loop jump must go backward");

    // The skip check jumps forward past the loop.
    let skip = find_all(&prog, Opcode::JmpFalse);
    assert_eq!(skip.len(), 1);
    let skip_target = match prog.insts()[skip[0]].operands[1] {
        Operand::Int(t) => t,
        ref other => panic!("unexpected operand {other:?}"),
    };
    assert!(skip_target as usize > back[0]);
}

#[test]
fn test_loop_with_terminal_condition() {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let no_trip = model.add_null(g);
    let terminal = int_constant(&mut model, g, "go", 1);

    // Body keeps running while iter < 3, bumping the state by one each time.
    let body = model.add_graph("body");
    let iter = model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    let st = model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    let st_out = model.add_output(body, "st_out");
    let three = int_constant(&mut model, body, "three", 3);
    let one = int_constant(&mut model, body, "one", 1);
    model.add_node(body, OpKind::Greater, "below", vec![three, iter], vec![cond_out], Attrs::default());
    model.add_node(body, OpKind::Add, "bump", vec![st, one], vec![st_out], Attrs::default());

    model.add_construct(g, OpKind::Loop, "loop0", vec![no_trip, terminal, x], vec![y], vec![body], Attrs::default());

    let prog = emit(&model);
    check_register_discipline(&prog);
    // Iterations run for iter = 0..=3; the condition computed at iter=3 ends
    // the loop, so the body executes four times.
    assert_eq!(interpret(&prog, &[("x", 0)]).output("y").as_int(), 4);
}

/// Both control inputs bound: trip count 5 and a terminal condition, with a
/// body condition that keeps running while the state stays below `limit`.
/// Whichever control refutes first ends the loop.
fn both_controls_loop(limit: i64) -> Model {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let trip = int_constant(&mut model, g, "trip", 5);
    let terminal = int_constant(&mut model, g, "go", 1);

    let body = model.add_graph("body");
    model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    let st = model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    let st_out = model.add_output(body, "st_out");
    let one = int_constant(&mut model, body, "one", 1);
    let limit = int_constant(&mut model, body, "limit", limit);
    model.add_node(body, OpKind::Add, "bump", vec![st, one], vec![st_out], Attrs::default());
    model.add_node(body, OpKind::Greater, "below", vec![limit, st_out], vec![cond_out], Attrs::default());

    model.add_construct(g, OpKind::Loop, "loop0", vec![trip, terminal, x], vec![y], vec![body], Attrs::default());
    model
}

#[test]
fn test_loop_with_both_controls_trip_bound() {
    // The body condition never refutes; the trip count ends the loop.
    let prog = emit(&both_controls_loop(100));
    check_register_discipline(&prog);
    assert_eq!(interpret(&prog, &[("x", 0)]).output("y").as_int(), 5);
}

#[test]
fn test_loop_with_both_controls_condition_bound() {
    // The body condition refutes at state 2, well before the trip count.
    let prog = emit(&both_controls_loop(2));
    check_register_discipline(&prog);
    assert_eq!(interpret(&prog, &[("x", 0)]).output("y").as_int(), 2);
}

#[test]
fn test_null_loop_state_result_becomes_null_constant() {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let trip = int_constant(&mut model, g, "trip", 2);
    let no_terminal = model.add_null(g);

    // The body never yields a next-state value for its one state slot.
    let body = model.add_graph("body");
    model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    model.add_value(body, "", tenvm::ValueKind::Output);
    model.add_node(
        body,
        OpKind::Constant,
        "always",
        vec![],
        vec![cond_out],
        Attrs { tensor: Some(Tensor::from_ints(Dtype::Bool, vec![], &[1])), ..Attrs::default() },
    );

    model.add_construct(g, OpKind::Loop, "loop0", vec![trip, no_terminal, x], vec![y], vec![body], Attrs::default());

    let prog = emit(&model);
    check_register_discipline(&prog);
    assert_eq!(find_all(&prog, Opcode::NullConstant).len(), 1);
    // Once the body runs, the state degrades to null and stays null.
    assert_eq!(interpret(&prog, &[("x", 9)]).output("y"), &common::Cell::Null);
}

#[test]
fn test_loop_scan_outputs_are_stacked() {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let ys = model.add_output(g, "ys");
    let trip = int_constant(&mut model, g, "trip", 3);
    let no_terminal = model.add_null(g);

    let body = model.add_graph("body");
    let iter = model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    let st = model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    let st_out = model.add_output(body, "st_out");
    let scan_out = model.add_output(body, "scan_out");
    model.add_node(
        body,
        OpKind::Constant,
        "always",
        vec![],
        vec![cond_out],
        Attrs { tensor: Some(Tensor::from_ints(Dtype::Bool, vec![], &[1])), ..Attrs::default() },
    );
    model.add_node(body, OpKind::Add, "acc", vec![st, iter], vec![st_out], Attrs::default());
    model.add_node(body, OpKind::Identity, "scan", vec![iter], vec![scan_out], Attrs::default());

    model.add_construct(
        g,
        OpKind::Loop,
        "loop0",
        vec![trip, no_terminal, x],
        vec![y, ys],
        vec![body],
        Attrs::default(),
    );

    let prog = emit(&model);
    check_register_discipline(&prog);
    assert_eq!(find_all(&prog, Opcode::SequenceStack).len(), 1);

    let run = interpret(&prog, &[("x", 0)]);
    assert_eq!(run.output("y").as_int(), 3);
    let scans: Vec<i64> = run.output("ys").as_seq().iter().map(|c| c.as_int()).collect();
    assert_eq!(scans, vec![0, 1, 2]);
}

#[test]
fn test_unbounded_loop_is_rejected() {
    let mut model = Model::new("main");
    let g = model.root();
    let x = model.add_input(g, "x");
    let y = model.add_output(g, "y");
    let no_trip = model.add_null(g);
    let no_terminal = model.add_null(g);

    let body = model.add_graph("body");
    model.add_input(body, "iter");
    model.add_input(body, "keep_going");
    let st = model.add_input(body, "st");
    let cond_out = model.add_output(body, "cond_out");
    let st_out = model.add_output(body, "st_out");
    model.add_node(
        body,
        OpKind::Constant,
        "always",
        vec![],
        vec![cond_out],
        Attrs { tensor: Some(Tensor::from_ints(Dtype::Bool, vec![], &[1])), ..Attrs::default() },
    );
    model.add_node(body, OpKind::Identity, "keep", vec![st], vec![st_out], Attrs::default());

    model.add_construct(g, OpKind::Loop, "loop0", vec![no_trip, no_terminal, x], vec![y], vec![body], Attrs::default());

    let err = emit_model(&model, &EmitOptions::default()).unwrap_err();
    assert!(matches!(err, tenvm::EmitError::StructuralViolation { .. }), "{err}");
}
