//! Rewrites must not change what a program observably does

use kindflow_core::ir::BinOp;
use kindflow_core::prelude::*;

fn rewritten(program: &Program) -> (Program, PipelineReport) {
    let mut out = program.clone();
    let report = Unboxer::default().run(&mut out).unwrap();
    (out, report)
}

fn binary(op: BinOp, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Rvalue {
    Rvalue::Binary {
        op,
        lhs: lhs.into(),
        rhs: rhs.into(),
    }
}

fn less(lhs: LocalId, rhs: LocalId) -> Rvalue {
    Rvalue::Compare {
        op: CmpOp::Lt,
        lhs: Operand::Local(lhs),
        rhs: Operand::Local(rhs),
    }
}

#[test]
fn test_presence_flag_tracks_null_on_every_step() {
    let mut builder = ProgramBuilder::new();
    let counter = builder.field("counter", Ty::Int);
    let seen = builder.field("seen", Ty::Int);
    let g = builder.field("g", Ty::Boxed(Kind::Unknown));
    builder.function("step", |f| {
        let n = f.local("n", Ty::Int);
        let parity = f.local("parity", Ty::Int);
        let even = f.local("even", Ty::Bool);
        let wide = f.local("wide", Ty::Long);
        let x = f.local("x", Ty::Boxed(Kind::Unknown));
        f.assign(n, Rvalue::read(counter));
        f.assign(parity, binary(BinOp::Rem, n, Operand::int(2)));
        f.assign(
            even,
            Rvalue::Compare {
                op: CmpOp::Eq,
                lhs: Operand::Local(parity),
                rhs: Operand::int(0),
            },
        );
        f.if_else(
            Rvalue::Use(Operand::Local(even)),
            |f| {
                f.assign(wide, Rvalue::Cast(Ty::Long, Operand::Local(n)));
                f.assign(x, Rvalue::new_box(Kind::Long, vec![Operand::Local(wide)]));
                f.assign(g, x);
            },
            |f| f.assign(g, Rvalue::null()),
        );
        f.assign(counter, binary(BinOp::Add, n, Operand::int(1)));
    });
    builder.function("observe", |f| {
        let t = f.local("t", Ty::Boxed(Kind::Unknown));
        let s = f.local("s", Ty::Int);
        f.assign(t, Rvalue::read(g));
        f.if_then(Rvalue::is_not_null(t), |f| {
            f.assign(s, Rvalue::read(seen));
            f.assign(seen, binary(BinOp::Add, s, Operand::int(1)));
        });
    });
    let program = builder.build();
    let (unboxed, report) = rewritten(&program);
    assert_eq!(report.total_replaced(), 3);

    let mut boxed_run = Interpreter::new(&program);
    let mut flat_run = Interpreter::new(&unboxed);
    for _ in 0..5 {
        for interp in [&mut boxed_run, &mut flat_run] {
            interp.call("step").unwrap();
            interp.call("observe").unwrap();
        }
        let was_null = boxed_run.field(g).is_null();
        assert_eq!(flat_run.field_named("g_present"), Some(&Value::Bool(!was_null)));
        if let Some(payload) = boxed_run.field(g).slot("value") {
            assert_eq!(flat_run.field_named("g_value"), Some(&payload));
        }
        assert_eq!(boxed_run.field(seen), flat_run.field(seen));
    }
    assert_eq!(flat_run.field(seen), &Value::Int(3));
}

#[test]
fn test_null_store_through_cast_clears_presence() {
    let mut builder = ProgramBuilder::new();
    let out = builder.field("out", Ty::Bool);
    builder.function("fire", |f| {
        let x = f.local("x", Ty::Boxed(Kind::Unknown));
        f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(1)]));
        f.assign(x, Rvalue::Cast(Ty::Boxed(Kind::Unknown), Operand::Null));
        f.assign(out, Rvalue::is_null(x));
    });
    let program = builder.build();
    let (unboxed, report) = rewritten(&program);
    assert_eq!(report.total_replaced(), 1);

    let fire = unboxed.function(unboxed.function_named("fire").unwrap());
    let x = LocalId(0);
    assert!(fire.local(x).retired);
    assert!(!fire.body.iter().any(|stmt| matches!(stmt, Stmt::Assign { dst: Place::Local(dst), .. } if *dst == x)));

    let mut boxed_run = Interpreter::new(&program);
    boxed_run.call("fire").unwrap();
    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fire").unwrap();
    assert_eq!(boxed_run.field(out), &Value::Bool(true));
    assert_eq!(flat_run.field(out), boxed_run.field(out));
    assert_eq!(flat_run.field(out), &Value::Bool(true));
}

#[test]
fn test_replacement_arrays_keep_allocation_length() {
    let mut builder = ProgramBuilder::new();
    let arr = builder.field("arr", Ty::array(Ty::Boxed(Kind::Unknown)));
    let count = builder.field("count", Ty::Int);
    builder.function("fill", |f| {
        let n = f.local("n", Ty::Int);
        let i = f.local("i", Ty::Int);
        let d = f.local("d", Ty::Double);
        let a = f.local("a", Ty::array(Ty::Boxed(Kind::Unknown)));
        f.assign(n, binary(BinOp::Add, Operand::int(3), Operand::int(4)));
        f.assign(
            a,
            Rvalue::NewArray {
                elem: Ty::Boxed(Kind::Unknown),
                len: Operand::Local(n),
            },
        );
        f.assign(i, Operand::int(0));
        f.while_loop(less(i, n), |f| {
            f.assign(d, Rvalue::Cast(Ty::Double, Operand::Local(i)));
            f.assign(Place::index(a, i), Rvalue::new_box(Kind::Double, vec![Operand::Local(d)]));
            f.assign(i, binary(BinOp::Add, i, Operand::int(1)));
        });
        f.assign(count, Rvalue::Length(a));
        f.assign(arr, a);
    });
    let program = builder.build();
    let (unboxed, _) = rewritten(&program);

    let mut boxed_run = Interpreter::new(&program);
    boxed_run.call("fill").unwrap();
    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fill").unwrap();

    let original = boxed_run.field(arr);
    assert_eq!(original.array_len(), Some(7));
    assert_eq!(flat_run.field(count), &Value::Int(7));
    for name in ["arr_present", "arr_value"] {
        assert_eq!(flat_run.field_named(name).and_then(Value::array_len), Some(7));
    }
    let values = flat_run.field_named("arr_value").unwrap();
    for i in 0..7 {
        let boxed = original.element(i).unwrap();
        assert_eq!(boxed.slot("value"), values.element(i));
    }
}

#[test]
fn test_arraycopy_moves_presence_and_payload() {
    let mut builder = ProgramBuilder::new();
    let out = builder.field("out", Ty::array(Ty::Boxed(Kind::Unknown)));
    builder.function("fire", |f| {
        let a = f.local("a", Ty::array(Ty::Boxed(Kind::Unknown)));
        let b = f.local("b", Ty::array(Ty::Boxed(Kind::Unknown)));
        for local in [a, b] {
            f.assign(
                local,
                Rvalue::NewArray {
                    elem: Ty::Boxed(Kind::Unknown),
                    len: Operand::int(3),
                },
            );
        }
        f.assign(Place::index(a, Operand::int(0)), Rvalue::new_box(Kind::Int, vec![Operand::int(10)]));
        f.assign(Place::index(a, Operand::int(1)), Rvalue::new_box(Kind::Int, vec![Operand::int(11)]));
        f.call(Call::arraycopy(a, Operand::int(0), b, Operand::int(1), Operand::int(2)));
        f.assign(out, b);
    });
    let program = builder.build();
    let (unboxed, report) = rewritten(&program);
    assert_eq!(report.total_replaced(), 3);

    let mut boxed_run = Interpreter::new(&program);
    boxed_run.call("fire").unwrap();
    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fire").unwrap();

    let original = boxed_run.field(out);
    let present = flat_run.field_named("out_present").unwrap();
    let values = flat_run.field_named("out_value").unwrap();
    for i in 0..3 {
        let boxed = original.element(i).unwrap();
        assert_eq!(present.element(i), Some(Value::Bool(!boxed.is_null())));
        if !boxed.is_null() {
            assert_eq!(boxed.slot("value"), values.element(i));
        }
    }
    assert_eq!(values.element(2), Some(Value::Int(11)));
}

#[test]
fn test_complex_boxes_split_into_two_slots() {
    let mut builder = ProgramBuilder::new();
    let z = builder.field("z", Ty::Boxed(Kind::Unknown));
    let re = builder.field("re", Ty::Double);
    builder.function("fire", |f| {
        let x = f.local("x", Ty::Boxed(Kind::Unknown));
        let r = f.local("r", Ty::Double);
        f.assign(
            x,
            Rvalue::new_box(Kind::Complex, vec![Operand::double(1.5), Operand::double(-2.0)]),
        );
        f.assign(r, Rvalue::read(Place::slot(x, "real")));
        f.assign(re, r);
        f.assign(z, x);
    });
    let program = builder.build();
    let (unboxed, _) = rewritten(&program);

    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fire").unwrap();
    assert_eq!(flat_run.field(re), &Value::Double(1.5));
    assert_eq!(flat_run.field_named("z_real"), Some(&Value::Double(1.5)));
    assert_eq!(flat_run.field_named("z_imag"), Some(&Value::Double(-2.0)));
    assert_eq!(flat_run.field_named("z_present"), Some(&Value::Bool(true)));
}

#[test]
fn test_nested_array_box_unboxes_both_layers() {
    let mut builder = ProgramBuilder::new();
    let f_id = builder.field("f", Ty::Boxed(Kind::Unknown));
    builder.function("fire", |f| {
        let inner = f.local("inner", Ty::array(Ty::Boxed(Kind::Unknown)));
        let x = f.local("x", Ty::Boxed(Kind::Unknown));
        f.assign(
            inner,
            Rvalue::NewArray {
                elem: Ty::Boxed(Kind::Unknown),
                len: Operand::int(2),
            },
        );
        f.assign(Place::index(inner, Operand::int(0)), Rvalue::new_box(Kind::Int, vec![Operand::int(3)]));
        f.assign(Place::index(inner, Operand::int(1)), Rvalue::new_box(Kind::Int, vec![Operand::int(4)]));
        f.assign(x, Rvalue::new_box(Kind::array(Kind::Int), vec![Operand::Local(inner)]));
        f.assign(f_id, x);
    });
    let program = builder.build();
    let (unboxed, report) = rewritten(&program);

    let depths: Vec<usize> = report.depths.iter().map(|depth| depth.depth).collect();
    assert_eq!(depths, vec![2, 1]);
    assert_eq!(report.depths[0].replaced, 2);
    assert_eq!(report.depths[1].replaced, 3);

    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fire").unwrap();
    assert_eq!(flat_run.field_named("f_present"), Some(&Value::Bool(true)));
    assert_eq!(
        flat_run.field_named("f_value_present"),
        Some(&Value::array(vec![Value::Bool(true), Value::Bool(true)]))
    );
    assert_eq!(
        flat_run.field_named("f_value_value"),
        Some(&Value::array(vec![Value::Int(3), Value::Int(4)]))
    );
}

#[test]
fn test_escaping_box_is_left_untouched() {
    let mut builder = ProgramBuilder::new();
    let output = builder.quantity("output", Kind::Int);
    builder.function("fire", |f| {
        let out = f.local("out", Ty::Handle);
        let x = f.local("x", Ty::Boxed(Kind::Unknown));
        f.assign(out, Rvalue::Quantity(output));
        f.assign(x, Rvalue::new_box(Kind::Int, vec![Operand::int(8)]));
        f.call(Call::method(out, "send", vec![Operand::int(0), Operand::Local(x)]));
    });
    let program = builder.build();
    let (unboxed, report) = rewritten(&program);

    assert_eq!(report.total_replaced(), 0);
    assert_eq!(unboxed, program);

    let mut flat_run = Interpreter::new(&unboxed);
    flat_run.call("fire").unwrap();
    let sent: Vec<&Value> = flat_run.pending(output).collect();
    assert_eq!(sent, vec![&Value::boxed(Kind::Int, Value::Int(8))]);
}
