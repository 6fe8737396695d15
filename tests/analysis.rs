//! End-to-end analysis runs over hand-built IR modules

use range_analysis::{
    ir::{BinaryAluOp, CastOp, CmpPredicate, FunctionBuilder, Module, Operand, ValueId},
    range::{self, Range},
    solver::{Config, RangeAnalysis},
};

/// foo(k) { while (k < 100) k = k + 1; return k; } in e-SSA form,
/// plus a caller passing the literal 0.
fn bounded_loop_module() -> Module {
    let mut module = Module::default();

    let mut fb = FunctionBuilder::new(&mut module, "main");
    fb.call("result", 32, "foo", vec![Operand::const_int(0, 32)]);
    fb.ret(None);
    fb.finish();

    let mut fb = FunctionBuilder::new(&mut module, "foo");
    let k0 = fb.int_param("k0", 32);
    let entry = fb.entry();
    let header = fb.block("header");
    let body = fb.block("body");
    let exit = fb.block("exit");
    fb.jump(header);
    fb.switch_to(header);
    // The back edge names the increment defined below, ids are sequential
    let k3_id = ValueId(k0.0 + 3);
    let k1 = fb.phi(
        "k1",
        32,
        vec![
            (Operand::Value(k0), entry),
            (Operand::Value(k3_id), body),
        ],
    );
    fb.cond_br(
        CmpPredicate::Slt,
        Operand::Value(k1),
        Operand::const_int(100, 32),
        body,
        exit,
    );
    fb.switch_to(body);
    let k2 = fb.sigma("k2", k1);
    let k3 = fb.binary(
        "k3",
        32,
        BinaryAluOp::Add,
        Operand::Value(k2),
        Operand::const_int(1, 32),
    );
    assert_eq!(k3, k3_id);
    fb.jump(header);
    fb.switch_to(exit);
    let k4 = fb.sigma("k4", k1);
    fb.ret(Some(Operand::Value(k4)));
    fb.finish();

    module
}

#[test]
fn test_bounded_counting_loop() {
    let module = bounded_loop_module();
    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.analyze_module(&module);

    let k1 = module.find_value("foo", "k1").unwrap();
    assert_eq!(analysis.get_range(k1), Range::new(0, 100));

    let k2 = module.find_value("foo", "k2").unwrap();
    assert_eq!(analysis.get_range(k2), Range::new(0, 99));

    let k4 = module.find_value("foo", "k4").unwrap();
    assert_eq!(analysis.get_range(k4), Range::constant(100));

    // The return value flows back to the caller
    let result = module.find_value("main", "result").unwrap();
    assert_eq!(analysis.get_range(result), Range::constant(100));

    assert!(analysis.stats().futures_resolved == 0);
    assert!(analysis.stats().widening_iterations > 0);
    assert!(analysis.stats().narrowing_iterations > 0);
}

#[test]
fn test_intraprocedural_loop_gates_body_value() {
    // Without the caller the parameter is unconstrained, so the header
    // value stays wide, but the loop-body value is still capped by the
    // branch.
    let module = bounded_loop_module();
    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.analyze_function(&module, "foo").unwrap();

    let k1 = module.find_value("foo", "k1").unwrap();
    assert!(analysis.get_range(k1).is_full_set());
    let k2 = module.find_value("foo", "k2").unwrap();
    assert_eq!(analysis.get_range(k2), Range::new(range::MIN, 99));
    let k4 = module.find_value("foo", "k4").unwrap();
    assert_eq!(analysis.get_range(k4), Range::new(100, range::MAX));
}

#[test]
fn test_narrow_parameter_keeps_its_width_bound() {
    // foo(char k) { if ((int)k <= 100) ... }: the gated value must show
    // the 8-bit domain bound, not a 32-bit one.
    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "foo");
    let k = fb.int_param("k", 8);
    let then_block = fb.block("then");
    let exit = fb.block("exit");
    let k32 = fb.cast("k32", 32, CastOp::SExt, Operand::Value(k));
    fb.cond_br(
        CmpPredicate::Sle,
        Operand::Value(k32),
        Operand::const_int(100, 32),
        then_block,
        exit,
    );
    fb.switch_to(then_block);
    let gated = fb.sigma("gated", k);
    fb.jump(exit);
    fb.switch_to(exit);
    fb.ret(None);
    fb.finish();

    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.analyze_function(&module, "foo").unwrap();
    assert_eq!(analysis.get_range(k), Range::new(-128, 127));
    assert_eq!(analysis.get_range(gated), Range::new(-128, 100));
    let k32_range = analysis.get_range(k32);
    assert_eq!(k32_range, Range::new(-128, 127));
}

#[test]
fn test_symbolic_future_between_two_parameters() {
    // if (a <= b) { a' = sigma(a) }: a' must pick up b's final upper bound.
    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "clamp");
    let a = fb.int_param("a", 64);
    let b = fb.int_param("b", 64);
    let then_block = fb.block("then");
    let exit = fb.block("exit");
    fb.cond_br(
        CmpPredicate::Sle,
        Operand::Value(a),
        Operand::Value(b),
        then_block,
        exit,
    );
    fb.switch_to(then_block);
    let gated = fb.sigma("gated", a);
    fb.jump(exit);
    fb.switch_to(exit);
    fb.ret(None);
    fb.finish();

    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.add_seed("clamp", "b", Range::new(-5, 17));
    analysis.analyze_function(&module, "clamp").unwrap();
    assert_eq!(analysis.stats().futures_resolved, 1);
    let result = analysis.get_range(gated);
    assert_eq!(result.upper(), 17);
}

#[test]
fn test_switch_gates_cases_to_points() {
    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "dispatch");
    let x = fb.int_param("x", 32);
    let on_seven = fb.block("on_seven");
    let fallthrough = fb.block("fallthrough");
    fb.switch(Operand::Value(x), vec![(7, on_seven)], Some(fallthrough));
    fb.switch_to(on_seven);
    let x7 = fb.sigma("x7", x);
    fb.ret(None);
    fb.switch_to(fallthrough);
    let x_other = fb.sigma("x_other", x);
    fb.ret(None);
    fb.finish();

    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.analyze_function(&module, "dispatch").unwrap();
    assert_eq!(analysis.get_range(x7), Range::constant(7));
    // The default edge only excludes single points, which the interval
    // domain cannot express.
    assert!(analysis.get_range(x_other).is_full_set());
}

#[test]
fn test_ignored_call_does_not_poison_union() {
    fn build() -> Module {
        let mut module = Module::default();
        let mut fb = FunctionBuilder::new(&mut module, "f");
        let entry = fb.entry();
        let other = fb.block("other");
        let join = fb.block("join");
        let alloc = fb.call("alloc", 64, "opaque_alloc", vec![]);
        fb.jump(join);
        fb.switch_to(other);
        fb.jump(join);
        fb.switch_to(join);
        fb.phi(
            "merged",
            64,
            vec![
                (Operand::Value(alloc), entry),
                (Operand::const_int(42, 64), other),
            ],
        );
        fb.ret(None);
        fb.finish();
        module
    }

    let module = build();
    let merged = module.find_value("f", "merged").unwrap();

    let mut plain = RangeAnalysis::new(Config::default());
    plain.analyze_function(&module, "f").unwrap();
    assert!(plain.get_range(merged).is_full_set());

    let mut filtered = RangeAnalysis::new(Config::default());
    filtered.ignore_function("opaque_alloc");
    filtered.analyze_function(&module, "f").unwrap();
    assert_eq!(filtered.get_range(merged), Range::constant(42));
}

#[test]
fn test_ignored_call_filtered_through_forward_reference() {
    // The loop-header phi consumes the call result before the call's own
    // block is reached, so the result value is first seen as an operand.
    // The deny-list filter must still recognize the callee.
    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "f");
    let entry = fb.entry();
    let header = fb.block("header");
    let body = fb.block("body");
    fb.jump(header);
    fb.switch_to(body);
    let alloc = fb.call("alloc", 64, "opaque_alloc", vec![]);
    fb.jump(header);
    fb.switch_to(header);
    let merged = fb.phi(
        "merged",
        64,
        vec![
            (Operand::const_int(7, 64), entry),
            (Operand::Value(alloc), body),
        ],
    );
    fb.jump(body);
    fb.finish();

    let mut plain = RangeAnalysis::new(Config::default());
    plain.analyze_function(&module, "f").unwrap();
    assert!(plain.get_range(merged).is_full_set());

    let mut filtered = RangeAnalysis::new(Config::default());
    filtered.ignore_function("opaque_alloc");
    filtered.analyze_function(&module, "f").unwrap();
    assert_eq!(filtered.get_range(merged), Range::constant(7));
}

#[test]
fn test_interprocedural_argument_union() {
    // Two call sites feed the same parameter; its range is their union.
    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "id");
    let v = fb.int_param("v", 64);
    fb.ret(Some(Operand::Value(v)));
    fb.finish();

    let mut fb = FunctionBuilder::new(&mut module, "caller");
    fb.call("first", 64, "id", vec![Operand::const_int(2, 64)]);
    fb.call("second", 64, "id", vec![Operand::const_int(9, 64)]);
    fb.ret(None);
    fb.finish();

    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.analyze_module(&module);
    assert_eq!(analysis.get_range(v), Range::new(2, 9));
    let first = module.find_value("caller", "first").unwrap();
    assert_eq!(analysis.get_range(first), Range::new(2, 9));

    // With call linking off the same module analyzes each function in
    // isolation: the parameter and the call results stay unconstrained.
    let mut isolated = RangeAnalysis::new(Config {
        interprocedural: false,
        ..Config::default()
    });
    isolated.analyze_module(&module);
    assert!(isolated.get_range(v).is_full_set());
    assert!(isolated.get_range(first).is_full_set());
}

#[test]
fn test_seed_file_round_trip() {
    let dir = std::env::temp_dir().join("range_analysis_seed_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("seeds.txt");
    std::fs::write(
        &path,
        "# seeds\nf|k|[-7, 7]\nf|m|[3, +inf]\nnot a seed line\n",
    )
    .unwrap();

    let mut module = Module::default();
    let mut fb = FunctionBuilder::new(&mut module, "f");
    let k = fb.int_param("k", 64);
    let m = fb.int_param("m", 64);
    fb.ret(None);
    fb.finish();

    let mut analysis = RangeAnalysis::new(Config::default());
    analysis.load_seed_file(&path).unwrap();
    analysis.analyze_function(&module, "f").unwrap();
    assert_eq!(analysis.get_range(k), Range::new(-7, 7));
    assert_eq!(analysis.get_range(m), Range::new(3, range::MAX));
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_query_is_total() {
    let module = Module::default();
    let analysis = RangeAnalysis::new(Config::default());
    assert!(analysis.get_range(ValueId(12345)).is_full_set());
}
