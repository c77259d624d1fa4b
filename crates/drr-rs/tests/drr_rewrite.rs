use drr_rs::{
    drr_region,
    ir::{
        text_ir::{parse_region_with_symbols, ParsedRegion},
        Arity, Attribute, DataType, GraphError, OpId, OpRegistry, OpSchema, OperationState, Place,
        Region, RegistryError,
    },
    passes::uniform_op_pattern,
    pattern::{
        capture, BindingTable, DrrPattern, ResultAttr, ResultPattern, RewritePattern, RuleError,
        SourcePattern,
    },
    RegionRewriter,
};

fn parse(src: &str) -> ParsedRegion {
    parse_region_with_symbols(src).expect("valid region text")
}

fn op_of(parsed: &ParsedRegion, value: &str) -> OpId {
    let value = parsed.value(value).expect("named value");
    parsed.region.producer_of(value).expect("value has a producer")
}

fn canonical(src: &str) -> String {
    drr_region!(src).to_string()
}

fn sum_source() -> SourcePattern {
    let mut src = SourcePattern::new();
    let full = src.op("pd_op.full_int_array", [("value", capture("axis_info"))]);
    let sum = src.op("pd_op.sum", [("keepdim", capture("keep_dim"))]);
    let axis = src.apply_single(full, &[]);
    let arg0 = src.tensor("arg0");
    let ret = src.tensor("ret");
    src.apply(sum, &[arg0, axis], &[ret]);
    src
}

/// Reduce-sum replacement whose `dim` comes from `dim`.
fn reduce_sum_with(dim: ResultAttr) -> ResultPattern {
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [("dim", dim), ("keep_dim", ResultAttr::constant(Attribute::Bool(true)))],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    res
}

fn match_and_rewrite(
    pattern: &DrrPattern,
    region: &mut Region,
    root: OpId,
) -> Result<bool, RuleError> {
    let mut bindings = BindingTable::new();
    let mut rewriter = RegionRewriter::new(region);
    pattern.match_and_rewrite(root, &mut rewriter, &mut bindings)
}

const SUM_REGION: &str = r#"
region(%x) {
  %axis = pd_op.full_int_array() {dtype = dtype<int64>, place = place<cpu>, value = [0, 2]}
  %s = pd_op.sum(%x, %axis) {dtype = dtype<float32>, keepdim = false}
  %u = test.use(%s)
  yield %u
}
"#;

#[test]
fn root_results_are_rewired_position_by_position() {
    let mut registry = OpRegistry::with_builtin_dialects();
    registry
        .register(
            OpSchema::new("test.split")
                .operands(Arity::Exactly(1))
                .results(2),
        )
        .register(
            OpSchema::new("test.split_swapped")
                .operands(Arity::Exactly(1))
                .results(2),
        );

    let mut src = SourcePattern::new();
    let split = src.op("test.split", []);
    let x = src.tensor("x");
    let a = src.tensor("a");
    let b = src.tensor("b");
    src.apply(split, &[x], &[a, b]);
    let mut res = ResultPattern::new();
    let swapped = res.op("test.split_swapped", []);
    let x = res.tensor("x");
    let a = res.tensor("a");
    let b = res.tensor("b");
    res.apply(swapped, &[x], &[b, a]);
    let pattern = DrrPattern::build("SwapSplit", src, res, &registry).expect("valid rule");

    let parsed = parse(
        r#"
region(%x) {
  %a, %b = test.split(%x)
  %u = test.use(%a, %b)
  yield %u
}
"#,
    );
    let root = op_of(&parsed, "a");
    let user = op_of(&parsed, "u");
    let mut region = parsed.region;
    let bindings = pattern.match_root(root, &region).expect("split matches");
    let replacements = {
        let mut rewriter = RegionRewriter::new(&mut region);
        let replacements = pattern
            .rewrite(root, &bindings, &mut rewriter)
            .expect("rewrite succeeds");
        assert_eq!(rewriter.take_inserted().len(), 1);
        assert_eq!(rewriter.take_erased(), vec![root]);
        replacements
    };

    assert_eq!(replacements.len(), 2);
    assert_eq!(region.op(user).expect("user survives").operands(), replacements);
    assert_eq!(region.version(user), Some(2));
    assert_eq!(
        region.to_string(),
        canonical(
            r#"
region(%x) {
  %p, %q = test.split_swapped(%x)
  %u = test.use(%q, %p)
  yield %u
}
"#
        )
    );
    region.verify().expect("well-formed after rewrite");
}

#[test]
fn result_operations_are_created_in_declared_order() {
    let mut res = ResultPattern::new();
    let first = res.op(
        "cinn_op.reduce_max",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::constant(Attribute::Bool(true))),
        ],
    );
    let second = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    let tmp = res.apply_single(first, &[arg0]);
    res.apply(second, &[tmp], &[ret]);
    let pattern =
        DrrPattern::build("TwoStep", sum_source(), res, OpRegistry::global()).expect("valid rule");

    let parsed = parse(SUM_REGION);
    let root = op_of(&parsed, "s");
    let mut region = parsed.region;
    assert!(match_and_rewrite(&pattern, &mut region, root).expect("no failure"));
    assert_eq!(
        region.to_string(),
        canonical(
            r#"
region(%x) {
  %m = cinn_op.reduce_max(%x) {dim = [0, 2], keep_dim = true}
  %s = cinn_op.reduce_sum(%m) {dim = [0, 2], keep_dim = false}
  %u = test.use(%s)
  yield %u
}
"#
        )
    );
}

#[test]
fn computed_attributes_read_the_match() {
    let reversed = ResultAttr::computed(|ctx| {
        let mut dims = ctx
            .attr("axis_info")
            .and_then(Attribute::as_int_array)
            .map(<[i64]>::to_vec)
            .unwrap_or_default();
        dims.reverse();
        Attribute::IntArray(dims)
    });
    let pattern = DrrPattern::build(
        "Reversed",
        sum_source(),
        reduce_sum_with(reversed),
        OpRegistry::global(),
    )
    .expect("valid rule");

    let parsed = parse(SUM_REGION);
    let root = op_of(&parsed, "s");
    let mut region = parsed.region;
    assert!(match_and_rewrite(&pattern, &mut region, root).expect("no failure"));
    assert_eq!(
        region.to_string(),
        canonical(
            r#"
region(%x) {
  %r = cinn_op.reduce_sum(%x) {dim = [2, 0], keep_dim = true}
  %u = test.use(%r)
  yield %u
}
"#
        )
    );
}

#[test]
fn construction_failure_leaves_the_region_untouched() {
    let wrong_kind = ResultAttr::computed(|_| Attribute::I64(0));
    let pattern = DrrPattern::build(
        "WrongKind",
        sum_source(),
        reduce_sum_with(wrong_kind),
        OpRegistry::global(),
    )
    .expect("computed attributes are checked at rewrite time");

    let parsed = parse(SUM_REGION);
    let root = op_of(&parsed, "s");
    let mut region = parsed.region;
    let before = region.clone();
    let err = match_and_rewrite(&pattern, &mut region, root).expect_err("dim is not an array");
    match err {
        RuleError::Construction {
            pattern,
            op,
            source: RegistryError::AttrTypeMismatch { attr, .. },
        } => {
            assert_eq!(pattern, "WrongKind");
            assert_eq!(op, "cinn_op.reduce_sum");
            assert_eq!(attr, "dim");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(region, before);
}

#[test]
fn failure_after_the_first_insert_removes_every_insert() {
    let mut registry = OpRegistry::with_builtin_dialects();
    registry
        .register(OpSchema::new("test.pair").operands(Arity::Exactly(2)).results(1))
        .register(OpSchema::new("test.first").operands(Arity::Exactly(1)).results(1))
        .register(OpSchema::new("test.second").operands(Arity::Exactly(2)).results(1));

    let mut src = SourcePattern::new();
    let pair = src.op("test.pair", []);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let ret = src.tensor("ret");
    src.apply(pair, &[x, y], &[ret]);
    let mut res = ResultPattern::new();
    let first = res.op("test.first", []);
    let second = res.op("test.second", []);
    let x = res.tensor("x");
    let y = res.tensor("y");
    let ret = res.tensor("ret");
    let tmp = res.apply_single(first, &[x]);
    res.apply(second, &[tmp, y], &[ret]);
    let pattern = DrrPattern::build("SplitPair", src, res, &registry).expect("valid rule");

    let parsed = parse(
        r#"
region(%x) {
  %w = test.pair(%x, %x)
  %late = test.late(%x)
  yield %w, %late
}
"#,
    );
    let input = parsed.value("x").expect("x");
    let late = parsed.value("late").expect("late");
    let root = op_of(&parsed, "w");
    let mut region = parsed.region;
    // `%late` is defined after the root, so only the second insert fails.
    region.set_operand(root, 1, late).expect("rewire operand");
    let before = region.to_string();
    let order = region.ops_in_order();

    let err = match_and_rewrite(&pattern, &mut region, root).expect_err("second insert fails");
    assert!(matches!(
        err,
        RuleError::Graph(GraphError::UseBeforeDef { value, .. }) if value == late
    ));
    assert_eq!(region.to_string(), before);
    assert_eq!(region.ops_in_order(), order);
    assert_eq!(region.users_of(input).len(), 2);
    assert_eq!(region.version(root), Some(1));
}

#[test]
fn non_matching_root_reports_false_without_changes() {
    let pattern = DrrPattern::build(
        "Constant",
        sum_source(),
        reduce_sum_with(ResultAttr::constant(Attribute::int_array([0]))),
        OpRegistry::global(),
    )
    .expect("valid rule");
    let parsed = parse(SUM_REGION);
    let not_a_sum = op_of(&parsed, "u");
    let mut region = parsed.region;
    let before = region.clone();
    assert!(!match_and_rewrite(&pattern, &mut region, not_a_sum).expect("no failure"));
    assert_eq!(region, before);
}

#[test]
fn forwarding_replaces_the_root_with_a_pattern_input() {
    let mut src = SourcePattern::new();
    let max = src.op("pd_op.max", []);
    let a = src.tensor("a");
    let ret = src.tensor("ret");
    src.apply(max, &[a, a], &[ret]);
    let mut res = ResultPattern::new();
    let ret = res.tensor("ret");
    let a = res.tensor("a");
    res.forward(ret, a);
    let pattern =
        DrrPattern::build("MaxOfSelf", src, res, OpRegistry::global()).expect("valid rule");

    let parsed = parse(
        r#"
region(%x) {
  %m = pd_op.max(%x, %x) {keepdim = false}
  %n = test.use(%m)
  yield %n, %m
}
"#,
    );
    let x = parsed.value("x").expect("x");
    let root = op_of(&parsed, "m");
    let mut region = parsed.region;
    let bindings = pattern.match_root(root, &region).expect("max of self");
    let replacements = pattern
        .rewrite(root, &bindings, &mut RegionRewriter::new(&mut region))
        .expect("rewrite succeeds");
    assert_eq!(replacements, vec![x]);
    assert_eq!(
        region.to_string(),
        canonical(
            r#"
region(%x) {
  %n = test.use(%x)
  yield %n, %x
}
"#
        )
    );
}

#[test]
fn captured_floats_are_copied_bit_for_bit() {
    const NAN_WITH_PAYLOAD: u64 = 0x7ff8_0000_0000_1234;

    let mut region = Region::new();
    let cpu = || Attribute::Place(Place::Cpu);
    let float32 = || Attribute::DataType(DataType::Float32);
    let shape = region
        .push(
            OperationState::new("pd_op.full_int_array")
                .with_attr("value", Attribute::int_array([2, 3]))
                .with_attr("dtype", Attribute::DataType(DataType::Int64))
                .with_attr("place", cpu()),
        )
        .expect("shape");
    let min = region
        .push(
            OperationState::new("pd_op.full")
                .with_attr("shape", Attribute::int_array([1]))
                .with_attr("value", Attribute::F64(NAN_WITH_PAYLOAD))
                .with_attr("dtype", float32())
                .with_attr("place", cpu()),
        )
        .expect("min");
    let max = region
        .push(
            OperationState::new("pd_op.full")
                .with_attr("shape", Attribute::int_array([1]))
                .with_attr("value", Attribute::f64(-0.0))
                .with_attr("dtype", float32())
                .with_attr("place", cpu()),
        )
        .expect("max");
    let operands: Vec<_> = [shape, min, max]
        .iter()
        .map(|op| region.op(*op).expect("live").results()[0])
        .collect();
    let uniform = region
        .push(
            OperationState::new("pd_op.uniform")
                .with_operands(operands)
                .with_attr("dtype", float32())
                .with_attr("place", Attribute::Place(Place::Gpu(0)))
                .with_attr("seed", Attribute::I32(7)),
        )
        .expect("uniform");
    let out = region.op(uniform).expect("live").results()[0];
    region.set_outputs(vec![out]).expect("outputs");

    let pattern = uniform_op_pattern(OpRegistry::global()).expect("valid rule");
    assert!(match_and_rewrite(&pattern, &mut region, uniform).expect("no failure"));
    assert_eq!(region.len(), 1);

    let lowered = region
        .producer_of(region.outputs()[0])
        .expect("output has a producer");
    let op = region.op(lowered).expect("live");
    assert_eq!(op.name(), "cinn_op.uniform_random");
    assert_eq!(op.attr("min"), Some(&Attribute::F64(NAN_WITH_PAYLOAD)));
    assert_eq!(op.attr("diag_val"), Some(&Attribute::F64(NAN_WITH_PAYLOAD)));
    assert_eq!(op.attr("max"), Some(&Attribute::F64((-0.0f64).to_bits())));
    assert_ne!(op.attr("max"), Some(&Attribute::f64(0.0)));
    assert_eq!(op.attr("shape"), Some(&Attribute::int_array([2, 3])));
    assert_eq!(op.attr("seed"), Some(&Attribute::I32(7)));
    assert_eq!(op.attr("diag_num"), Some(&Attribute::I32(7)));
}
