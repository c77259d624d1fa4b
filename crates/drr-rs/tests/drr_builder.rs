use drr_rs::{
    ir::{AttrKind, Attribute, OpRegistry, RegistryError},
    pattern::{
        capture, equals, DrrPattern, ResultAttr, ResultPattern, RuleError, SourcePattern,
    },
};

/// `pd_op.sum(arg0, pd_op.full_int_array)` with the usual captures.
fn sum_source() -> SourcePattern {
    let mut src = SourcePattern::new();
    let full = src.op(
        "pd_op.full_int_array",
        [
            ("value", capture("axis_info")),
            ("dtype", capture("dtype_2")),
            ("place", capture("place_2")),
        ],
    );
    let sum = src.op(
        "pd_op.sum",
        [("dtype", capture("dtype")), ("keepdim", capture("keep_dim"))],
    );
    let axis = src.apply_single(full, &[]);
    let arg0 = src.tensor("arg0");
    let ret = src.tensor("ret");
    src.apply(sum, &[arg0, axis], &[ret]);
    src
}

fn reduce_sum_result() -> ResultPattern {
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    res
}

fn build(src: SourcePattern, res: ResultPattern) -> Result<DrrPattern, RuleError> {
    DrrPattern::build("TestPattern", src, res, OpRegistry::global())
}

#[test]
fn well_formed_rule_builds() {
    let pattern = build(sum_source(), reduce_sum_result()).expect("valid rule");
    assert_eq!(pattern.name(), "TestPattern");
    assert_eq!(pattern.anchor_kind(), "pd_op.sum");
    assert_eq!(pattern.num_source_ops(), 2);
    assert_eq!(pattern.num_result_ops(), 1);
}

#[test]
fn rejects_empty_source_pattern() {
    let err = build(SourcePattern::new(), ResultPattern::new()).expect_err("empty");
    assert!(matches!(err, RuleError::EmptySourcePattern));
}

#[test]
fn rejects_unknown_operation_kinds() {
    let mut src = SourcePattern::new();
    let op = src.op("pd_op.nope", []);
    let x = src.tensor("x");
    let ret = src.tensor("ret");
    src.apply(op, &[x], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("unknown kind");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::UnknownOpKind(kind)) if kind == "pd_op.nope"
    ));

    let mut res = ResultPattern::new();
    let op = res.op("cinn_op.nope", []);
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(op, &[arg0], &[ret]);
    let err = build(sum_source(), res).expect_err("unknown result kind");
    assert!(matches!(err, RuleError::Registry(RegistryError::UnknownOpKind(_))));
}

#[test]
fn rejects_templates_that_are_never_applied_or_applied_twice() {
    let mut src = sum_source();
    src.op("pd_op.full", []);
    let err = build(src, reduce_sum_result()).expect_err("dangling template");
    assert!(matches!(err, RuleError::OpNotApplied { kind } if kind == "pd_op.full"));

    let mut src = SourcePattern::new();
    let max = src.op("pd_op.max", []);
    let a = src.tensor("a");
    let b = src.tensor("b");
    let ret = src.tensor("ret");
    src.apply(max, &[a, b], &[ret]);
    src.apply(max, &[b, a], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("applied twice");
    assert!(matches!(err, RuleError::OpAppliedTwice { kind } if kind == "pd_op.max"));
}

#[test]
fn rejects_wiring_that_disagrees_with_the_schema() {
    let mut src = SourcePattern::new();
    let sum = src.op("pd_op.sum", []);
    let x = src.tensor("x");
    let ret = src.tensor("ret");
    src.apply(sum, &[x], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("one operand");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::OperandCount { found: 1, .. })
    ));

    let mut src = SourcePattern::new();
    let sum = src.op("pd_op.sum", []);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let r0 = src.tensor("r0");
    let r1 = src.tensor("r1");
    src.apply(sum, &[x, y], &[r0, r1]);
    let err = build(src, ResultPattern::new()).expect_err("two results");
    assert!(matches!(
        err,
        RuleError::ResultCount {
            expected: 1,
            found: 2,
            ..
        }
    ));
}

#[test]
fn rejects_attribute_constraints_of_the_wrong_kind() {
    let mut src = SourcePattern::new();
    let sum = src.op("pd_op.sum", [("keepdim", equals(Attribute::I64(0)))]);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let ret = src.tensor("ret");
    src.apply(sum, &[x, y], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("literal kind");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::AttrTypeMismatch {
            expected: AttrKind::Bool,
            found: AttrKind::I64,
            ..
        })
    ));

    let mut src = SourcePattern::new();
    let sum = src.op("pd_op.sum", [("axis", capture("axis"))]);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let ret = src.tensor("ret");
    src.apply(sum, &[x, y], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("no such attribute");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::UnknownAttribute { attr, .. }) if attr == "axis"
    ));
}

#[test]
fn rejects_one_capture_name_for_attributes_of_different_kinds() {
    let mut src = SourcePattern::new();
    let sum = src.op(
        "pd_op.sum",
        [("dtype", capture("same")), ("keepdim", capture("same"))],
    );
    let x = src.tensor("x");
    let y = src.tensor("y");
    let ret = src.tensor("ret");
    src.apply(sum, &[x, y], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("conflicting capture");
    assert!(matches!(
        err,
        RuleError::CaptureKindConflict {
            first: AttrKind::DataType,
            second: AttrKind::Bool,
            ..
        }
    ));
}

#[test]
fn rejects_tensors_with_two_producers() {
    let mut src = SourcePattern::new();
    let first = src.op("pd_op.full_int_array", []);
    let second = src.op("pd_op.full_int_array", []);
    let sum = src.op("pd_op.sum", []);
    let axis = src.tensor("axis");
    let x = src.tensor("x");
    let ret = src.tensor("ret");
    src.apply(first, &[], &[axis]);
    src.apply(second, &[], &[axis]);
    src.apply(sum, &[x, axis], &[ret]);
    let err = build(src, ResultPattern::new()).expect_err("two producers");
    assert!(matches!(err, RuleError::TensorProducedTwice { name } if name == "axis"));
}

#[test]
fn requires_exactly_one_root() {
    let mut src = SourcePattern::new();
    let a = src.op("pd_op.max", []);
    let b = src.op("pd_op.max", []);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let r0 = src.tensor("r0");
    let r1 = src.tensor("r1");
    src.apply(a, &[x, y], &[r0]);
    src.apply(b, &[x, y], &[r1]);
    let err = build(src, ResultPattern::new()).expect_err("two roots");
    assert!(matches!(err, RuleError::MultipleAnchors { kinds } if kinds.len() == 2));

    let mut src = SourcePattern::new();
    let a = src.op("pd_op.max", []);
    let b = src.op("pd_op.max", []);
    let x = src.tensor("x");
    let t1 = src.tensor("t1");
    let t2 = src.tensor("t2");
    src.apply(a, &[x, t2], &[t1]);
    src.apply(b, &[x, t1], &[t2]);
    let err = build(src, ResultPattern::new()).expect_err("every output consumed");
    assert!(matches!(err, RuleError::NoAnchor));
}

#[test]
fn rejects_cycles_and_templates_detached_from_the_root() {
    let mut src = SourcePattern::new();
    let root = src.op("pd_op.max", []);
    let a = src.op("pd_op.max", []);
    let b = src.op("pd_op.max", []);
    let x = src.tensor("x");
    let t1 = src.tensor("t1");
    let t2 = src.tensor("t2");
    let ret = src.tensor("ret");
    src.apply(root, &[t1, x], &[ret]);
    src.apply(a, &[t2, x], &[t1]);
    src.apply(b, &[t1, x], &[t2]);
    let err = build(src, ResultPattern::new()).expect_err("cycle below the root");
    assert!(matches!(err, RuleError::CyclicSourcePattern));

    let mut src = SourcePattern::new();
    let root = src.op("pd_op.max", []);
    let c = src.op("pd_op.sum", []);
    let d = src.op("pd_op.sum", []);
    let x = src.tensor("x");
    let y = src.tensor("y");
    let t3 = src.tensor("t3");
    let t4 = src.tensor("t4");
    let ret = src.tensor("ret");
    src.apply(root, &[x, y], &[ret]);
    src.apply(c, &[t3, x], &[t4]);
    src.apply(d, &[t4, x], &[t3]);
    let err = build(src, ResultPattern::new()).expect_err("island");
    assert!(matches!(err, RuleError::DisconnectedSourceOp { kind } if kind == "pd_op.sum"));
}

#[test]
fn root_outputs_must_be_named() {
    let mut src = SourcePattern::new();
    let max = src.op("pd_op.max", []);
    let x = src.tensor("x");
    let y = src.tensor("y");
    src.apply_single(max, &[x, y]);
    let err = build(src, ResultPattern::new()).expect_err("anonymous root output");
    assert!(matches!(err, RuleError::AnonymousAnchorOutput { kind } if kind == "pd_op.max"));
}

#[test]
fn result_tensors_must_resolve_to_pattern_inputs_or_earlier_results() {
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let y = res.tensor("y");
    let ret = res.tensor("ret");
    res.apply(reduce, &[y], &[ret]);
    let err = build(sum_source(), res).expect_err("unbound tensor");
    assert!(matches!(err, RuleError::UnboundTensor { name } if name == "y"));

    let mut src = SourcePattern::new();
    let full = src.op("pd_op.full_int_array", [("value", capture("axis_info"))]);
    let sum = src.op("pd_op.sum", [("keepdim", capture("keep_dim"))]);
    let axis = src.tensor("axis");
    let arg0 = src.tensor("arg0");
    let ret = src.tensor("ret");
    src.apply(full, &[], &[axis]);
    src.apply(sum, &[arg0, axis], &[ret]);
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let axis = res.tensor("axis");
    let ret = res.tensor("ret");
    res.apply(reduce, &[axis], &[ret]);
    let err = build(src, res).expect_err("intermediate");
    assert!(matches!(err, RuleError::IntermediateReference { name } if name == "axis"));

    let mut res = ResultPattern::new();
    let attrs = || {
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ]
    };
    let first = res.op("cinn_op.reduce_sum", attrs());
    let second = res.op("cinn_op.reduce_max", attrs());
    let tmp = res.tensor("tmp");
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(first, &[tmp], &[ret]);
    res.apply(second, &[arg0], &[tmp]);
    let err = build(sum_source(), res).expect_err("consumed before produced");
    assert!(matches!(err, RuleError::ResultOrder { name } if name == "tmp"));
}

#[test]
fn result_pattern_may_not_redefine_pattern_inputs() {
    let mut res = ResultPattern::new();
    let attrs = || {
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ]
    };
    let first = res.op("cinn_op.reduce_sum", attrs());
    let second = res.op("cinn_op.reduce_max", attrs());
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(first, &[arg0], &[arg0]);
    res.apply(second, &[arg0], &[ret]);
    let err = build(sum_source(), res).expect_err("redefined input");
    assert!(matches!(err, RuleError::RedefinesSourceTensor { name } if name == "arg0"));
}

#[test]
fn result_attributes_are_checked_against_captures_and_schema() {
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("missing")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    let err = build(sum_source(), res).expect_err("unbound capture");
    assert!(matches!(err, RuleError::UnboundAttribute { name } if name == "missing"));

    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("dtype")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    let err = build(sum_source(), res).expect_err("wrong kind");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::AttrTypeMismatch {
            expected: AttrKind::Bool,
            found: AttrKind::DataType,
            ..
        })
    ));

    let mut res = ResultPattern::new();
    let reduce = res.op("cinn_op.reduce_sum", [("dim", ResultAttr::captured("axis_info"))]);
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    let err = build(sum_source(), res).expect_err("missing keep_dim");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::MissingAttribute { attr, .. }) if attr == "keep_dim"
    ));

    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::constant(Attribute::int_array([0]))),
            ("keep_dim", ResultAttr::constant(Attribute::Bool(true))),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce, &[arg0], &[ret]);
    build(sum_source(), res).expect("constants of the right kind");
}

#[test]
fn every_root_output_needs_a_replacement() {
    let mut res = ResultPattern::new();
    let reduce = res.op(
        "cinn_op.reduce_sum",
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let other = res.tensor("other");
    res.apply(reduce, &[arg0], &[other]);
    let err = build(sum_source(), res).expect_err("ret never produced");
    assert!(matches!(err, RuleError::MissingResultOutput { name } if name == "ret"));

    let mut res = ResultPattern::new();
    let ret = res.tensor("ret");
    let arg0 = res.tensor("arg0");
    res.forward(ret, arg0);
    let pattern = build(sum_source(), res).expect("forwarding rule");
    assert_eq!(pattern.num_result_ops(), 0);
}

#[test]
fn rejects_result_kinds_that_own_regions() {
    let mut res = reduce_sum_result();
    let module = res.op("builtin.module", []);
    res.apply(module, &[], &[]);
    let err = build(sum_source(), res).expect_err("modules cannot be built from attributes");
    assert!(matches!(
        err,
        RuleError::Registry(RegistryError::RegionsRequired { op, count: 1 })
            if op == "builtin.module"
    ));
}
