use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::ir::{
    AttrKind, Attribute, GraphError, OpId, OpRegistry, OpSchema, RegistryError, ValueId,
};
use crate::pattern::binding::BindingTable;

/// Tensor slot of a source or result pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

impl TensorId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation template of a source pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceOpId(pub u32);

impl SourceOpId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation template of a result pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultOpId(pub u32);

impl ResultOpId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a source template constrains one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrConstraint {
    /// Binds the attribute to a named slot; repeated names must agree bit-for-bit.
    Capture(Arc<str>),
    /// The attribute must equal the literal exactly.
    Equals(Attribute),
}

pub fn capture(name: &str) -> AttrConstraint {
    AttrConstraint::Capture(Arc::from(name))
}

pub fn equals(attr: Attribute) -> AttrConstraint {
    AttrConstraint::Equals(attr)
}

pub type NativeConstraint = Arc<dyn Fn(&MatchContext<'_>) -> bool + Send + Sync>;
pub type AttrComputer = Arc<dyn Fn(&MatchContext<'_>) -> Attribute + Send + Sync>;

/// Source of one attribute of a result operation.
#[derive(Clone)]
pub enum ResultAttr {
    /// Copied unchanged from a captured source slot.
    Captured(Arc<str>),
    Constant(Attribute),
    /// Derived from the match by a native function.
    Computed(AttrComputer),
}

impl ResultAttr {
    pub fn captured(name: &str) -> Self {
        ResultAttr::Captured(Arc::from(name))
    }

    pub fn constant(attr: Attribute) -> Self {
        ResultAttr::Constant(attr)
    }

    pub fn computed(f: impl Fn(&MatchContext<'_>) -> Attribute + Send + Sync + 'static) -> Self {
        ResultAttr::Computed(Arc::new(f))
    }
}

impl fmt::Debug for ResultAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultAttr::Captured(name) => f.debug_tuple("Captured").field(name).finish(),
            ResultAttr::Constant(attr) => f.debug_tuple("Constant").field(attr).finish(),
            ResultAttr::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Rule-definition and rule-application failures.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("source pattern declares no operations")]
    EmptySourcePattern,
    #[error("operation template {0} does not exist")]
    UnknownTemplate(u32),
    #[error("tensor slot {0} does not belong to this pattern")]
    UnknownTensor(u32),
    #[error("`{kind}` template is declared but never applied")]
    OpNotApplied { kind: String },
    #[error("`{kind}` template is applied more than once")]
    OpAppliedTwice { kind: String },
    #[error("`{op}` template declares {found} output(s) but the kind has {expected}")]
    ResultCount {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("tensor `{name}` is produced more than once")]
    TensorProducedTwice { name: String },
    #[error("capture `{name}` is used for {first} and {second} attributes")]
    CaptureKindConflict {
        name: String,
        first: AttrKind,
        second: AttrKind,
    },
    #[error("source pattern has no root operation")]
    NoAnchor,
    #[error("source pattern has several root operations: {kinds:?}")]
    MultipleAnchors { kinds: Vec<String> },
    #[error("outputs of the root `{kind}` must be named tensors")]
    AnonymousAnchorOutput { kind: String },
    #[error("source pattern contains a cycle")]
    CyclicSourcePattern,
    #[error("`{kind}` template is not connected to the root")]
    DisconnectedSourceOp { kind: String },
    #[error("result pattern references unbound tensor `{name}`")]
    UnboundTensor { name: String },
    #[error("result pattern references `{name}`, which is internal to the source pattern")]
    IntermediateReference { name: String },
    #[error("tensor `{name}` is consumed before the result operation producing it")]
    ResultOrder { name: String },
    #[error("result pattern redefines source tensor `{name}`")]
    RedefinesSourceTensor { name: String },
    #[error("result pattern references unbound attribute `{name}`")]
    UnboundAttribute { name: String },
    #[error("result pattern does not define root output `{name}`")]
    MissingResultOutput { name: String },
    #[error("pattern `{pattern}` failed to construct `{op}`: {source}")]
    Construction {
        pattern: String,
        op: String,
        source: RegistryError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone)]
struct SourceOpDecl {
    kind: String,
    attrs: Vec<(String, AttrConstraint)>,
    wiring: Option<(Vec<TensorId>, Vec<TensorId>)>,
}

/// Builder for the subgraph a rule matches.
///
/// Tensors are named; the same name always refers to the same slot, so
/// using one tensor as the operand of two templates requires both operands
/// to be the same concrete value.
#[derive(Default)]
pub struct SourcePattern {
    ops: Vec<SourceOpDecl>,
    tensor_names: Vec<(String, bool)>,
    by_name: HashMap<String, TensorId>,
    constraints: Vec<(String, NativeConstraint)>,
    errors: Vec<RuleError>,
    anonymous: u32,
}

impl SourcePattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an operation template of kind `kind`.
    pub fn op<'s>(
        &mut self,
        kind: &str,
        attrs: impl IntoIterator<Item = (&'s str, AttrConstraint)>,
    ) -> SourceOpId {
        let id = SourceOpId(self.ops.len() as u32);
        self.ops.push(SourceOpDecl {
            kind: kind.to_string(),
            attrs: attrs
                .into_iter()
                .map(|(name, constraint)| (name.to_string(), constraint))
                .collect(),
            wiring: None,
        });
        id
    }

    /// Returns the tensor slot called `name`, creating it on first use.
    pub fn tensor(&mut self, name: &str) -> TensorId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = TensorId(self.tensor_names.len() as u32);
        self.tensor_names.push((name.to_string(), false));
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn anonymous_tensor(&mut self) -> TensorId {
        let id = TensorId(self.tensor_names.len() as u32);
        self.tensor_names.push((format!("<anon{}>", self.anonymous), true));
        self.anonymous += 1;
        id
    }

    /// Wires `op` to its operand and result tensors.
    pub fn apply(&mut self, op: SourceOpId, inputs: &[TensorId], outputs: &[TensorId]) {
        let Some(decl) = self.ops.get_mut(op.index()) else {
            self.errors.push(RuleError::UnknownTemplate(op.0));
            return;
        };
        if decl.wiring.is_some() {
            self.errors.push(RuleError::OpAppliedTwice {
                kind: decl.kind.clone(),
            });
            return;
        }
        decl.wiring = Some((inputs.to_vec(), outputs.to_vec()));
    }

    /// Wires a single-result template and returns its anonymous output.
    pub fn apply_single(&mut self, op: SourceOpId, inputs: &[TensorId]) -> TensorId {
        let output = self.anonymous_tensor();
        self.apply(op, inputs, &[output]);
        output
    }

    /// Adds a predicate evaluated once the structure of a candidate has matched.
    pub fn require(
        &mut self,
        name: &str,
        predicate: impl Fn(&MatchContext<'_>) -> bool + Send + Sync + 'static,
    ) {
        self.constraints
            .push((name.to_string(), Arc::new(predicate)));
    }
}

#[derive(Debug, Clone)]
struct ResultOpDecl {
    kind: String,
    attrs: Vec<(String, ResultAttr)>,
    wiring: Option<(Vec<TensorId>, Vec<TensorId>)>,
}

/// Builder for the replacement subgraph of a rule.
///
/// Result tensors resolve by name against the source pattern when the rule
/// is built.
#[derive(Debug, Default)]
pub struct ResultPattern {
    ops: Vec<ResultOpDecl>,
    tensor_names: Vec<String>,
    by_name: HashMap<String, TensorId>,
    forwards: Vec<(TensorId, TensorId)>,
    errors: Vec<RuleError>,
    anonymous: u32,
}

impl ResultPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op<'s>(
        &mut self,
        kind: &str,
        attrs: impl IntoIterator<Item = (&'s str, ResultAttr)>,
    ) -> ResultOpId {
        let id = ResultOpId(self.ops.len() as u32);
        self.ops.push(ResultOpDecl {
            kind: kind.to_string(),
            attrs: attrs
                .into_iter()
                .map(|(name, attr)| (name.to_string(), attr))
                .collect(),
            wiring: None,
        });
        id
    }

    pub fn tensor(&mut self, name: &str) -> TensorId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = TensorId(self.tensor_names.len() as u32);
        self.tensor_names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn apply(&mut self, op: ResultOpId, inputs: &[TensorId], outputs: &[TensorId]) {
        let Some(decl) = self.ops.get_mut(op.index()) else {
            self.errors.push(RuleError::UnknownTemplate(op.0));
            return;
        };
        if decl.wiring.is_some() {
            self.errors.push(RuleError::OpAppliedTwice {
                kind: decl.kind.clone(),
            });
            return;
        }
        decl.wiring = Some((inputs.to_vec(), outputs.to_vec()));
    }

    /// Wires a single-result template whose output only feeds later result operations.
    pub fn apply_single(&mut self, op: ResultOpId, inputs: &[TensorId]) -> TensorId {
        let name = format!("<anon{}>", self.anonymous);
        self.anonymous += 1;
        let output = self.tensor(&name);
        self.apply(op, inputs, &[output]);
        output
    }

    /// Replaces root output `output` directly by `input`.
    pub fn forward(&mut self, output: TensorId, input: TensorId) {
        self.forwards.push((output, input));
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SourceOp {
    pub(crate) kind: String,
    pub(crate) attrs: Vec<(String, AttrConstraint)>,
    pub(crate) inputs: Vec<TensorId>,
    pub(crate) outputs: Vec<TensorId>,
}

#[derive(Debug, Clone)]
pub(crate) struct SourceTensor {
    pub(crate) name: String,
    pub(crate) producer: Option<(SourceOpId, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultValue {
    /// A pattern input of the source pattern.
    Source(TensorId),
    /// Output `index` of the `op`-th result operation.
    Produced { op: usize, index: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct ResultOp {
    pub(crate) schema: OpSchema,
    pub(crate) attrs: Vec<(String, ResultAttr)>,
    pub(crate) inputs: Vec<ResultValue>,
}

/// Immutable, validated rewrite rule.
///
/// Built once from a [`SourcePattern`] and a [`ResultPattern`]; every
/// rule-definition error surfaces from [`DrrPattern::build`], including
/// result kinds that own nested regions. A built pattern can only fail at
/// rewrite time through a native attribute computation producing an
/// attribute of the wrong kind, or a region whose operands do not dominate
/// the root.
#[derive(Clone)]
pub struct DrrPattern {
    pub(crate) name: String,
    pub(crate) source_ops: Vec<SourceOp>,
    pub(crate) tensors: Vec<SourceTensor>,
    pub(crate) tensor_names: HashMap<String, TensorId>,
    pub(crate) anchor: SourceOpId,
    pub(crate) constraints: Vec<(String, NativeConstraint)>,
    pub(crate) result_ops: Vec<ResultOp>,
    /// Replacement for each root output, in root output order.
    pub(crate) outputs: Vec<ResultValue>,
}

impl fmt::Debug for DrrPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrrPattern")
            .field("name", &self.name)
            .field("anchor", &self.anchor_kind())
            .field("source_ops", &self.source_ops.len())
            .field("result_ops", &self.result_ops.len())
            .finish()
    }
}

impl DrrPattern {
    pub fn build(
        name: impl Into<String>,
        source: SourcePattern,
        mut result: ResultPattern,
        registry: &OpRegistry,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        let SourcePattern {
            ops: source_decls,
            tensor_names,
            by_name,
            constraints,
            errors: source_errors,
            ..
        } = source;
        if let Some(err) = source_errors.into_iter().next() {
            return Err(err);
        }
        if let Some(err) = std::mem::take(&mut result.errors).into_iter().next() {
            return Err(err);
        }
        if source_decls.is_empty() {
            return Err(RuleError::EmptySourcePattern);
        }

        let mut tensors: Vec<SourceTensor> = tensor_names
            .iter()
            .map(|(name, _)| SourceTensor {
                name: name.clone(),
                producer: None,
            })
            .collect();
        let mut consumed = vec![false; tensors.len()];
        let mut capture_kinds: HashMap<Arc<str>, AttrKind> = HashMap::new();
        let mut source_ops = Vec::with_capacity(source_decls.len());

        for (index, decl) in source_decls.into_iter().enumerate() {
            let (inputs, outputs) = decl.wiring.ok_or_else(|| RuleError::OpNotApplied {
                kind: decl.kind.clone(),
            })?;
            check_slots(&inputs, &outputs, tensors.len())?;
            let schema = registry.schema(&decl.kind)?;
            schema.verify_operand_count(inputs.len())?;
            if outputs.len() != schema.num_results() {
                return Err(RuleError::ResultCount {
                    op: decl.kind,
                    expected: schema.num_results(),
                    found: outputs.len(),
                });
            }
            for (attr, constraint) in &decl.attrs {
                let expected =
                    schema
                        .attr_kind(attr)
                        .ok_or_else(|| RegistryError::UnknownAttribute {
                            op: decl.kind.clone(),
                            attr: attr.clone(),
                        })?;
                match constraint {
                    AttrConstraint::Equals(literal) => {
                        if literal.kind() != expected {
                            return Err(RegistryError::AttrTypeMismatch {
                                op: decl.kind.clone(),
                                attr: attr.clone(),
                                expected,
                                found: literal.kind(),
                            }
                            .into());
                        }
                    }
                    AttrConstraint::Capture(slot) => match capture_kinds.get(slot) {
                        Some(first) if *first != expected => {
                            return Err(RuleError::CaptureKindConflict {
                                name: slot.to_string(),
                                first: *first,
                                second: expected,
                            });
                        }
                        Some(_) => {}
                        None => {
                            capture_kinds.insert(Arc::clone(slot), expected);
                        }
                    },
                }
            }
            for tensor in &inputs {
                consumed[tensor.index()] = true;
            }
            for (slot, tensor) in outputs.iter().enumerate() {
                let entry = &mut tensors[tensor.index()];
                if entry.producer.is_some() {
                    return Err(RuleError::TensorProducedTwice {
                        name: entry.name.clone(),
                    });
                }
                entry.producer = Some((SourceOpId(index as u32), slot));
            }
            source_ops.push(SourceOp {
                kind: decl.kind,
                attrs: decl.attrs,
                inputs,
                outputs,
            });
        }

        let anchor = find_anchor(&source_ops, &consumed)?;
        for tensor in &source_ops[anchor.index()].outputs {
            if tensor_names[tensor.index()].1 {
                return Err(RuleError::AnonymousAnchorOutput {
                    kind: source_ops[anchor.index()].kind.clone(),
                });
            }
        }
        check_connected(&source_ops, &tensors, anchor)?;

        let (result_ops, outputs) = compile_result(
            result,
            &source_ops[anchor.index()],
            &tensors,
            &by_name,
            &capture_kinds,
            registry,
        )?;

        Ok(Self {
            name,
            source_ops,
            tensors,
            tensor_names: by_name,
            anchor,
            constraints,
            result_ops,
            outputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the root operation the pattern is anchored on.
    pub fn anchor_kind(&self) -> &str {
        &self.source_ops[self.anchor.index()].kind
    }

    pub fn num_source_ops(&self) -> usize {
        self.source_ops.len()
    }

    pub fn num_result_ops(&self) -> usize {
        self.result_ops.len()
    }

    pub(crate) fn source_op(&self, id: SourceOpId) -> &SourceOp {
        &self.source_ops[id.index()]
    }

    pub(crate) fn tensor_info(&self, id: TensorId) -> &SourceTensor {
        &self.tensors[id.index()]
    }
}

fn check_slots(inputs: &[TensorId], outputs: &[TensorId], count: usize) -> Result<(), RuleError> {
    match inputs.iter().chain(outputs).find(|t| t.index() >= count) {
        Some(tensor) => Err(RuleError::UnknownTensor(tensor.0)),
        None => Ok(()),
    }
}

fn find_anchor(ops: &[SourceOp], consumed: &[bool]) -> Result<SourceOpId, RuleError> {
    let roots: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.outputs.iter().all(|t| !consumed[t.index()]))
        .map(|(index, _)| index)
        .collect();
    match roots.as_slice() {
        [] => Err(RuleError::NoAnchor),
        [root] => Ok(SourceOpId(*root as u32)),
        _ => Err(RuleError::MultipleAnchors {
            kinds: roots.iter().map(|index| ops[*index].kind.clone()).collect(),
        }),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    Open,
    Done,
}

/// Walks producers backward from the root, rejecting cycles and templates
/// the root does not depend on.
fn check_connected(
    ops: &[SourceOp],
    tensors: &[SourceTensor],
    anchor: SourceOpId,
) -> Result<(), RuleError> {
    let mut state = vec![Visit::Unseen; ops.len()];
    // (op, next input to inspect)
    let mut stack: Vec<(usize, usize)> = vec![(anchor.index(), 0)];
    state[anchor.index()] = Visit::Open;
    while let Some((op, next)) = stack.pop() {
        let Some(tensor) = ops[op].inputs.get(next) else {
            state[op] = Visit::Done;
            continue;
        };
        stack.push((op, next + 1));
        let Some((producer, _)) = tensors[tensor.index()].producer else {
            continue;
        };
        match state[producer.index()] {
            Visit::Open => return Err(RuleError::CyclicSourcePattern),
            Visit::Done => {}
            Visit::Unseen => {
                state[producer.index()] = Visit::Open;
                stack.push((producer.index(), 0));
            }
        }
    }
    if let Some(index) = state.iter().position(|visit| *visit == Visit::Unseen) {
        return Err(RuleError::DisconnectedSourceOp {
            kind: ops[index].kind.clone(),
        });
    }
    Ok(())
}

fn compile_result(
    result: ResultPattern,
    anchor: &SourceOp,
    tensors: &[SourceTensor],
    source_names: &HashMap<String, TensorId>,
    capture_kinds: &HashMap<Arc<str>, AttrKind>,
    registry: &OpRegistry,
) -> Result<(Vec<ResultOp>, Vec<ResultValue>), RuleError> {
    let ResultPattern {
        ops: decls,
        tensor_names,
        forwards,
        ..
    } = result;
    let later_outputs: HashSet<&str> = decls
        .iter()
        .filter_map(|decl| decl.wiring.as_ref())
        .flat_map(|(_, outputs)| outputs.iter())
        .filter_map(|tensor| tensor_names.get(tensor.index()))
        .map(String::as_str)
        .collect();
    let anchor_outputs: HashSet<&str> = anchor
        .outputs
        .iter()
        .map(|tensor| tensors[tensor.index()].name.as_str())
        .collect();
    let mut produced: HashMap<&str, ResultValue> = HashMap::new();

    let resolve = |name: &str, produced: &HashMap<&str, ResultValue>| {
        if let Some(value) = produced.get(name) {
            return Ok(*value);
        }
        match source_names.get(name) {
            Some(id) if tensors[id.index()].producer.is_none() => Ok(ResultValue::Source(*id)),
            Some(_) => Err(RuleError::IntermediateReference {
                name: name.to_string(),
            }),
            None if later_outputs.contains(name) => Err(RuleError::ResultOrder {
                name: name.to_string(),
            }),
            None => Err(RuleError::UnboundTensor {
                name: name.to_string(),
            }),
        }
    };

    let mut result_ops = Vec::with_capacity(decls.len());
    for (index, decl) in decls.iter().enumerate() {
        let (inputs, outputs) = decl.wiring.as_ref().ok_or_else(|| RuleError::OpNotApplied {
            kind: decl.kind.clone(),
        })?;
        check_slots(inputs, outputs, tensor_names.len())?;
        let schema = registry.schema(&decl.kind)?;
        if schema.num_regions() > 0 {
            return Err(RegistryError::RegionsRequired {
                op: decl.kind.clone(),
                count: schema.num_regions(),
            }
            .into());
        }
        schema.verify_operand_count(inputs.len())?;
        if outputs.len() != schema.num_results() {
            return Err(RuleError::ResultCount {
                op: decl.kind.clone(),
                expected: schema.num_results(),
                found: outputs.len(),
            });
        }
        verify_result_attrs(schema, &decl.attrs, capture_kinds)?;

        let inputs = inputs
            .iter()
            .map(|tensor| resolve(&tensor_names[tensor.index()], &produced))
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, tensor) in outputs.iter().enumerate() {
            let name = tensor_names[tensor.index()].as_str();
            if produced.contains_key(name) {
                return Err(RuleError::TensorProducedTwice {
                    name: name.to_string(),
                });
            }
            if source_names.contains_key(name) && !anchor_outputs.contains(name) {
                return Err(RuleError::RedefinesSourceTensor {
                    name: name.to_string(),
                });
            }
            produced.insert(name, ResultValue::Produced { op: index, index: slot });
        }
        result_ops.push(ResultOp {
            schema: schema.clone(),
            attrs: decl.attrs.clone(),
            inputs,
        });
    }

    for (output, input) in &forwards {
        check_slots(&[*input], &[*output], tensor_names.len())?;
        let output = tensor_names[output.index()].as_str();
        if produced.contains_key(output) {
            return Err(RuleError::TensorProducedTwice {
                name: output.to_string(),
            });
        }
        if !anchor_outputs.contains(output) {
            return Err(RuleError::RedefinesSourceTensor {
                name: output.to_string(),
            });
        }
        let value = resolve(&tensor_names[input.index()], &produced)?;
        produced.insert(output, value);
    }

    let outputs = anchor
        .outputs
        .iter()
        .map(|tensor| {
            let name = tensors[tensor.index()].name.as_str();
            produced
                .get(name)
                .copied()
                .ok_or_else(|| RuleError::MissingResultOutput {
                    name: name.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((result_ops, outputs))
}

fn verify_result_attrs(
    schema: &OpSchema,
    attrs: &[(String, ResultAttr)],
    capture_kinds: &HashMap<Arc<str>, AttrKind>,
) -> Result<(), RuleError> {
    for (attr, value) in attrs {
        let expected = schema
            .attr_kind(attr)
            .ok_or_else(|| RegistryError::UnknownAttribute {
                op: schema.name().to_string(),
                attr: attr.clone(),
            })?;
        let found = match value {
            ResultAttr::Captured(slot) => {
                *capture_kinds
                    .get(slot)
                    .ok_or_else(|| RuleError::UnboundAttribute {
                        name: slot.to_string(),
                    })?
            }
            ResultAttr::Constant(literal) => literal.kind(),
            ResultAttr::Computed(_) => continue,
        };
        if found != expected {
            return Err(RegistryError::AttrTypeMismatch {
                op: schema.name().to_string(),
                attr: attr.clone(),
                expected,
                found,
            }
            .into());
        }
    }
    for required in schema.attr_names() {
        if !attrs.iter().any(|(attr, _)| attr == required) {
            return Err(RegistryError::MissingAttribute {
                op: schema.name().to_string(),
                attr: required.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Read access to the bindings of a successful match.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pattern: &'a DrrPattern,
    bindings: &'a BindingTable,
    anchor: OpId,
}

impl<'a> MatchContext<'a> {
    pub(crate) fn new(pattern: &'a DrrPattern, bindings: &'a BindingTable, anchor: OpId) -> Self {
        Self {
            pattern,
            bindings,
            anchor,
        }
    }

    pub fn pattern_name(&self) -> &str {
        &self.pattern.name
    }

    /// Concrete root operation of the match.
    pub fn anchor(&self) -> OpId {
        self.anchor
    }

    pub fn attr(&self, name: &str) -> Option<&'a Attribute> {
        self.bindings.attr(name)
    }

    /// Value bound to the source tensor called `name`.
    pub fn tensor(&self, name: &str) -> Option<ValueId> {
        let id = self.pattern.tensor_names.get(name)?;
        self.bindings.tensor(*id)
    }

    pub fn op(&self, template: SourceOpId) -> Option<OpId> {
        self.bindings.op(template)
    }

    pub fn bindings(&self) -> &'a BindingTable {
        self.bindings
    }
}

/// Attribute dictionary assembled for one result operation.
pub(crate) type ResolvedAttrs = BTreeMap<String, Attribute>;
