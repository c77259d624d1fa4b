use std::collections::HashSet;

use tracing::trace;

use crate::ir::{OpId, Region, ValueDef};
use crate::pattern::binding::BindingTable;
use crate::pattern::drr::{AttrConstraint, DrrPattern, MatchContext, SourceOpId, TensorId};

impl DrrPattern {
    /// Matches the source pattern with `root` as its anchor.
    ///
    /// Returns the filled binding table on success. The region is never
    /// touched.
    pub fn match_root(&self, root: OpId, region: &Region) -> Option<BindingTable> {
        let mut bindings = BindingTable::new();
        self.match_into(root, region, &mut bindings)
            .then_some(bindings)
    }

    /// Matches into a caller-provided table. On failure the table is rolled
    /// back to its state on entry.
    pub fn match_into(&self, root: OpId, region: &Region, bindings: &mut BindingTable) -> bool {
        let checkpoint = bindings.checkpoint();
        let matched = self.match_structure(root, region, bindings)
            && self.match_is_closed(region, bindings)
            && self.constraints_hold(root, bindings);
        if !matched {
            bindings.rollback(checkpoint);
        }
        matched
    }

    fn match_structure(&self, root: OpId, region: &Region, bindings: &mut BindingTable) -> bool {
        if !bindings.bind_op(self.anchor, root) {
            return false;
        }
        let mut worklist: Vec<(SourceOpId, OpId)> = vec![(self.anchor, root)];
        while let Some((template_id, op_id)) = worklist.pop() {
            let template = self.source_op(template_id);
            let Some(op) = region.get(op_id) else {
                return false;
            };
            if op.name() != template.kind
                || op.operands().len() != template.inputs.len()
                || op.results().len() != template.outputs.len()
            {
                return false;
            }

            for (name, constraint) in &template.attrs {
                let Some(actual) = op.attr(name) else {
                    return false;
                };
                let ok = match constraint {
                    AttrConstraint::Capture(slot) => bindings.bind_attr(slot, actual),
                    AttrConstraint::Equals(expected) => actual == expected,
                };
                if !ok {
                    trace!(pattern = %self.name, op = %op_id, attr = %name, "attribute mismatch");
                    return false;
                }
            }

            for (tensor, value) in template.outputs.iter().zip(op.results()) {
                if !bindings.bind_tensor(*tensor, *value) {
                    return false;
                }
            }

            for (tensor, value) in template.inputs.iter().zip(op.operands()) {
                if !bindings.bind_tensor(*tensor, *value) {
                    return false;
                }
                let Some((producer, index)) = self.tensor_info(*tensor).producer else {
                    continue;
                };
                let Some(ValueDef::Result {
                    op: def_op,
                    index: def_index,
                }) = region.def_of(*value)
                else {
                    return false;
                };
                if def_index as usize != index {
                    return false;
                }
                match bindings.op(producer) {
                    Some(bound) if bound == def_op => {}
                    Some(_) => return false,
                    None => {
                        if !bindings.bind_op(producer, def_op) {
                            return false;
                        }
                        worklist.push((producer, def_op));
                    }
                }
            }
        }
        true
    }

    /// Intermediate results must stay inside the match, and no pattern input
    /// may be produced by a matched operation.
    fn match_is_closed(&self, region: &Region, bindings: &BindingTable) -> bool {
        let matched: HashSet<OpId> = bindings.bound_ops().into_iter().collect();
        let anchor = bindings.op(self.anchor);
        for op_id in &matched {
            if Some(*op_id) == anchor {
                continue;
            }
            let Some(op) = region.get(*op_id) else {
                return false;
            };
            for result in op.results() {
                if region.outputs().contains(result) {
                    return false;
                }
                if region
                    .users_of(*result)
                    .iter()
                    .any(|user| !matched.contains(&user.op))
                {
                    trace!(pattern = %self.name, op = %op_id, "intermediate escapes the match");
                    return false;
                }
            }
        }
        for (index, tensor) in self.tensors.iter().enumerate() {
            if tensor.producer.is_some() {
                continue;
            }
            let Some(value) = bindings.tensor(TensorId(index as u32)) else {
                continue;
            };
            if let Some(producer) = region.producer_of(value) {
                if matched.contains(&producer) {
                    return false;
                }
            }
        }
        true
    }

    fn constraints_hold(&self, root: OpId, bindings: &BindingTable) -> bool {
        let ctx = MatchContext::new(self, bindings, root);
        for (name, predicate) in &self.constraints {
            if !predicate(&ctx) {
                trace!(
                    pattern = %self.name,
                    constraint = %name,
                    "native constraint rejected match"
                );
                return false;
            }
        }
        true
    }
}
