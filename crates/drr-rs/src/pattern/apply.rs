use tracing::debug;

use crate::ir::{OpId, RegistryError, ValueId};
use crate::pattern::binding::BindingTable;
use crate::pattern::drr::{
    DrrPattern, MatchContext, ResolvedAttrs, ResultAttr, ResultValue, RuleError,
};
use crate::rewriter::RegionRewriter;

impl DrrPattern {
    /// Replaces the subgraph matched at `root` by the result pattern.
    ///
    /// Every result operation is resolved and validated before the region is
    /// touched. Result operations are inserted before the root in declared
    /// order, root outputs are rewired position by position, and the matched
    /// operations are erased consumers first. Returns the values that now
    /// stand in for the root outputs.
    pub fn rewrite(
        &self,
        root: OpId,
        bindings: &BindingTable,
        rewriter: &mut RegionRewriter<'_>,
    ) -> Result<Vec<ValueId>, RuleError> {
        let ctx = MatchContext::new(self, bindings, root);
        let attrs = self.resolve_attrs(&ctx)?;
        for value in self
            .result_ops
            .iter()
            .flat_map(|op| op.inputs.iter())
            .chain(&self.outputs)
        {
            if let ResultValue::Source(_) = value {
                self.resolve_value(*value, bindings, &[])?;
            }
        }

        let replacements = match self.insert_results(root, attrs, bindings, rewriter) {
            Ok(replacements) => replacements,
            Err(err) => {
                self.undo_inserts(rewriter);
                return Err(err);
            }
        };
        rewriter.replace_op_results(root, &replacements)?;

        let mut matched = bindings.bound_ops();
        let region = rewriter.region();
        matched.sort_by_key(|op| std::cmp::Reverse(region.position(*op)));
        for op in matched {
            rewriter.erase_op(op)?;
        }
        debug!(
            pattern = %self.name,
            root = %root,
            created = self.result_ops.len(),
            erased = self.source_ops.len(),
            "applied rewrite"
        );
        Ok(replacements)
    }

    /// Inserts the result operations before `root` and resolves the values
    /// that replace its outputs. On error the caller undoes the inserts.
    fn insert_results(
        &self,
        root: OpId,
        attrs: Vec<ResolvedAttrs>,
        bindings: &BindingTable,
        rewriter: &mut RegionRewriter<'_>,
    ) -> Result<Vec<ValueId>, RuleError> {
        let mut produced: Vec<Vec<ValueId>> = Vec::with_capacity(self.result_ops.len());
        for (op, attrs) in self.result_ops.iter().zip(attrs) {
            let operands = op
                .inputs
                .iter()
                .map(|input| self.resolve_value(*input, bindings, &produced))
                .collect::<Result<Vec<_>, _>>()?;
            let state = op
                .schema
                .build_state(attrs, operands)
                .map_err(|source| self.construction_error(op.schema.name(), source))?;
            let id = rewriter.insert_before(root, state)?;
            produced.push(rewriter.op(id)?.results().to_vec());
        }
        self.outputs
            .iter()
            .map(|output| self.resolve_value(*output, bindings, &produced))
            .collect()
    }

    fn resolve_attrs(&self, ctx: &MatchContext<'_>) -> Result<Vec<ResolvedAttrs>, RuleError> {
        let mut resolved = Vec::with_capacity(self.result_ops.len());
        for op in &self.result_ops {
            let mut attrs = ResolvedAttrs::new();
            for (name, source) in &op.attrs {
                let value = match source {
                    ResultAttr::Captured(slot) => ctx
                        .attr(slot)
                        .cloned()
                        .ok_or_else(|| RuleError::UnboundAttribute {
                            name: slot.to_string(),
                        })?,
                    ResultAttr::Constant(attr) => attr.clone(),
                    ResultAttr::Computed(compute) => compute(ctx),
                };
                attrs.insert(name.clone(), value);
            }
            op.schema
                .verify_attrs(&attrs)
                .map_err(|source| self.construction_error(op.schema.name(), source))?;
            resolved.push(attrs);
        }
        Ok(resolved)
    }

    fn resolve_value(
        &self,
        value: ResultValue,
        bindings: &BindingTable,
        produced: &[Vec<ValueId>],
    ) -> Result<ValueId, RuleError> {
        match value {
            ResultValue::Source(tensor) => {
                bindings
                    .tensor(tensor)
                    .ok_or_else(|| RuleError::UnboundTensor {
                        name: self.tensor_info(tensor).name.clone(),
                    })
            }
            ResultValue::Produced { op, index } => produced
                .get(op)
                .and_then(|results| results.get(index))
                .copied()
                .ok_or_else(|| RuleError::ResultOrder {
                    name: format!("result #{index} of result operation #{op}"),
                }),
        }
    }

    /// Erases result operations inserted by a rewrite that could not finish.
    /// Nothing outside the rewrite uses them yet, so erasing in reverse
    /// insertion order always succeeds.
    fn undo_inserts(&self, rewriter: &mut RegionRewriter<'_>) {
        let inserted = rewriter.take_inserted();
        for op in inserted.into_iter().rev() {
            if let Err(err) = rewriter.erase_op(op) {
                debug!(pattern = %self.name, op = %op, error = %err, "failed to undo insert");
            }
        }
        rewriter.take_erased();
    }

    fn construction_error(&self, op: &str, source: RegistryError) -> RuleError {
        RuleError::Construction {
            pattern: self.name.clone(),
            op: op.to_string(),
            source,
        }
    }
}
