use anyhow::{anyhow, Result};

use crate::driver::{apply_patterns_greedily, GreedyRewriteConfig, Traversal};
use crate::ir::dialect::{cinn, pd, MODULE};
use crate::ir::{OpRegistry, Operation, Program};
use crate::pattern::{
    capture, DrrPattern, FrozenPatternSet, PatternSet, ResultAttr, ResultPattern, RuleError,
    SourcePattern,
};

use super::{Pass, PassManager, PassResult};

/// `pd_op.sum(x, pd_op.full_int_array)` to `cinn_op.reduce_sum(x)`.
pub fn sum_op_pattern(registry: &OpRegistry) -> Result<DrrPattern, RuleError> {
    let mut src = SourcePattern::new();
    let full_int_array = src.op(
        pd::FULL_INT_ARRAY,
        [
            ("value", capture("axis_info")),
            ("dtype", capture("dtype_2")),
            ("place", capture("place_2")),
        ],
    );
    let sum = src.op(
        pd::SUM,
        [("dtype", capture("dtype")), ("keepdim", capture("keep_dim"))],
    );
    let axis = src.apply_single(full_int_array, &[]);
    let arg0 = src.tensor("arg0");
    let ret = src.tensor("ret");
    src.apply(sum, &[arg0, axis], &[ret]);

    let mut res = ResultPattern::new();
    let reduce_sum = res.op(
        cinn::REDUCE_SUM,
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce_sum, &[arg0], &[ret]);

    DrrPattern::build("SumOpPattern", src, res, registry)
}

/// `pd_op.max(x, pd_op.full_int_array)` to `cinn_op.reduce_max(x)`.
pub fn max_op_pattern(registry: &OpRegistry) -> Result<DrrPattern, RuleError> {
    let mut src = SourcePattern::new();
    let full_int_array = src.op(
        pd::FULL_INT_ARRAY,
        [
            ("value", capture("axis_info")),
            ("dtype", capture("dtype_2")),
            ("place", capture("place_2")),
        ],
    );
    let max = src.op(pd::MAX, [("keepdim", capture("keep_dim"))]);
    let axis = src.apply_single(full_int_array, &[]);
    let arg0 = src.tensor("arg0");
    let ret = src.tensor("ret");
    src.apply(max, &[arg0, axis], &[ret]);

    let mut res = ResultPattern::new();
    let reduce_max = res.op(
        cinn::REDUCE_MAX,
        [
            ("dim", ResultAttr::captured("axis_info")),
            ("keep_dim", ResultAttr::captured("keep_dim")),
        ],
    );
    let arg0 = res.tensor("arg0");
    let ret = res.tensor("ret");
    res.apply(reduce_max, &[arg0], &[ret]);

    DrrPattern::build("MaxOpPattern", src, res, registry)
}

/// `pd_op.uniform(full_int_array, full, full)` to a single
/// `cinn_op.uniform_random` carrying the attributes of all four producers.
///
/// The diagonal attributes reuse the captured seed and minimum as written;
/// the rule is not part of [`PdOpToCinnOpPass`].
pub fn uniform_op_pattern(registry: &OpRegistry) -> Result<DrrPattern, RuleError> {
    let mut src = SourcePattern::new();
    let full_int_array = src.op(
        pd::FULL_INT_ARRAY,
        [
            ("value", capture("axis_info")),
            ("dtype", capture("dtype_2")),
            ("place", capture("place_2")),
        ],
    );
    let min_full = src.op(
        pd::FULL,
        [
            ("shape", capture("shape1")),
            ("value", capture("min_value")),
            ("dtype", capture("dtype_min")),
            ("place", capture("place_min")),
        ],
    );
    let max_full = src.op(
        pd::FULL,
        [
            ("shape", capture("shape2")),
            ("value", capture("max_value")),
            ("dtype", capture("dtype_max")),
            ("place", capture("place_max")),
        ],
    );
    let uniform = src.op(
        pd::UNIFORM,
        [
            ("dtype", capture("uniform_dtype")),
            ("place", capture("uniform_place")),
            ("seed", capture("seed")),
        ],
    );
    let shape = src.apply_single(full_int_array, &[]);
    let min = src.apply_single(min_full, &[]);
    let max = src.apply_single(max_full, &[]);
    let ret = src.tensor("ret");
    src.apply(uniform, &[shape, min, max], &[ret]);

    let mut res = ResultPattern::new();
    let uniform_random = res.op(
        cinn::UNIFORM_RANDOM,
        [
            ("shape", ResultAttr::captured("axis_info")),
            ("min", ResultAttr::captured("min_value")),
            ("max", ResultAttr::captured("max_value")),
            ("seed", ResultAttr::captured("seed")),
            ("dtype", ResultAttr::captured("uniform_dtype")),
            ("diag_num", ResultAttr::captured("seed")),
            ("diag_step", ResultAttr::captured("seed")),
            ("diag_val", ResultAttr::captured("min_value")),
        ],
    );
    let ret = res.tensor("ret");
    res.apply(uniform_random, &[], &[ret]);

    DrrPattern::build("UniformOpPattern", src, res, registry)
}

/// Lowers `pd_op` reductions to their `cinn_op` counterparts.
pub struct PdOpToCinnOpPass {
    config: GreedyRewriteConfig,
    patterns: Option<FrozenPatternSet>,
}

impl PdOpToCinnOpPass {
    const NAME: &'static str = "pd_to_cinn_pass";

    pub fn new() -> Self {
        Self::with_config(
            GreedyRewriteConfig::default()
                .with_traversal(Traversal::TopDown)
                .with_max_iterations(10),
        )
    }

    pub fn with_config(config: GreedyRewriteConfig) -> Self {
        Self {
            config,
            patterns: None,
        }
    }

    pub fn config(&self) -> &GreedyRewriteConfig {
        &self.config
    }
}

impl Default for PdOpToCinnOpPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for PdOpToCinnOpPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self, registry: &OpRegistry) -> Result<()> {
        let mut patterns = PatternSet::new();
        patterns
            .add(sum_op_pattern(registry)?)
            .add(max_op_pattern(registry)?);
        self.patterns = Some(patterns.freeze());
        Ok(())
    }

    fn can_apply_on(&self, op: &Operation) -> bool {
        op.name() == MODULE && op.num_regions() > 0
    }

    fn run(&mut self, op: &mut Operation) -> Result<PassResult> {
        let patterns = self
            .patterns
            .as_ref()
            .ok_or_else(|| anyhow!("`{}` ran before initialization", Self::NAME))?;
        let region = op
            .regions_mut()
            .first_mut()
            .ok_or_else(|| anyhow!("module has no body region"))?;
        let stats = apply_patterns_greedily(region, patterns, &self.config)?;
        Ok(stats.into())
    }
}

/// Runs [`PdOpToCinnOpPass`] over `program`.
pub fn pd_op_to_cinn_op(program: &mut Program) -> Result<PassResult> {
    let mut pm = PassManager::new();
    pm.add_pass(PdOpToCinnOpPass::new());
    pm.run(program)
}
