//! Operation kinds known to the built-in registry.

use crate::ir::attr::AttrKind;
use crate::ir::registry::{Arity, OpRegistry, OpSchema};

pub const MODULE: &str = "builtin.module";

pub mod pd {
    pub const FULL_INT_ARRAY: &str = "pd_op.full_int_array";
    pub const FULL: &str = "pd_op.full";
    pub const SUM: &str = "pd_op.sum";
    pub const MAX: &str = "pd_op.max";
    pub const UNIFORM: &str = "pd_op.uniform";
}

pub mod cinn {
    pub const REDUCE_SUM: &str = "cinn_op.reduce_sum";
    pub const REDUCE_MAX: &str = "cinn_op.reduce_max";
    pub const UNIFORM_RANDOM: &str = "cinn_op.uniform_random";
}

pub(crate) fn register_builtin(registry: &mut OpRegistry) {
    registry.register(OpSchema::new(MODULE).results(0).regions(1));
}

pub(crate) fn register_pd_ops(registry: &mut OpRegistry) {
    registry
        .register(
            OpSchema::new(pd::FULL_INT_ARRAY)
                .attr("value", AttrKind::IntArray)
                .attr("dtype", AttrKind::DataType)
                .attr("place", AttrKind::Place),
        )
        .register(
            OpSchema::new(pd::FULL)
                .attr("shape", AttrKind::IntArray)
                .attr("value", AttrKind::F64)
                .attr("dtype", AttrKind::DataType)
                .attr("place", AttrKind::Place),
        )
        .register(
            OpSchema::new(pd::SUM)
                .attr("dtype", AttrKind::DataType)
                .attr("keepdim", AttrKind::Bool)
                .operands(Arity::Exactly(2)),
        )
        .register(
            OpSchema::new(pd::MAX)
                .attr("keepdim", AttrKind::Bool)
                .operands(Arity::Exactly(2)),
        )
        .register(
            OpSchema::new(pd::UNIFORM)
                .attr("dtype", AttrKind::DataType)
                .attr("place", AttrKind::Place)
                .attr("seed", AttrKind::I32)
                .operands(Arity::Exactly(3))
                .side_effecting(),
        );
}

pub(crate) fn register_cinn_ops(registry: &mut OpRegistry) {
    registry
        .register(
            OpSchema::new(cinn::REDUCE_SUM)
                .attr("dim", AttrKind::IntArray)
                .attr("keep_dim", AttrKind::Bool)
                .operands(Arity::Exactly(1)),
        )
        .register(
            OpSchema::new(cinn::REDUCE_MAX)
                .attr("dim", AttrKind::IntArray)
                .attr("keep_dim", AttrKind::Bool)
                .operands(Arity::Exactly(1)),
        )
        .register(
            // shape, min, max, seed, dtype, diag_num, diag_step, diag_val
            OpSchema::new(cinn::UNIFORM_RANDOM)
                .attr("shape", AttrKind::IntArray)
                .attr("min", AttrKind::F64)
                .attr("max", AttrKind::F64)
                .attr("seed", AttrKind::I32)
                .attr("dtype", AttrKind::DataType)
                .attr("diag_num", AttrKind::I32)
                .attr("diag_step", AttrKind::I32)
                .attr("diag_val", AttrKind::F64)
                .side_effecting(),
        );
}
