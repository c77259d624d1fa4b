//! Declarative rewrite rules over a tensor-program IR.
//!
//! Rules are written as a [`pattern::SourcePattern`] / [`pattern::ResultPattern`]
//! pair, validated into an immutable [`pattern::DrrPattern`] and applied to a
//! [`ir::Region`] by the greedy driver until a fixpoint or an iteration cap.

pub mod driver;
mod env;
pub mod ir;
pub mod passes;
pub mod pattern;
pub mod rewriter;

pub use driver::{
    apply_patterns_greedily, DriverState, GreedyRewriteConfig, GreedyRewriteStats, RewriteError,
    Traversal,
};
pub use ir::{Attribute, OpRegistry, Program, Region};
pub use pattern::{DrrPattern, FrozenPatternSet, PatternSet, RewritePattern, RuleError};
pub use rewriter::RegionRewriter;

/// Parses a region written in the text form, panicking on malformed input.
///
/// ```
/// let region = drr_rs::drr_region!(
///     "region(%x) {
///        yield %x
///      }"
/// );
/// assert_eq!(region.inputs().len(), 1);
/// ```
#[macro_export]
macro_rules! drr_region {
    ($src:expr) => {
        match $crate::ir::text_ir::parse_region($src) {
            Ok(region) => region,
            Err(err) => panic!("invalid region text: {err}"),
        }
    };
}
