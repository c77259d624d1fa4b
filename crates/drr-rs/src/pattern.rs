use std::collections::HashMap;

use smallvec::SmallVec;

use crate::ir::OpId;
use crate::rewriter::RegionRewriter;

mod apply;
mod binding;
mod drr;
mod matcher;

pub use binding::*;
pub use drr::*;

/// Base trait for rewrite patterns run by the greedy driver.
///
/// [`DrrPattern`] is the data-driven implementation; hand-written patterns
/// plug in at the same seam.
pub trait RewritePattern: Send + Sync {
    fn name(&self) -> &str;

    /// Operation kind the pattern is anchored on; `None` visits every operation.
    fn root_kind(&self) -> Option<&str> {
        None
    }

    /// Tries to rewrite at `root`. Returns `Ok(false)` when the pattern does
    /// not match, leaving both the region and `bindings` unchanged. `bindings`
    /// is scratch space the driver reuses between attempts.
    fn match_and_rewrite(
        &self,
        root: OpId,
        rewriter: &mut RegionRewriter<'_>,
        bindings: &mut BindingTable,
    ) -> Result<bool, RuleError>;
}

impl RewritePattern for DrrPattern {
    fn name(&self) -> &str {
        DrrPattern::name(self)
    }

    fn root_kind(&self) -> Option<&str> {
        Some(self.anchor_kind())
    }

    fn match_and_rewrite(
        &self,
        root: OpId,
        rewriter: &mut RegionRewriter<'_>,
        bindings: &mut BindingTable,
    ) -> Result<bool, RuleError> {
        if !self.match_into(root, rewriter.region(), bindings) {
            return Ok(false);
        }
        self.rewrite(root, bindings, rewriter)?;
        Ok(true)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
#[derive(Default)]
pub struct PatternSet {
    patterns: Vec<Box<dyn RewritePattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: RewritePattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn freeze(self) -> FrozenPatternSet {
        let mut by_kind: HashMap<String, Vec<usize>> = HashMap::new();
        let mut any_kind = Vec::new();
        for (index, pattern) in self.patterns.iter().enumerate() {
            match pattern.root_kind() {
                Some(kind) => by_kind.entry(kind.to_string()).or_default().push(index),
                None => any_kind.push(index),
            }
        }
        FrozenPatternSet {
            patterns: self.patterns,
            by_kind,
            any_kind,
        }
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
///
/// Patterns keep their registration order, which is also the order in which
/// the driver tries them at a candidate root.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn RewritePattern>>,
    by_kind: HashMap<String, Vec<usize>>,
    any_kind: Vec<usize>,
}

impl FrozenPatternSet {
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn RewritePattern)> {
        self.patterns.iter().enumerate().map(|(idx, p)| (idx, &**p))
    }

    /// Patterns that may apply at an operation of kind `kind`, in registration order.
    pub fn matching(&self, kind: &str) -> impl Iterator<Item = (usize, &dyn RewritePattern)> {
        let mut indices: SmallVec<[usize; 8]> = SmallVec::new();
        if let Some(kinded) = self.by_kind.get(kind) {
            indices.extend(kinded.iter().copied());
        }
        if !self.any_kind.is_empty() {
            indices.extend(self.any_kind.iter().copied());
            indices.sort_unstable();
        }
        indices
            .into_iter()
            .map(move |idx| (idx, &*self.patterns[idx]))
    }
}
