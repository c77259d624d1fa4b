use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, debug_span, trace, warn};

use crate::env;
use crate::ir::{GraphError, OpId, OpRegistry, Region};
use crate::pattern::{BindingTable, FrozenPatternSet, RuleError};
use crate::rewriter::RegionRewriter;

/// Order in which a pass visits the operations of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Traversal {
    #[default]
    TopDown,
    BottomUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyRewriteConfig {
    pub traversal: Traversal,
    /// Upper bound on full passes over the region.
    pub max_iterations: usize,
    /// Generations of operations created within a pass that the same pass
    /// revisits. Newer generations wait for the next pass.
    pub cascade_depth: usize,
    /// Erase unused, side-effect-free operations once rewriting stops.
    pub enable_dce: bool,
}

impl Default for GreedyRewriteConfig {
    fn default() -> Self {
        Self {
            traversal: Traversal::TopDown,
            max_iterations: 10,
            cascade_depth: 4,
            enable_dce: false,
        }
    }
}

impl GreedyRewriteConfig {
    pub fn with_traversal(mut self, traversal: Traversal) -> Self {
        self.traversal = traversal;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cascade_depth(mut self, cascade_depth: usize) -> Self {
        self.cascade_depth = cascade_depth;
        self
    }

    pub fn with_dce(mut self, enable_dce: bool) -> Self {
        self.enable_dce = enable_dce;
        self
    }

    /// Applies `DRR_MAX_ITERATIONS` and `DRR_TRAVERSAL` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(max_iterations) = env::max_iterations_override() {
            self.max_iterations = max_iterations;
        }
        if let Some(traversal) = env::traversal_override() {
            self.traversal = traversal;
        }
        self
    }
}

/// Driver states. `Converged` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DriverState {
    #[default]
    Scanning,
    Matching,
    Rewriting,
    Converged,
    Exhausted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    /// Full passes started over the region.
    pub passes: usize,
    pub rewrites: usize,
    pub dce_removed: usize,
    pub state: DriverState,
}

impl GreedyRewriteStats {
    pub fn converged(&self) -> bool {
        self.state == DriverState::Converged
    }
}

/// Fatal failures while applying patterns. Exhausting the iteration budget
/// is not one of them.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("pattern `{pattern}` failed to rewrite at {root}")]
    Rule {
        pattern: String,
        root: OpId,
        #[source]
        source: RuleError,
    },
    #[error("region is malformed after pattern `{pattern}` rewrote {root}")]
    Malformed {
        pattern: String,
        root: OpId,
        #[source]
        source: GraphError,
    },
}

struct Driver<'p, 'r> {
    patterns: &'p FrozenPatternSet,
    config: &'p GreedyRewriteConfig,
    rewriter: RegionRewriter<'r>,
    bindings: BindingTable,
    state: DriverState,
    stats: GreedyRewriteStats,
}

/// Applies `patterns` over `region` until a pass rewrites nothing or
/// `config.max_iterations` passes have run.
///
/// At each visited operation the first pattern (in registration order) that
/// matches is applied. Operations created by a rewrite are visited right
/// after it, up to `config.cascade_depth` generations per pass. Nested
/// regions are not entered.
pub fn apply_patterns_greedily(
    region: &mut Region,
    patterns: &FrozenPatternSet,
    config: &GreedyRewriteConfig,
) -> Result<GreedyRewriteStats, RewriteError> {
    let span = debug_span!(
        "apply_patterns_greedily",
        traversal = ?config.traversal,
        max_iterations = config.max_iterations,
        patterns = patterns.len(),
    );
    let _guard = span.enter();

    let mut driver = Driver {
        patterns,
        config,
        rewriter: RegionRewriter::new(region),
        bindings: BindingTable::new(),
        state: DriverState::Scanning,
        stats: GreedyRewriteStats::default(),
    };

    while driver.stats.passes < config.max_iterations {
        driver.stats.passes += 1;
        let applied = driver.run_pass()?;
        trace!(pass = driver.stats.passes, applied, "pass finished");
        if applied == 0 {
            driver.transition(DriverState::Converged);
            break;
        }
    }
    if driver.state != DriverState::Converged {
        driver.transition(DriverState::Exhausted);
        warn!(
            passes = driver.stats.passes,
            rewrites = driver.stats.rewrites,
            "greedy rewrite did not converge within the iteration budget"
        );
    }

    if config.enable_dce {
        driver.stats.dce_removed = run_dce(&mut driver.rewriter);
    }
    driver.stats.state = driver.state;
    debug!(
        passes = driver.stats.passes,
        rewrites = driver.stats.rewrites,
        dce_removed = driver.stats.dce_removed,
        state = ?driver.stats.state,
        "greedy rewrite finished"
    );
    Ok(driver.stats)
}

impl<'p, 'r> Driver<'p, 'r> {
    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "driver transition");
            self.state = next;
        }
    }

    fn seed(&self) -> VecDeque<(OpId, usize)> {
        let order = self.rewriter.ops_in_order();
        match self.config.traversal {
            Traversal::TopDown => order.into_iter().map(|op| (op, 0)).collect(),
            Traversal::BottomUp => order.into_iter().rev().map(|op| (op, 0)).collect(),
        }
    }

    /// Runs one pass and returns the number of rewrites it applied.
    fn run_pass(&mut self) -> Result<usize, RewriteError> {
        let mut worklist = self.seed();
        let mut applied = 0;

        while let Some((op, generation)) = worklist.pop_front() {
            self.transition(DriverState::Scanning);
            let Ok(kind) = self.rewriter.op(op).map(|op| op.name().to_string()) else {
                continue;
            };

            self.transition(DriverState::Matching);
            let Some(pattern) = self.try_patterns(op, &kind)? else {
                continue;
            };

            self.transition(DriverState::Rewriting);
            applied += 1;
            self.stats.rewrites += 1;
            if cfg!(debug_assertions) {
                self.rewriter
                    .verify()
                    .map_err(|source| RewriteError::Malformed {
                        pattern: pattern.clone(),
                        root: op,
                        source,
                    })?;
            }

            let erased = self.rewriter.take_erased();
            if !erased.is_empty() {
                worklist.retain(|(queued, _)| !erased.contains(queued));
            }
            let inserted = self.rewriter.take_inserted();
            if generation < self.config.cascade_depth {
                let next = generation + 1;
                let revisit: Vec<OpId> = match self.config.traversal {
                    Traversal::TopDown => inserted.into_iter().rev().collect(),
                    Traversal::BottomUp => inserted,
                };
                for created in revisit {
                    worklist.push_front((created, next));
                }
            } else if !inserted.is_empty() {
                trace!(
                    pattern = %pattern,
                    deferred = inserted.len(),
                    "cascade depth reached; deferring new operations to the next pass"
                );
            }
        }
        Ok(applied)
    }

    /// Returns the name of the first pattern that rewrote `op`.
    fn try_patterns(&mut self, op: OpId, kind: &str) -> Result<Option<String>, RewriteError> {
        let patterns = self.patterns;
        for (_, pattern) in patterns.matching(kind) {
            self.bindings.clear();
            let rewritten = pattern
                .match_and_rewrite(op, &mut self.rewriter, &mut self.bindings)
                .map_err(|source| RewriteError::Rule {
                    pattern: pattern.name().to_string(),
                    root: op,
                    source,
                })?;
            if rewritten {
                self.bindings.clear();
                return Ok(Some(pattern.name().to_string()));
            }
        }
        Ok(None)
    }
}

/// Erases operations whose results are all unused, repeating until nothing
/// changes. Side-effecting operations, operations of unregistered kinds and
/// operations without results are kept.
fn run_dce(rewriter: &mut RegionRewriter<'_>) -> usize {
    let registry = OpRegistry::global();
    let mut removed_total = 0;
    loop {
        for op in rewriter.ops_in_order().into_iter().rev() {
            let Ok(operation) = rewriter.op(op) else {
                continue;
            };
            let removable = match registry.schema(operation.name()) {
                Ok(schema) => !schema.is_side_effecting(),
                Err(_) => false,
            };
            if !removable || operation.results().is_empty() {
                continue;
            }
            if operation
                .results()
                .iter()
                .any(|result| rewriter.region().has_uses(*result))
            {
                continue;
            }
            if let Err(err) = rewriter.erase_op(op) {
                trace!(op = %op, error = %err, "dce skipped operation");
            }
        }
        let removed = rewriter.take_erased();
        if removed.is_empty() {
            break;
        }
        trace!(removed = removed.len(), "dce sweep");
        removed_total += removed.len();
    }
    removed_total
}
