//! Pass infrastructure driving pattern sets over a program.

mod pd_to_cinn;

use anyhow::{Context, Result};
use tracing::{debug, info_span};

use crate::driver::GreedyRewriteStats;
use crate::ir::{OpRegistry, Operation, Program};

pub use pd_to_cinn::{
    max_op_pattern, pd_op_to_cinn_op, sum_op_pattern, uniform_op_pattern, PdOpToCinnOpPass,
};

/// Result returned by a [`Pass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Number of driver passes executed while applying the pass.
    pub iterations: usize,
    /// Total number of patterns applied by the pass.
    pub rewrites_applied: usize,
    /// Operations removed by dead-code elimination.
    pub erased_ops: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_ops: self.erased_ops + other.erased_ops,
        }
    }
}

impl From<GreedyRewriteStats> for PassResult {
    fn from(stats: GreedyRewriteStats) -> Self {
        PassResult {
            changed: stats.rewrites > 0 || stats.dce_removed > 0,
            iterations: stats.passes,
            rewrites_applied: stats.rewrites,
            erased_ops: stats.dce_removed,
        }
    }
}

/// Unit of work run by the [`PassManager`] on the top-level module operation.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Builds whatever the pass needs from the registry. Called once before
    /// the first run.
    fn initialize(&mut self, registry: &OpRegistry) -> Result<()> {
        let _ = registry;
        Ok(())
    }

    fn can_apply_on(&self, op: &Operation) -> bool {
        let _ = op;
        true
    }

    fn run(&mut self, op: &mut Operation) -> Result<PassResult>;
}

struct PassEntry {
    pass: Box<dyn Pass>,
    initialized: bool,
}

/// Ordered list of passes run over a [`Program`].
#[derive(Default)]
pub struct PassManager {
    passes: Vec<PassEntry>,
    registry: Option<OpRegistry>,
}

impl PassManager {
    /// Manager resolving operation kinds through [`OpRegistry::global`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: OpRegistry) -> Self {
        Self {
            passes: Vec::new(),
            registry: Some(registry),
        }
    }

    pub fn registry(&self) -> &OpRegistry {
        match &self.registry {
            Some(registry) => registry,
            None => OpRegistry::global(),
        }
    }

    pub fn add_pass<P>(&mut self, pass: P) -> &mut Self
    where
        P: Pass + 'static,
    {
        self.passes.push(PassEntry {
            pass: Box::new(pass),
            initialized: false,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass in order on the program's module. Passes whose
    /// `can_apply_on` rejects the module are skipped.
    pub fn run(&mut self, program: &mut Program) -> Result<PassResult> {
        let registry = match &self.registry {
            Some(registry) => registry,
            None => OpRegistry::global(),
        };
        let mut total = PassResult::default();
        for entry in &mut self.passes {
            let name = entry.pass.name();
            let span = info_span!("pass", name);
            let _guard = span.enter();

            if !entry.initialized {
                entry
                    .pass
                    .initialize(registry)
                    .with_context(|| format!("failed to initialize pass `{name}`"))?;
                entry.initialized = true;
            }
            if !entry.pass.can_apply_on(program.module()) {
                debug!("pass does not apply to the module; skipping");
                continue;
            }
            let result = entry
                .pass
                .run(program.module_mut())
                .with_context(|| format!("pass `{name}` failed"))?;
            debug!(
                changed = result.changed,
                iterations = result.iterations,
                rewrites = result.rewrites_applied,
                "pass finished"
            );
            total = total.merge(result);
        }
        Ok(total)
    }
}
