use crate::ir::{GraphError, OpId, Operation, OperationState, Region, ValueId};

/// Mutable region editor that records which operations a rewrite created and erased.
///
/// The greedy driver reads the records back after each rewrite to decide
/// which operations to revisit and which queued entries to drop.
pub struct RegionRewriter<'a> {
    region: &'a mut Region,
    inserted: Vec<OpId>,
    erased: Vec<OpId>,
}

impl<'a> RegionRewriter<'a> {
    pub fn new(region: &'a mut Region) -> Self {
        Self {
            region,
            inserted: Vec::new(),
            erased: Vec::new(),
        }
    }

    pub fn region(&self) -> &Region {
        self.region
    }

    /// Returns the operation referenced by `op`.
    pub fn op(&self, op: OpId) -> Result<&Operation, GraphError> {
        self.region.op(op)
    }

    pub fn ops_in_order(&self) -> Vec<OpId> {
        self.region.ops_in_order()
    }

    /// Inserts a new operation before `at`, returning its identifier.
    pub fn insert_before(&mut self, at: OpId, state: OperationState) -> Result<OpId, GraphError> {
        let op = self.region.insert_before(at, state)?;
        self.inserted.push(op);
        Ok(op)
    }

    /// Rewires the results of `op` to `values`, position for position.
    pub fn replace_op_results(&mut self, op: OpId, values: &[ValueId]) -> Result<(), GraphError> {
        let results = self.region.op(op)?.results().to_vec();
        for (from, to) in results.into_iter().zip(values.iter().copied()) {
            self.region.replace_all_uses(from, to)?;
        }
        Ok(())
    }

    /// Erases the operation identified by `op`; its results must be unused.
    pub fn erase_op(&mut self, op: OpId) -> Result<(), GraphError> {
        self.region.erase_op(op)?;
        self.erased.push(op);
        Ok(())
    }

    /// Operations inserted since the last call, in insertion order.
    pub fn take_inserted(&mut self) -> Vec<OpId> {
        std::mem::take(&mut self.inserted)
    }

    /// Operations erased since the last call.
    pub fn take_erased(&mut self) -> Vec<OpId> {
        std::mem::take(&mut self.erased)
    }

    /// Verifies basic SSA invariants after mutations.
    pub fn verify(&self) -> Result<(), GraphError> {
        self.region.verify()
    }
}
