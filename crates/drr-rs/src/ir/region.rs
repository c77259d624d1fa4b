use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::ir::attr::Attribute;

/// Stable identifier of an operation inside one region. Never reused after erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

/// Stable identifier of a tensor value inside one region. Never reused after erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Definition site of a value (MLIR-style `BlockArgument | OpResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Region input at the given index.
    Input { index: u32 },
    /// Result `index` of operation `op`.
    Result { op: OpId, index: u32 },
}

/// One operand slot consuming a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpUse {
    pub op: OpId,
    pub operand: u32,
}

/// Operation node owned by a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    name: String,
    operands: Vec<ValueId>,
    results: Vec<ValueId>,
    attrs: BTreeMap<String, Attribute>,
    regions: Vec<Region>,
}

impl Operation {
    /// Builds an operation owned by no region, such as a top-level module.
    /// Detached operations have no operands or results.
    pub fn detached(
        name: impl Into<String>,
        attrs: BTreeMap<String, Attribute>,
        regions: Vec<Region>,
    ) -> Self {
        Self {
            name: name.into(),
            operands: Vec::new(),
            results: Vec::new(),
            attrs,
            regions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operands(&self) -> &[ValueId] {
        &self.operands
    }

    pub fn results(&self) -> &[ValueId] {
        &self.results
    }

    pub fn attrs(&self) -> &BTreeMap<String, Attribute> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Nested regions are isolated from this operation's parent, so handing
    /// them out mutably cannot break the parent's use lists.
    pub fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }
}

/// Everything needed to materialise a new operation in a region.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationState {
    pub name: String,
    pub operands: Vec<ValueId>,
    pub attrs: BTreeMap<String, Attribute>,
    pub num_results: usize,
    pub regions: Vec<Region>,
}

impl OperationState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operands: Vec::new(),
            attrs: BTreeMap::new(),
            num_results: 1,
            regions: Vec::new(),
        }
    }

    pub fn with_operands(mut self, operands: impl Into<Vec<ValueId>>) -> Self {
        self.operands = operands.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_results(mut self, count: usize) -> Self {
        self.num_results = count;
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OpSlot {
    op: Operation,
    version: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct ValueSlot {
    def: ValueDef,
    users: SmallVec<[OpUse; 4]>,
}

/// Single-entry, single-exit block of operations.
///
/// Operations and values live in arenas indexed by [`OpId`] / [`ValueId`].
/// Erased slots are tombstoned rather than recycled, so a stale identifier
/// can only ever resolve to "not found".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    ops: Vec<Option<OpSlot>>,
    values: Vec<Option<ValueSlot>>,
    order: Vec<OpId>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a region input and returns the value it defines.
    pub fn add_input(&mut self) -> ValueId {
        let index = self.inputs.len() as u32;
        let value = self.allocate_value(ValueDef::Input { index });
        self.inputs.push(value);
        value
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Values yielded by the region's exit.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn set_outputs(&mut self, outputs: Vec<ValueId>) -> Result<(), GraphError> {
        for value in &outputs {
            if !self.is_live_value(*value) {
                return Err(GraphError::UnknownValue(*value));
            }
        }
        self.outputs = outputs;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.slot(op).is_some()
    }

    pub fn get(&self, op: OpId) -> Option<&Operation> {
        self.slot(op).map(|slot| &slot.op)
    }

    pub fn op(&self, op: OpId) -> Result<&Operation, GraphError> {
        self.get(op).ok_or(GraphError::UnknownOp(op))
    }

    /// Mutable access to the nested regions of `op`.
    pub fn nested_region_mut(&mut self, op: OpId, index: usize) -> Option<&mut Region> {
        self.ops
            .get_mut(op.0 as usize)?
            .as_mut()?
            .op
            .regions
            .get_mut(index)
    }

    /// Returns the current version counter for an operation.
    pub fn version(&self, op: OpId) -> Option<u32> {
        self.slot(op).map(|slot| slot.version)
    }

    pub fn position(&self, op: OpId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == op)
    }

    pub fn ops_in_order(&self) -> Vec<OpId> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpId, &Operation)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|op| (*id, op)))
    }

    pub fn def_of(&self, value: ValueId) -> Option<ValueDef> {
        self.value_slot(value).map(|slot| slot.def)
    }

    /// Returns the operation producing `value`, or `None` for region inputs.
    pub fn producer_of(&self, value: ValueId) -> Option<OpId> {
        match self.def_of(value)? {
            ValueDef::Result { op, .. } => Some(op),
            ValueDef::Input { .. } => None,
        }
    }

    pub fn users_of(&self, value: ValueId) -> &[OpUse] {
        self.value_slot(value)
            .map(|slot| slot.users.as_slice())
            .unwrap_or(&[])
    }

    /// Operand uses plus region-output references.
    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.users_of(value).is_empty() || self.outputs.contains(&value)
    }

    pub fn is_live_value(&self, value: ValueId) -> bool {
        self.value_slot(value).is_some()
    }

    /// Appends an operation at the end of the region.
    pub fn push(&mut self, state: OperationState) -> Result<OpId, GraphError> {
        self.insert_at(self.order.len(), state)
    }

    /// Inserts an operation immediately before `at`.
    pub fn insert_before(&mut self, at: OpId, state: OperationState) -> Result<OpId, GraphError> {
        let pos = self.position(at).ok_or(GraphError::UnknownOp(at))?;
        self.insert_at(pos, state)
    }

    /// Rewires a single operand slot of `op` to `value`.
    pub fn set_operand(
        &mut self,
        op: OpId,
        index: usize,
        value: ValueId,
    ) -> Result<(), GraphError> {
        if !self.is_live_value(value) {
            return Err(GraphError::UnknownValue(value));
        }
        let old = {
            let slot = self.slot(op).ok_or(GraphError::UnknownOp(op))?;
            *slot
                .op
                .operands
                .get(index)
                .ok_or(GraphError::OperandOutOfRange { op, index })?
        };
        if old == value {
            return Ok(());
        }
        let target = OpUse {
            op,
            operand: index as u32,
        };
        if let Some(slot) = self.value_slot_mut(old) {
            slot.users.retain(|user| *user != target);
        }
        if let Some(slot) = self.value_slot_mut(value) {
            slot.users.push(target);
        }
        if let Some(slot) = self.slot_mut(op) {
            slot.op.operands[index] = value;
            slot.version = slot.version.wrapping_add(1);
        }
        Ok(())
    }

    /// Replaces every use of `from` (operands and region outputs) with `to`.
    ///
    /// Returns the number of rewired uses.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<usize, GraphError> {
        if !self.is_live_value(from) {
            return Err(GraphError::UnknownValue(from));
        }
        if !self.is_live_value(to) {
            return Err(GraphError::UnknownValue(to));
        }
        if from == to {
            return Ok(0);
        }

        let users: SmallVec<[OpUse; 4]> = self
            .value_slot_mut(from)
            .map(|slot| std::mem::take(&mut slot.users))
            .unwrap_or_default();
        let mut rewired = users.len();
        for user in &users {
            if let Some(slot) = self.slot_mut(user.op) {
                slot.op.operands[user.operand as usize] = to;
                slot.version = slot.version.wrapping_add(1);
            }
        }
        if let Some(slot) = self.value_slot_mut(to) {
            slot.users.extend(users);
        }

        for output in &mut self.outputs {
            if *output == from {
                *output = to;
                rewired += 1;
            }
        }
        Ok(rewired)
    }

    /// Erases `op`. Every result must be free of uses, region outputs included.
    pub fn erase_op(&mut self, op: OpId) -> Result<Operation, GraphError> {
        let slot = self.slot(op).ok_or(GraphError::UnknownOp(op))?;
        let live_uses: usize = slot
            .op
            .results
            .iter()
            .map(|result| {
                self.users_of(*result).len()
                    + self.outputs.iter().filter(|out| *out == result).count()
            })
            .sum();
        if live_uses > 0 {
            return Err(GraphError::LiveUses {
                op,
                name: slot.op.name.clone(),
                uses: live_uses,
            });
        }

        let slot = self.ops[op.0 as usize]
            .take()
            .ok_or(GraphError::UnknownOp(op))?;
        for (index, operand) in slot.op.operands.iter().enumerate() {
            let target = OpUse {
                op,
                operand: index as u32,
            };
            if let Some(value) = self.value_slot_mut(*operand) {
                value.users.retain(|user| *user != target);
            }
        }
        for result in &slot.op.results {
            self.values[result.0 as usize] = None;
        }
        self.order.retain(|candidate| *candidate != op);
        Ok(slot.op)
    }

    /// Checks structural invariants: live operands defined before use,
    /// consistent use lists, live outputs.
    pub fn verify(&self) -> Result<(), GraphError> {
        let mut defined: HashSet<ValueId> = self.inputs.iter().copied().collect();
        let mut expected_users: HashMap<ValueId, Vec<OpUse>> = HashMap::new();

        for op_id in &self.order {
            let slot = self.slot(*op_id).ok_or(GraphError::UnknownOp(*op_id))?;
            for (index, operand) in slot.op.operands.iter().enumerate() {
                if !defined.contains(operand) {
                    return Err(GraphError::UseBeforeDef {
                        value: *operand,
                        user: *op_id,
                    });
                }
                expected_users.entry(*operand).or_default().push(OpUse {
                    op: *op_id,
                    operand: index as u32,
                });
            }
            for (index, result) in slot.op.results.iter().enumerate() {
                match self.def_of(*result) {
                    Some(ValueDef::Result { op, index: def_index })
                        if op == *op_id && def_index as usize == index => {}
                    _ => return Err(GraphError::CorruptUseList { value: *result }),
                }
                defined.insert(*result);
            }
        }

        for (index, slot) in self.values.iter().enumerate() {
            let Some(slot) = slot else {
                continue;
            };
            let value = ValueId(index as u32);
            if !defined.contains(&value) {
                return Err(GraphError::CorruptUseList { value });
            }
            let mut actual: Vec<OpUse> = slot.users.to_vec();
            let mut expected = expected_users.remove(&value).unwrap_or_default();
            actual.sort_by_key(|user| (user.op, user.operand));
            expected.sort_by_key(|user| (user.op, user.operand));
            if actual != expected {
                return Err(GraphError::CorruptUseList { value });
            }
        }
        if let Some(value) = expected_users.into_keys().next() {
            return Err(GraphError::UnknownValue(value));
        }

        for output in &self.outputs {
            if !defined.contains(output) {
                return Err(GraphError::UnknownValue(*output));
            }
        }
        Ok(())
    }

    fn insert_at(&mut self, pos: usize, state: OperationState) -> Result<OpId, GraphError> {
        let op = OpId(self.ops.len() as u32);
        for operand in &state.operands {
            match self.def_of(*operand) {
                None => return Err(GraphError::UnknownValue(*operand)),
                Some(ValueDef::Input { .. }) => {}
                Some(ValueDef::Result { op: producer, .. }) => {
                    let defined_before = self.position(producer).is_some_and(|at| at < pos);
                    if !defined_before {
                        return Err(GraphError::UseBeforeDef {
                            value: *operand,
                            user: op,
                        });
                    }
                }
            }
        }

        for (index, operand) in state.operands.iter().enumerate() {
            if let Some(slot) = self.value_slot_mut(*operand) {
                slot.users.push(OpUse {
                    op,
                    operand: index as u32,
                });
            }
        }
        let results = (0..state.num_results)
            .map(|index| {
                self.allocate_value(ValueDef::Result {
                    op,
                    index: index as u32,
                })
            })
            .collect();

        self.ops.push(Some(OpSlot {
            op: Operation {
                name: state.name,
                operands: state.operands,
                results,
                attrs: state.attrs,
                regions: state.regions,
            },
            version: 0,
        }));
        self.order.insert(pos, op);
        Ok(op)
    }

    fn allocate_value(&mut self, def: ValueDef) -> ValueId {
        let value = ValueId(self.values.len() as u32);
        self.values.push(Some(ValueSlot {
            def,
            users: SmallVec::new(),
        }));
        value
    }

    fn slot(&self, op: OpId) -> Option<&OpSlot> {
        self.ops.get(op.0 as usize)?.as_ref()
    }

    fn slot_mut(&mut self, op: OpId) -> Option<&mut OpSlot> {
        self.ops.get_mut(op.0 as usize)?.as_mut()
    }

    fn value_slot(&self, value: ValueId) -> Option<&ValueSlot> {
        self.values.get(value.0 as usize)?.as_ref()
    }

    fn value_slot_mut(&mut self, value: ValueId) -> Option<&mut ValueSlot> {
        self.values.get_mut(value.0 as usize)?.as_mut()
    }
}

/// Errors raised by region mutation primitives and verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("operation {0} is not part of the region")]
    UnknownOp(OpId),
    #[error("value {0} is not defined in the region")]
    UnknownValue(ValueId),
    #[error("cannot erase {name} ({op}): {uses} live use(s) of its results remain")]
    LiveUses { op: OpId, name: String, uses: usize },
    #[error("value {value} is used by {user} before it is defined")]
    UseBeforeDef { value: ValueId, user: OpId },
    #[error("operand index {index} is out of range for {op}")]
    OperandOutOfRange { op: OpId, index: usize },
    #[error("use list of value {value} is inconsistent")]
    CorruptUseList { value: ValueId },
}
