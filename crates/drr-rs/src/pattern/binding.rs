use std::collections::HashMap;
use std::sync::Arc;

use crate::ir::{Attribute, OpId, ValueId};
use crate::pattern::drr::{SourceOpId, TensorId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotKey {
    Attr(Arc<str>),
    Tensor(TensorId),
    Op(SourceOpId),
}

/// Position in the binding journal that [`BindingTable::rollback`] can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Slot bindings collected while matching one source pattern at one root.
///
/// Every slot is bound at most once; rebinding succeeds only when the new
/// value is identical to the old one (attributes compare bit-for-bit, tensors
/// and operations by identity). Bindings are journaled so that a failed
/// attempt can be rolled back without relying on call-stack unwinding.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    attrs: HashMap<Arc<str>, Attribute>,
    tensors: HashMap<TensorId, ValueId>,
    ops: HashMap<SourceOpId, OpId>,
    op_owner: HashMap<OpId, SourceOpId>,
    journal: Vec<SlotKey>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn tensor(&self, tensor: TensorId) -> Option<ValueId> {
        self.tensors.get(&tensor).copied()
    }

    pub fn op(&self, op: SourceOpId) -> Option<OpId> {
        self.ops.get(&op).copied()
    }

    /// Concrete operations bound so far, in binding order.
    pub fn bound_ops(&self) -> Vec<OpId> {
        self.journal
            .iter()
            .filter_map(|key| match key {
                SlotKey::Op(op) => self.ops.get(op).copied(),
                _ => None,
            })
            .collect()
    }

    pub fn binds_op(&self, op: OpId) -> bool {
        self.op_owner.contains_key(&op)
    }

    pub fn bind_attr(&mut self, name: &Arc<str>, value: &Attribute) -> bool {
        if let Some(existing) = self.attrs.get(name) {
            return existing == value;
        }
        self.attrs.insert(Arc::clone(name), value.clone());
        self.journal.push(SlotKey::Attr(Arc::clone(name)));
        true
    }

    pub fn bind_tensor(&mut self, tensor: TensorId, value: ValueId) -> bool {
        if let Some(existing) = self.tensors.get(&tensor) {
            return *existing == value;
        }
        self.tensors.insert(tensor, value);
        self.journal.push(SlotKey::Tensor(tensor));
        true
    }

    /// Binds a template operation to a concrete one. A concrete operation can
    /// back at most one template.
    pub fn bind_op(&mut self, template: SourceOpId, op: OpId) -> bool {
        if let Some(existing) = self.ops.get(&template) {
            return *existing == op;
        }
        if self.op_owner.contains_key(&op) {
            return false;
        }
        self.ops.insert(template, op);
        self.op_owner.insert(op, template);
        self.journal.push(SlotKey::Op(template));
        true
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Discards every binding made after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(key) = self.journal.pop() else {
                break;
            };
            match key {
                SlotKey::Attr(name) => {
                    self.attrs.remove(&name);
                }
                SlotKey::Tensor(tensor) => {
                    self.tensors.remove(&tensor);
                }
                SlotKey::Op(template) => {
                    if let Some(op) = self.ops.remove(&template) {
                        self.op_owner.remove(&op);
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.rollback(Checkpoint(0));
    }
}
