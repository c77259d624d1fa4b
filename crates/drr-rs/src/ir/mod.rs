//! Operation graph, attribute model and operation-kind registry the rewrite engine runs on.

pub mod attr;
pub mod dialect;
pub mod registry;
pub mod region;
pub mod text_ir;

pub use attr::{AttrKind, Attribute, DataType, Place};
pub use registry::{Arity, OpRegistry, OpSchema, RegistryError};
pub use region::{GraphError, OpId, OpUse, Operation, OperationState, Region, ValueDef, ValueId};

/// Top-level container: a `builtin.module` operation owning the program region.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    module: Operation,
}

impl Program {
    /// Wraps `body` in a fresh `builtin.module`.
    pub fn new(body: Region) -> Self {
        Self {
            module: Operation::detached(dialect::MODULE, Default::default(), vec![body]),
        }
    }

    pub fn module(&self) -> &Operation {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Operation {
        &mut self.module
    }

    pub fn body(&self) -> Option<&Region> {
        self.module.regions().first()
    }

    pub fn body_mut(&mut self) -> Option<&mut Region> {
        self.module.regions_mut().first_mut()
    }
}
