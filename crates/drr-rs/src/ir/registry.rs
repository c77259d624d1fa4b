use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::ir::attr::{AttrKind, Attribute};
use crate::ir::dialect;
use crate::ir::region::{OperationState, ValueId};

/// Number of operands an operation kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(expected) => expected == count,
            Arity::Variadic => true,
        }
    }
}

/// Declared shape of an operation kind: attribute schema and operand/result arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    name: String,
    attrs: Vec<(String, AttrKind)>,
    operands: Arity,
    results: usize,
    regions: usize,
    side_effecting: bool,
}

impl OpSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            operands: Arity::Exactly(0),
            results: 1,
            regions: 0,
            side_effecting: false,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.attrs.push((name.into(), kind));
        self
    }

    pub fn operands(mut self, arity: Arity) -> Self {
        self.operands = arity;
        self
    }

    pub fn results(mut self, count: usize) -> Self {
        self.results = count;
        self
    }

    pub fn regions(mut self, count: usize) -> Self {
        self.regions = count;
        self
    }

    pub fn side_effecting(mut self) -> Self {
        self.side_effecting = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr_kind(&self, name: &str) -> Option<AttrKind> {
        self.attrs
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, kind)| *kind)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.attrs.iter().map(|(name, _)| name.as_str())
    }

    pub fn operand_arity(&self) -> Arity {
        self.operands
    }

    pub fn num_results(&self) -> usize {
        self.results
    }

    pub fn num_regions(&self) -> usize {
        self.regions
    }

    pub fn is_side_effecting(&self) -> bool {
        self.side_effecting
    }

    /// Checks a complete attribute dictionary against the schema.
    pub fn verify_attrs(&self, attrs: &BTreeMap<String, Attribute>) -> Result<(), RegistryError> {
        for (name, value) in attrs {
            let expected = self
                .attr_kind(name)
                .ok_or_else(|| RegistryError::UnknownAttribute {
                    op: self.name.clone(),
                    attr: name.clone(),
                })?;
            if value.kind() != expected {
                return Err(RegistryError::AttrTypeMismatch {
                    op: self.name.clone(),
                    attr: name.clone(),
                    expected,
                    found: value.kind(),
                });
            }
        }
        for name in self.attr_names() {
            if !attrs.contains_key(name) {
                return Err(RegistryError::MissingAttribute {
                    op: self.name.clone(),
                    attr: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn verify_operand_count(&self, count: usize) -> Result<(), RegistryError> {
        if self.operands.accepts(count) {
            Ok(())
        } else {
            Err(RegistryError::OperandCount {
                op: self.name.clone(),
                expected: self.operands,
                found: count,
            })
        }
    }

    /// Builds an [`OperationState`] after validating attributes and operands.
    pub fn build_state(
        &self,
        attrs: BTreeMap<String, Attribute>,
        operands: Vec<ValueId>,
    ) -> Result<OperationState, RegistryError> {
        self.verify_attrs(&attrs)?;
        self.verify_operand_count(operands.len())?;
        if self.regions > 0 {
            return Err(RegistryError::RegionsRequired {
                op: self.name.clone(),
                count: self.regions,
            });
        }
        Ok(OperationState {
            name: self.name.clone(),
            operands,
            attrs,
            num_results: self.results,
            regions: Vec::new(),
        })
    }
}

/// Lookup table from operation-kind name to schema.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    schemas: HashMap<String, OpSchema>,
}

static GLOBAL_REGISTRY: Lazy<OpRegistry> = Lazy::new(OpRegistry::with_builtin_dialects);

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `builtin`, `pd_op` and `cinn_op` dialects.
    pub fn with_builtin_dialects() -> Self {
        let mut registry = Self::new();
        dialect::register_builtin(&mut registry);
        dialect::register_pd_ops(&mut registry);
        dialect::register_cinn_ops(&mut registry);
        registry
    }

    /// Process-wide registry holding the built-in dialects.
    pub fn global() -> &'static OpRegistry {
        &GLOBAL_REGISTRY
    }

    /// Registers a schema, replacing any previous schema with the same name.
    pub fn register(&mut self, schema: OpSchema) -> &mut Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Result<&OpSchema, RegistryError> {
        self.schemas
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOpKind(name.to_string()))
    }

    /// Lookup-by-name constructor used when materialising result operations.
    pub fn create(
        &self,
        name: &str,
        attrs: BTreeMap<String, Attribute>,
        operands: Vec<ValueId>,
    ) -> Result<OperationState, RegistryError> {
        self.schema(name)?.build_state(attrs, operands)
    }
}

/// Errors raised when an operation does not conform to its registered schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown operation kind `{0}`")]
    UnknownOpKind(String),
    #[error("`{op}` has no attribute named `{attr}`")]
    UnknownAttribute { op: String, attr: String },
    #[error("`{op}` requires attribute `{attr}`")]
    MissingAttribute { op: String, attr: String },
    #[error("attribute `{attr}` of `{op}` expects {expected}, found {found}")]
    AttrTypeMismatch {
        op: String,
        attr: String,
        expected: AttrKind,
        found: AttrKind,
    },
    #[error("`{op}` expects {expected:?} operand(s), found {found}")]
    OperandCount {
        op: String,
        expected: Arity,
        found: usize,
    },
    #[error("`{op}` owns {count} region(s) and cannot be built from attributes alone")]
    RegionsRequired { op: String, count: usize },
}
