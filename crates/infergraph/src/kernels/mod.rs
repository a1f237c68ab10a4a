//! Operator kernel interface and the registry that resolves operator
//! identifiers to kernel implementations.
//!
//! Kernels are opaque callables behind [`OpKernel`]; the engine never
//! inspects their numerics. Resolution happens once during session
//! initialization and the resolved handles are cached in the execution
//! plan.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::Attribute;
use crate::tensor::TensorValue;

/// Default operator domain for core ops.
pub const CORE_DOMAIN: &str = "";
/// Domain for training-only operators such as the loss family.
pub const TRAINING_DOMAIN: &str = "training";

/// Shape contract violation raised by a kernel before any computation.
#[derive(Debug, Error)]
#[error("{context}: expected {expected}, got {actual}")]
pub struct ShapeMismatchError {
    pub context: String,
    pub expected: String,
    pub actual: String,
}

impl ShapeMismatchError {
    pub fn new(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        ShapeMismatchError {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error("required input {index} is missing")]
    MissingInput { index: usize },
    #[error("unsupported element type {0:?}")]
    UnsupportedElementType(crate::tensor::ElementType),
    #[error("kernel failure: {0}")]
    Other(#[from] anyhow::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Per-invocation view a kernel receives: bound input tensors (absent
/// optional slots are `None`), the node's attributes, and which output
/// slots exist.
pub struct KernelContext<'a> {
    inputs: Vec<Option<&'a TensorValue>>,
    attributes: &'a BTreeMap<String, Attribute>,
    output_slots: &'a [bool],
}

impl<'a> KernelContext<'a> {
    pub fn new(
        inputs: Vec<Option<&'a TensorValue>>,
        attributes: &'a BTreeMap<String, Attribute>,
        output_slots: &'a [bool],
    ) -> Self {
        KernelContext {
            inputs,
            attributes,
            output_slots,
        }
    }

    /// Returns the input at `index`, failing if it is absent.
    pub fn input(&self, index: usize) -> KernelResult<&'a TensorValue> {
        self.inputs
            .get(index)
            .copied()
            .flatten()
            .ok_or(KernelError::MissingInput { index })
    }

    /// Returns the input at `index` when supplied, `None` otherwise.
    pub fn opt_input(&self, index: usize) -> Option<&'a TensorValue> {
        self.inputs.get(index).copied().flatten()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_slots.len()
    }

    /// Whether the output slot at `index` is declared on the node.
    pub fn output_present(&self, index: usize) -> bool {
        self.output_slots.get(index).copied().unwrap_or(false)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(Attribute::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name) {
            Some(Attribute::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_float(&self, name: &str) -> Option<f32> {
        match self.attributes.get(name) {
            Some(Attribute::Float(value)) => Some(*value),
            _ => None,
        }
    }
}

/// One operator computation: maps bound input tensors to output tensors.
/// The returned list is aligned with the node's output slots; `None` must
/// be returned for declared-but-absent slots.
pub trait OpKernel: Send + Sync {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>>;
}

/// Registry mapping `(op_type, domain)` to versioned kernel entries.
/// Resolution picks the highest `since_version` not exceeding the graph
/// opset.
#[derive(Default)]
pub struct KernelRegistry {
    entries: HashMap<(String, String), Vec<(i64, Arc<dyn OpKernel>)>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        op_type: impl Into<String>,
        domain: impl Into<String>,
        since_version: i64,
        kernel: Arc<dyn OpKernel>,
    ) {
        let versions = self
            .entries
            .entry((op_type.into(), domain.into()))
            .or_default();
        versions.push((since_version, kernel));
        versions.sort_by_key(|(version, _)| *version);
    }

    pub fn resolve(&self, op_type: &str, domain: &str, opset: i64) -> Option<Arc<dyn OpKernel>> {
        let versions = self
            .entries
            .get(&(op_type.to_string(), domain.to_string()))?;
        versions
            .iter()
            .rev()
            .find(|(since, _)| *since <= opset)
            .map(|(_, kernel)| Arc::clone(kernel))
    }
}
