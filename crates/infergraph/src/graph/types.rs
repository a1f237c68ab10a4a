//! Type descriptors attached to graph value slots.
//!
//! The descriptor grammar is a closed sum: a slot is a tensor, a sequence of
//! some element type, or a map from a scalar key type to some value type.
//! Variants the engine does not execute (sparse tensors, opaque handles) are
//! unrepresentable; inputs naming them fail at the decode boundary.

use serde::{Deserialize, Serialize};

use crate::tensor::ElementType;

/// One axis of a tensor shape: a concrete size, a named symbolic size, or an
/// anonymous unknown. At most one alternative is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dim {
    Fixed(i64),
    Symbolic(String),
    Anonymous,
}

impl Dim {
    /// Human-readable rendering used in diagnostics.
    pub fn display(&self) -> String {
        match self {
            Dim::Fixed(value) => value.to_string(),
            Dim::Symbolic(name) => name.clone(),
            Dim::Anonymous => "?".to_string(),
        }
    }
}

/// Tensor alternative of a type descriptor: element type plus shape. An
/// empty dimension list means the shape is entirely unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorTypeDesc {
    pub elem: ElementType,
    #[serde(default)]
    pub dims: Vec<Dim>,
}

impl TensorTypeDesc {
    pub fn new(elem: ElementType, dims: Vec<Dim>) -> Self {
        TensorTypeDesc { elem, dims }
    }

    /// Tensor type with every axis fixed to a concrete size.
    pub fn fixed(elem: ElementType, dims: &[i64]) -> Self {
        TensorTypeDesc {
            elem,
            dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
        }
    }
}

/// The populated alternative of a type descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Tensor(TensorTypeDesc),
    Sequence(Box<TypeDesc>),
    Map {
        key: ElementType,
        value: Box<TypeDesc>,
    },
}

impl TypeKind {
    /// Stable name of the populated alternative, used in diagnostics.
    pub fn tag_name(&self) -> &'static str {
        match self {
            TypeKind::Tensor(_) => "tensor",
            TypeKind::Sequence(_) => "sequence",
            TypeKind::Map { .. } => "map",
        }
    }
}

/// Full type descriptor: an optional denotation string plus exactly one
/// populated alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDesc {
    #[serde(default)]
    pub denotation: String,
    pub kind: TypeKind,
}

impl TypeDesc {
    pub fn tensor(elem: ElementType, dims: Vec<Dim>) -> Self {
        TypeDesc {
            denotation: String::new(),
            kind: TypeKind::Tensor(TensorTypeDesc::new(elem, dims)),
        }
    }

    /// Tensor descriptor with all axes fixed.
    pub fn fixed_tensor(elem: ElementType, dims: &[i64]) -> Self {
        TypeDesc {
            denotation: String::new(),
            kind: TypeKind::Tensor(TensorTypeDesc::fixed(elem, dims)),
        }
    }

    /// Tensor descriptor with unknown shape, used for undeclared
    /// intermediate values.
    pub fn unknown_tensor(elem: ElementType) -> Self {
        TypeDesc {
            denotation: String::new(),
            kind: TypeKind::Tensor(TensorTypeDesc::new(elem, Vec::new())),
        }
    }

    pub fn sequence(elem_type: TypeDesc) -> Self {
        TypeDesc {
            denotation: String::new(),
            kind: TypeKind::Sequence(Box::new(elem_type)),
        }
    }

    pub fn map(key: ElementType, value: TypeDesc) -> Self {
        TypeDesc {
            denotation: String::new(),
            kind: TypeKind::Map {
                key,
                value: Box::new(value),
            },
        }
    }

    pub fn with_denotation(mut self, denotation: impl Into<String>) -> Self {
        self.denotation = denotation.into();
        self
    }
}

/// Attribute value attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Int(i64),
    Float(f32),
    Str(String),
}
