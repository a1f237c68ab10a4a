//! Enumerates the scalar element types a tensor value may carry.

use serde::{Deserialize, Serialize};

/// Logical element type shared between graph type descriptors and tensor
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// 32-bit IEEE-754 floating point.
    F32,
    /// 64-bit IEEE-754 floating point.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, primarily for class labels and indices.
    I64,
    /// Unsigned byte.
    U8,
    /// Boolean stored as one byte per element.
    Bool,
    /// Variable-length UTF-8 string; has no fixed byte width.
    Str,
}

impl ElementType {
    /// Returns the number of bytes per element, or `None` for strings.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ElementType::F32 | ElementType::I32 => Some(4),
            ElementType::F64 | ElementType::I64 => Some(8),
            ElementType::U8 | ElementType::Bool => Some(1),
            ElementType::Str => None,
        }
    }

    /// Produces a stable tag used by the binary model format.
    pub fn tag(self) -> u32 {
        match self {
            ElementType::F32 => 0,
            ElementType::F64 => 1,
            ElementType::I32 => 2,
            ElementType::I64 => 3,
            ElementType::U8 => 4,
            ElementType::Bool => 5,
            ElementType::Str => 6,
        }
    }

    /// Reconstructs an `ElementType` from its serialized tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ElementType::F32),
            1 => Some(ElementType::F64),
            2 => Some(ElementType::I32),
            3 => Some(ElementType::I64),
            4 => Some(ElementType::U8),
            5 => Some(ElementType::Bool),
            6 => Some(ElementType::Str),
            _ => None,
        }
    }
}
