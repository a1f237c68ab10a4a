//! Owned tensor buffers used for initializers, feeds, and fetches.

use anyhow::{bail, Result};

use super::element_type::ElementType;

/// Typed storage behind a [`TensorValue`]. Fixed-width element types keep a
/// native vector; strings keep one `String` per element.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<u8>),
    Str(Vec<String>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::Str(v) => v.len(),
        }
    }
}

/// Simple host-owned tensor: element type, shape, and payload.
///
/// Invariant: the payload element count always equals the product of the
/// dimensions (an empty dimension list denotes a rank-0 scalar holding one
/// element).
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    dims: Vec<usize>,
    data: TensorData,
}

impl TensorValue {
    fn validated(dims: Vec<usize>, data: TensorData) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                dims
            );
        }
        Ok(TensorValue { dims, data })
    }

    /// Constructs an `F32` tensor, validating the length against the shape.
    pub fn from_f32(dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::validated(dims, TensorData::F32(data))
    }

    /// Constructs an `F64` tensor, validating the length against the shape.
    pub fn from_f64(dims: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        Self::validated(dims, TensorData::F64(data))
    }

    /// Constructs an `I32` tensor, validating the length against the shape.
    pub fn from_i32(dims: Vec<usize>, data: Vec<i32>) -> Result<Self> {
        Self::validated(dims, TensorData::I32(data))
    }

    /// Constructs an `I64` tensor, validating the length against the shape.
    pub fn from_i64(dims: Vec<usize>, data: Vec<i64>) -> Result<Self> {
        Self::validated(dims, TensorData::I64(data))
    }

    /// Constructs a `U8` tensor, validating the length against the shape.
    pub fn from_u8(dims: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        Self::validated(dims, TensorData::U8(data))
    }

    /// Constructs a `Bool` tensor from one byte per element.
    pub fn from_bool(dims: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        Self::validated(dims, TensorData::Bool(data))
    }

    /// Constructs a string tensor, validating the length against the shape.
    pub fn from_strings(dims: Vec<usize>, data: Vec<String>) -> Result<Self> {
        Self::validated(dims, TensorData::Str(data))
    }

    /// Returns a rank-0 `F32` scalar.
    pub fn scalar_f32(value: f32) -> Self {
        TensorValue {
            dims: Vec::new(),
            data: TensorData::F32(vec![value]),
        }
    }

    /// Returns the scalar element type of the payload.
    pub fn elem(&self) -> ElementType {
        match &self.data {
            TensorData::F32(_) => ElementType::F32,
            TensorData::F64(_) => ElementType::F64,
            TensorData::I32(_) => ElementType::I32,
            TensorData::I64(_) => ElementType::I64,
            TensorData::U8(_) => ElementType::U8,
            TensorData::Bool(_) => ElementType::Bool,
            TensorData::Str(_) => ElementType::Str,
        }
    }

    /// Borrows the dimension list.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the payload size in bytes for fixed-width element types.
    pub fn byte_len(&self) -> Option<usize> {
        self.elem()
            .fixed_width()
            .map(|width| width * self.num_elements())
    }

    /// Borrows the typed storage.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Borrows the underlying `f32` slice, panicking if the type differs.
    pub fn f32_data(&self) -> &[f32] {
        match &self.data {
            TensorData::F32(v) => v,
            _ => panic!("tensor data is not stored as f32"),
        }
    }

    /// Mutably borrows the `f32` slice, panicking if the type differs.
    pub fn f32_data_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            TensorData::F32(v) => v,
            _ => panic!("tensor data is not stored as mutable f32"),
        }
    }

    /// Borrows the underlying `i32` slice, panicking if the type differs.
    pub fn i32_data(&self) -> &[i32] {
        match &self.data {
            TensorData::I32(v) => v,
            _ => panic!("tensor data is not stored as i32"),
        }
    }

    /// Borrows the underlying `i64` slice, panicking if the type differs.
    pub fn i64_data(&self) -> &[i64] {
        match &self.data {
            TensorData::I64(v) => v,
            _ => panic!("tensor data is not stored as i64"),
        }
    }

    /// Borrows the string elements, panicking if the type differs.
    pub fn strings(&self) -> &[String] {
        match &self.data {
            TensorData::Str(v) => v,
            _ => panic!("tensor data is not stored as strings"),
        }
    }

    /// Encodes the payload as little-endian bytes. Panics for string
    /// tensors, which have no raw byte projection.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let width = self
            .elem()
            .fixed_width()
            .expect("string tensors have no raw byte encoding");
        let mut out = Vec::with_capacity(width * self.num_elements());
        match &self.data {
            TensorData::F32(v) => {
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            TensorData::F64(v) => {
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            TensorData::I32(v) => {
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            TensorData::I64(v) => {
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            TensorData::U8(v) | TensorData::Bool(v) => out.extend_from_slice(v),
            TensorData::Str(_) => unreachable!(),
        }
        out
    }

    /// Decodes a little-endian payload into a tensor of the given element
    /// type and shape. Strings are not decodable from raw bytes.
    pub fn from_le_bytes(elem: ElementType, dims: Vec<usize>, raw: &[u8]) -> Result<Self> {
        let width = match elem.fixed_width() {
            Some(width) => width,
            None => bail!("string tensors cannot be decoded from raw bytes"),
        };
        let expected: usize = dims.iter().product();
        if raw.len() != expected * width {
            bail!(
                "payload of {} bytes does not match {} elements of {:?}",
                raw.len(),
                expected,
                elem
            );
        }
        let data = match elem {
            ElementType::F32 => TensorData::F32(
                raw.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ElementType::F64 => TensorData::F64(
                raw.chunks_exact(8)
                    .map(|c| {
                        f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ),
            ElementType::I32 => TensorData::I32(
                raw.chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ElementType::I64 => TensorData::I64(
                raw.chunks_exact(8)
                    .map(|c| {
                        i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ),
            ElementType::U8 => TensorData::U8(raw.to_vec()),
            ElementType::Bool => TensorData::Bool(raw.to_vec()),
            ElementType::Str => unreachable!(),
        };
        Self::validated(dims, data)
    }
}
