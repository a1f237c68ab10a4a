//! Compact binary model format.
//!
//! Layout: 8-byte magic, `u32` version, `u32` index length, bincode-encoded
//! index (topology, value slots with full type descriptors, attribute maps,
//! initializer entries with payload offsets), then the raw tensor payloads.
//! Fixed-width element types are stored as little-endian bytes; string
//! tensors as a bincode string list. The encoding is a strict lossless
//! projection of the in-memory graph.

mod loader;
mod saver;

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Attribute, TypeDesc};

pub use loader::ModelLoader;
pub use saver::ModelSaver;

pub(crate) const MAGIC: &[u8; 8] = b"IGMFORM1";
pub(crate) const VERSION_V1: u32 = 1;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("index encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("model index too large")]
    IndexTooLarge,
    #[error("initializer '{0}' has no declared value slot")]
    UnknownInitializer(String),
}

#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("index decode error: {0}")]
    Decode(#[from] bincode::Error),
    #[error("invalid model magic header")]
    BadMagic,
    #[error("unsupported model format version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown element type tag {0}")]
    UnknownElementTag(u32),
    #[error("corrupt model: {0}")]
    Corrupt(String),
}

/// Serialized value slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ArgIndexEntry {
    pub name: String,
    pub doc_string: String,
    pub ty: TypeDesc,
}

/// Serialized node; slot references are indices into the arg table, with
/// `None` marking an absent optional slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NodeIndexEntry {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub attributes: BTreeMap<String, Attribute>,
    pub inputs: Vec<Option<u32>>,
    pub outputs: Vec<Option<u32>>,
}

/// Serialized initializer; `offset`/`len` locate the payload after the
/// index, relative to the start of the blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TensorIndexEntry {
    pub name: String,
    pub elem_tag: u32,
    pub dims: Vec<u64>,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModelIndex {
    pub name: String,
    pub opset: i64,
    pub args: Vec<ArgIndexEntry>,
    pub nodes: Vec<NodeIndexEntry>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
    pub initializers: Vec<TensorIndexEntry>,
}
