use std::fs;
use std::path::Path;

use crate::graph::{Graph, NodeArgId};
use crate::tensor::{ElementType, TensorValue};

use super::{DeserializationError, ModelIndex, MAGIC, VERSION_V1};

/// Reconstructs a graph (topology, value slots, initializer tensors) from
/// the binary model format. No silent type coercion: every element-type tag
/// and payload length is validated.
pub struct ModelLoader;

impl ModelLoader {
    pub fn load(path: impl AsRef<Path>) -> Result<Graph, DeserializationError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Graph, DeserializationError> {
        let header_len = MAGIC.len() + 4 + 4;
        if bytes.len() < header_len {
            return Err(DeserializationError::Corrupt("truncated header".into()));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(DeserializationError::BadMagic);
        }
        let version = u32::from_le_bytes(bytes[8..12].try_into().expect("sliced 4 bytes"));
        if version != VERSION_V1 {
            return Err(DeserializationError::UnsupportedVersion(version));
        }
        let index_len =
            u32::from_le_bytes(bytes[12..16].try_into().expect("sliced 4 bytes")) as usize;
        let index_end = header_len
            .checked_add(index_len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| DeserializationError::Corrupt("truncated index".into()))?;
        let index: ModelIndex = bincode::deserialize(&bytes[header_len..index_end])?;

        let mut graph = Graph::new(index.name, index.opset);
        for arg in &index.args {
            graph
                .add_arg(arg.name.clone(), arg.doc_string.clone(), arg.ty.clone())
                .map_err(|err| DeserializationError::Corrupt(err.to_string()))?;
        }

        let arg_count = index.args.len() as u32;
        let slot = |raw: &Option<u32>| -> Result<Option<NodeArgId>, DeserializationError> {
            match raw {
                Some(id) if *id < arg_count => Ok(Some(NodeArgId(*id))),
                Some(id) => Err(DeserializationError::Corrupt(format!(
                    "slot index {} out of range",
                    id
                ))),
                None => Ok(None),
            }
        };

        for node in &index.nodes {
            let inputs = node.inputs.iter().map(&slot).collect::<Result<_, _>>()?;
            let outputs = node.outputs.iter().map(&slot).collect::<Result<_, _>>()?;
            graph
                .add_node(
                    node.name.clone(),
                    node.op_type.clone(),
                    node.domain.clone(),
                    node.attributes.clone(),
                    inputs,
                    outputs,
                )
                .map_err(|err| DeserializationError::Corrupt(err.to_string()))?;
        }

        let list = |raw: &[u32]| -> Result<Vec<NodeArgId>, DeserializationError> {
            raw.iter()
                .map(|&id| {
                    slot(&Some(id)).map(|resolved| resolved.expect("slot id always present"))
                })
                .collect()
        };
        graph.set_inputs(list(&index.inputs)?);
        graph.set_outputs(list(&index.outputs)?);

        for entry in &index.initializers {
            let elem = ElementType::from_tag(entry.elem_tag)
                .ok_or(DeserializationError::UnknownElementTag(entry.elem_tag))?;
            let dims = entry
                .dims
                .iter()
                .map(|&d| {
                    usize::try_from(d).map_err(|_| {
                        DeserializationError::Corrupt(format!(
                            "initializer '{}' dim overflow",
                            entry.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let start = usize::try_from(entry.offset)
                .map_err(|_| DeserializationError::Corrupt("payload offset overflow".into()))?;
            let end = start
                .checked_add(entry.len as usize)
                .filter(|&end| end <= bytes.len())
                .ok_or_else(|| {
                    DeserializationError::Corrupt(format!(
                        "initializer '{}' payload out of bounds",
                        entry.name
                    ))
                })?;
            let payload = &bytes[start..end];
            let value = match elem {
                ElementType::Str => {
                    let strings: Vec<String> = bincode::deserialize(payload)?;
                    TensorValue::from_strings(dims, strings)
                        .map_err(|err| DeserializationError::Corrupt(err.to_string()))?
                }
                _ => TensorValue::from_le_bytes(elem, dims, payload)
                    .map_err(|err| DeserializationError::Corrupt(err.to_string()))?,
            };
            graph
                .add_initializer(entry.name.clone(), value)
                .map_err(|err| DeserializationError::Corrupt(err.to_string()))?;
        }

        graph
            .validate_references()
            .map_err(|err| DeserializationError::Corrupt(err.to_string()))?;
        Ok(graph)
    }
}
