use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::graph::Graph;
use crate::tensor::{TensorData, TensorValue};

use super::{
    ArgIndexEntry, ModelIndex, NodeIndexEntry, SerializationError, TensorIndexEntry, MAGIC,
    VERSION_V1,
};

/// Writes a validated graph and its resolved initializer tensors into the
/// binary model format.
pub struct ModelSaver;

impl ModelSaver {
    pub fn save(
        path: impl AsRef<Path>,
        graph: &Graph,
        initializers: &BTreeMap<String, Arc<TensorValue>>,
    ) -> Result<(), SerializationError> {
        let bytes = Self::to_bytes(graph, initializers)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(
        graph: &Graph,
        initializers: &BTreeMap<String, Arc<TensorValue>>,
    ) -> Result<Vec<u8>, SerializationError> {
        let args = graph
            .args()
            .iter()
            .map(|arg| ArgIndexEntry {
                name: arg.name.clone(),
                doc_string: arg.doc_string.clone(),
                ty: arg.ty.clone(),
            })
            .collect::<Vec<_>>();

        let nodes = graph
            .nodes()
            .iter()
            .map(|node| NodeIndexEntry {
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                domain: node.domain.clone(),
                attributes: node.attributes.clone(),
                inputs: node.inputs.iter().map(|slot| slot.map(|id| id.0)).collect(),
                outputs: node.outputs.iter().map(|slot| slot.map(|id| id.0)).collect(),
            })
            .collect::<Vec<_>>();

        // BTreeMap iteration keeps the payload layout deterministic by name.
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(initializers.len());
        let mut entries: Vec<TensorIndexEntry> = Vec::with_capacity(initializers.len());
        let mut running_offset: u64 = 0;
        for (name, value) in initializers {
            if graph.find_arg(name).is_none() {
                return Err(SerializationError::UnknownInitializer(name.clone()));
            }
            let payload = match value.data() {
                TensorData::Str(strings) => bincode::serialize(strings)?,
                _ => value.to_le_bytes(),
            };
            let len = payload.len() as u64;
            entries.push(TensorIndexEntry {
                name: name.clone(),
                elem_tag: value.elem().tag(),
                dims: value.dims().iter().map(|&d| d as u64).collect(),
                offset: running_offset,
                len,
            });
            payloads.push(payload);
            running_offset = running_offset
                .checked_add(len)
                .ok_or(SerializationError::IndexTooLarge)?;
        }

        let mut index = ModelIndex {
            name: graph.name().to_string(),
            opset: graph.opset(),
            args,
            nodes,
            inputs: graph.inputs().iter().map(|id| id.0).collect(),
            outputs: graph.outputs().iter().map(|id| id.0).collect(),
            initializers: entries,
        };

        // Encode once to learn the index length, then fix payload offsets up
        // to absolute positions. Offsets are u64 literals in the index, so
        // the second encode has the same length.
        let index_bytes_rel = bincode::serialize(&index)?;
        let index_len = index_bytes_rel.len();
        if index_len > u32::MAX as usize {
            return Err(SerializationError::IndexTooLarge);
        }
        let data_start = (MAGIC.len() + 4 + 4 + index_len) as u64;
        for entry in index.initializers.iter_mut() {
            entry.offset = entry
                .offset
                .checked_add(data_start)
                .ok_or(SerializationError::IndexTooLarge)?;
        }
        let index_bytes = bincode::serialize(&index)?;
        debug_assert_eq!(index_bytes.len(), index_len);

        let total: usize = payloads.iter().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(MAGIC.len() + 8 + index_len + total);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION_V1.to_le_bytes());
        out.extend_from_slice(&(index_len as u32).to_le_bytes());
        out.extend_from_slice(&index_bytes);
        for payload in payloads {
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }
}
