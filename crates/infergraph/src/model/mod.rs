//! Native JSON model documents.
//!
//! The source description of a graph is a serde document: value infos for
//! inputs and outputs, a node list, and initializer tensors with inline
//! element data. Decoding is fail-closed: unknown type-descriptor variants
//! or element kinds are serde errors, never silent skips.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::graph::{Attribute, Graph, NodeArgId, TypeDesc};
use crate::tensor::{ElementType, TensorData, TensorValue};

/// Declared value slot in a model document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueInfoDoc {
    pub name: String,
    #[serde(default)]
    pub doc_string: String,
    pub ty: TypeDesc,
}

/// Operator node in a model document. An empty input or output name marks a
/// declared-but-absent optional slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoc {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Inline initializer elements; the variant determines the element type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorElements {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

/// Initializer tensor in a model document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorDoc {
    pub name: String,
    #[serde(default)]
    pub dims: Vec<u64>,
    pub elements: TensorElements,
}

impl TensorDoc {
    pub fn to_value(&self) -> Result<TensorValue> {
        let dims = self
            .dims
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| anyhow!("tensor {} dim overflow", self.name)))
            .collect::<Result<Vec<_>>>()?;
        let value = match &self.elements {
            TensorElements::F32(v) => TensorValue::from_f32(dims, v.clone()),
            TensorElements::F64(v) => TensorValue::from_f64(dims, v.clone()),
            TensorElements::I32(v) => TensorValue::from_i32(dims, v.clone()),
            TensorElements::I64(v) => TensorValue::from_i64(dims, v.clone()),
            TensorElements::U8(v) => TensorValue::from_u8(dims, v.clone()),
            TensorElements::Bool(v) => {
                TensorValue::from_bool(dims, v.iter().map(|&b| b as u8).collect())
            }
            TensorElements::Str(v) => TensorValue::from_strings(dims, v.clone()),
        };
        value.with_context(|| format!("initializer '{}'", self.name))
    }

    pub fn from_value(name: impl Into<String>, value: &TensorValue) -> Self {
        let elements = match value.data() {
            TensorData::F32(v) => TensorElements::F32(v.clone()),
            TensorData::F64(v) => TensorElements::F64(v.clone()),
            TensorData::I32(v) => TensorElements::I32(v.clone()),
            TensorData::I64(v) => TensorElements::I64(v.clone()),
            TensorData::U8(v) => TensorElements::U8(v.clone()),
            TensorData::Bool(v) => TensorElements::Bool(v.iter().map(|&b| b != 0).collect()),
            TensorData::Str(v) => TensorElements::Str(v.clone()),
        };
        TensorDoc {
            name: name.into(),
            dims: value.dims().iter().map(|&d| d as u64).collect(),
            elements,
        }
    }
}

/// Top-level model document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDoc {
    pub name: String,
    pub opset: i64,
    #[serde(default)]
    pub inputs: Vec<ValueInfoDoc>,
    #[serde(default)]
    pub outputs: Vec<ValueInfoDoc>,
    #[serde(default)]
    pub value_infos: Vec<ValueInfoDoc>,
    #[serde(default)]
    pub nodes: Vec<NodeDoc>,
    #[serde(default)]
    pub initializers: Vec<TensorDoc>,
}

impl ModelDoc {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Builds the in-memory graph this document describes.
    pub fn into_graph(self) -> Result<Graph> {
        let mut graph = Graph::new(self.name, self.opset);

        for info in self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.value_infos.iter())
        {
            graph.add_arg(info.name.clone(), info.doc_string.clone(), info.ty.clone())?;
        }

        let mut input_ids: Vec<NodeArgId> = self
            .inputs
            .iter()
            .map(|info| {
                graph
                    .find_arg(&info.name)
                    .ok_or_else(|| anyhow!("input '{}' missing after declaration", info.name))
            })
            .collect::<Result<_>>()?;

        for tensor in &self.initializers {
            let value = tensor.to_value()?;
            let declared = graph.find_arg(&tensor.name).is_some();
            let id = graph.get_or_add_arg(
                &tensor.name,
                TypeDesc::fixed_tensor(
                    value.elem(),
                    &value.dims().iter().map(|&d| d as i64).collect::<Vec<_>>(),
                ),
            )?;
            // Initializer-backed values count as graph inputs.
            if !declared {
                input_ids.push(id);
            }
            graph.add_initializer(tensor.name.clone(), value)?;
        }

        for doc in &self.nodes {
            let inputs = resolve_slots(&mut graph, &doc.inputs)?;
            let outputs = resolve_slots(&mut graph, &doc.outputs)?;
            graph.add_node(
                doc.name.clone(),
                doc.op_type.clone(),
                doc.domain.clone(),
                doc.attributes.clone(),
                inputs,
                outputs,
            )?;
        }

        let output_ids = self
            .outputs
            .iter()
            .map(|info| {
                graph
                    .find_arg(&info.name)
                    .ok_or_else(|| anyhow!("output '{}' missing after declaration", info.name))
            })
            .collect::<Result<_>>()?;

        graph.set_inputs(input_ids);
        graph.set_outputs(output_ids);
        graph.validate_references()?;
        Ok(graph)
    }

    /// Projects a graph (with its resolved initializers) back into a
    /// document, preserving everything the equivalence checker inspects.
    pub fn from_graph(graph: &Graph) -> Result<Self> {
        let value_info = |id: NodeArgId| {
            let arg = graph.arg(id);
            ValueInfoDoc {
                name: arg.name.clone(),
                doc_string: arg.doc_string.clone(),
                ty: arg.ty.clone(),
            }
        };

        let inputs: Vec<_> = graph.inputs().iter().map(|&id| value_info(id)).collect();
        let outputs: Vec<_> = graph.outputs().iter().map(|&id| value_info(id)).collect();

        let mut named: Vec<String> = inputs
            .iter()
            .chain(outputs.iter())
            .map(|info| info.name.clone())
            .collect();
        let mut value_infos = Vec::new();
        for arg in graph.args() {
            if !named.contains(&arg.name) {
                named.push(arg.name.clone());
                value_infos.push(ValueInfoDoc {
                    name: arg.name.clone(),
                    doc_string: arg.doc_string.clone(),
                    ty: arg.ty.clone(),
                });
            }
        }

        let slot_name = |slot: &Option<NodeArgId>| match slot {
            Some(id) => graph.arg(*id).name.clone(),
            None => String::new(),
        };
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| NodeDoc {
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                domain: node.domain.clone(),
                attributes: node.attributes.clone(),
                inputs: node.inputs.iter().map(slot_name).collect(),
                outputs: node.outputs.iter().map(slot_name).collect(),
            })
            .collect();

        let initializers = graph
            .initializers()
            .iter()
            .map(|(name, value)| TensorDoc::from_value(name.clone(), value))
            .collect();

        Ok(ModelDoc {
            name: graph.name().to_string(),
            opset: graph.opset(),
            inputs,
            outputs,
            value_infos,
            nodes,
            initializers,
        })
    }
}

fn resolve_slots(graph: &mut Graph, names: &[String]) -> Result<Vec<Option<NodeArgId>>> {
    names
        .iter()
        .map(|name| {
            if name.is_empty() {
                return Ok(None);
            }
            if name.trim().is_empty() {
                bail!("value slot name must not be blank");
            }
            // Undeclared intermediates default to an unknown-shape f32 tensor.
            graph
                .get_or_add_arg(name, TypeDesc::unknown_tensor(ElementType::F32))
                .map(Some)
        })
        .collect()
}
