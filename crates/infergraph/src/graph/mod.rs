//! Arena-backed computation graph.
//!
//! Nodes and value slots live in flat vectors addressed by dense integer
//! ids; a name lookup table resolves references without back-pointers. Node
//! inputs and outputs are ordered slot lists in which `None` marks a
//! declared-but-absent optional slot.

mod types;

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::tensor::TensorValue;

pub use types::{Attribute, Dim, TensorTypeDesc, TypeDesc, TypeKind};

/// Dense identifier of a value slot within one graph instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeArgId(pub u32);

/// Dense identifier of a node within one graph instance. Not guaranteed to
/// survive serialization verbatim; equivalent graphs correspond by index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

/// Named, typed value slot. One declaration per name per graph.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeArg {
    pub name: String,
    pub doc_string: String,
    pub ty: TypeDesc,
}

/// Operator instance with ordered input and output slot lists.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub attributes: BTreeMap<String, Attribute>,
    pub inputs: Vec<Option<NodeArgId>>,
    pub outputs: Vec<Option<NodeArgId>>,
}

/// Computation graph: operator nodes, value slots, top-level inputs and
/// outputs, and the constant tensors bundled with the graph.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    opset: i64,
    args: Vec<NodeArg>,
    arg_lookup: HashMap<String, NodeArgId>,
    nodes: Vec<Node>,
    inputs: Vec<NodeArgId>,
    outputs: Vec<NodeArgId>,
    initializers: BTreeMap<String, TensorValue>,
}

impl Graph {
    pub fn new(name: impl Into<String>, opset: i64) -> Self {
        Graph {
            name: name.into(),
            opset,
            args: Vec::new(),
            arg_lookup: HashMap::new(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            initializers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opset(&self) -> i64 {
        self.opset
    }

    /// Declares a new value slot. Each name resolves to exactly one
    /// declaration; redeclaring is an error.
    pub fn add_arg(
        &mut self,
        name: impl Into<String>,
        doc_string: impl Into<String>,
        ty: TypeDesc,
    ) -> Result<NodeArgId> {
        let name = name.into();
        if name.is_empty() {
            bail!("value slot name must not be empty");
        }
        if self.arg_lookup.contains_key(&name) {
            bail!("value slot '{}' is declared twice", name);
        }
        let id = NodeArgId(self.args.len() as u32);
        self.arg_lookup.insert(name.clone(), id);
        self.args.push(NodeArg {
            name,
            doc_string: doc_string.into(),
            ty,
        });
        Ok(id)
    }

    /// Resolves a value slot by name, declaring it with the provided type
    /// when it does not exist yet.
    pub fn get_or_add_arg(&mut self, name: &str, ty: TypeDesc) -> Result<NodeArgId> {
        if let Some(&id) = self.arg_lookup.get(name) {
            return Ok(id);
        }
        self.add_arg(name.to_string(), "", ty)
    }

    pub fn find_arg(&self, name: &str) -> Option<NodeArgId> {
        self.arg_lookup.get(name).copied()
    }

    pub fn arg(&self, id: NodeArgId) -> &NodeArg {
        &self.args[id.0 as usize]
    }

    pub fn args(&self) -> &[NodeArg] {
        &self.args
    }

    /// Appends a node; its index within this graph is returned.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op_type: impl Into<String>,
        domain: impl Into<String>,
        attributes: BTreeMap<String, Attribute>,
        inputs: Vec<Option<NodeArgId>>,
        outputs: Vec<Option<NodeArgId>>,
    ) -> Result<NodeId> {
        let op_type = op_type.into();
        if op_type.is_empty() {
            bail!("node operator type must not be empty");
        }
        for slot in inputs.iter().chain(outputs.iter()).flatten() {
            if slot.0 as usize >= self.args.len() {
                bail!("node '{}' references unknown value slot {:?}", op_type, slot);
            }
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            op_type,
            domain: domain.into(),
            attributes,
            inputs,
            outputs,
        });
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn set_inputs(&mut self, inputs: Vec<NodeArgId>) {
        self.inputs = inputs;
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeArgId>) {
        self.outputs = outputs;
    }

    /// Graph inputs, including those backed by initializers.
    pub fn inputs(&self) -> &[NodeArgId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeArgId] {
        &self.outputs
    }

    /// Registers a constant tensor bundled with the graph. The named slot
    /// must already be declared; initializer-backed inputs stay in the
    /// graph input list.
    pub fn add_initializer(&mut self, name: impl Into<String>, value: TensorValue) -> Result<()> {
        let name = name.into();
        if self.find_arg(&name).is_none() {
            bail!("initializer '{}' has no declared value slot", name);
        }
        if self.initializers.contains_key(&name) {
            bail!("initializer '{}' is registered twice", name);
        }
        self.initializers.insert(name, value);
        Ok(())
    }

    pub fn initializers(&self) -> &BTreeMap<String, TensorValue> {
        &self.initializers
    }

    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    /// Checks that every slot referenced by a node resolves within this
    /// graph, by name, to exactly one declaration.
    pub fn validate_references(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            for slot in node.inputs.iter().chain(node.outputs.iter()).flatten() {
                let arg = self
                    .args
                    .get(slot.0 as usize)
                    .ok_or_else(|| anyhow!("node {} references unknown slot {:?}", index, slot))?;
                let resolved = self.find_arg(&arg.name);
                if resolved != Some(*slot) {
                    bail!(
                        "slot '{}' of node {} does not resolve to its declaration",
                        arg.name,
                        index
                    );
                }
            }
        }
        Ok(())
    }
}
