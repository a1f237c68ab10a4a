//! Inference sessions: Load → Initialize → Run.
//!
//! The lifecycle is an explicit state machine. Every public operation is
//! guarded by the current stage; a failed Load or Initialize moves the
//! session to a terminal `Failed` stage and the caller must discard it.
//! After a successful Initialize the session state is immutable, so
//! repeated Run calls need no locking.

mod options;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::format::{
    DeserializationError, ModelLoader, ModelSaver, SerializationError,
};
use crate::graph::{Graph, NodeId, TypeKind};
use crate::kernels::{KernelContext, KernelError, KernelRegistry, OpKernel};
use crate::model::ModelDoc;
use crate::tensor::{ElementType, TensorValue};

pub use options::{
    ModelFormat, SessionOptions, CONFIG_LOAD_MODEL_FORMAT, CONFIG_LOG_ID,
    CONFIG_OPTIMIZED_MODEL_PATH, CONFIG_SAVE_MODEL_FORMAT,
};

/// Operation invoked out of state-machine order.
#[derive(Debug, Error)]
#[error("cannot {operation}: session is {stage}")]
pub struct SequenceError {
    pub operation: &'static str,
    pub stage: &'static str,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("model document error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed model: {0}")]
    Malformed(#[from] anyhow::Error),
    #[error(transparent)]
    Deserialize(#[from] DeserializationError),
    #[error("unrecognized load format '{0}'")]
    UnknownFormat(String),
    #[error("cannot determine model format for the source")]
    UnresolvedFormat,
}

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("no kernel registered for '{op_type}' (domain '{domain}') at opset {opset}")]
    MissingKernel {
        op_type: String,
        domain: String,
        opset: i64,
    },
    #[error("value '{name}' consumed by node {node} is produced nowhere")]
    UnresolvedValue { name: String, node: usize },
    #[error("value '{name}' is produced by more than one node")]
    DuplicateProducer { name: String },
    #[error("graph contains a cycle")]
    Cycle,
    #[error("unrecognized save format '{0}'")]
    UnknownSaveFormat(String),
    #[error("model export failed: {0}")]
    Save(#[from] SerializationError),
    #[error("invalid graph: {0}")]
    Invalid(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("'{0}' is not a graph input")]
    UnknownInput(String),
    #[error("required input '{0}' was not supplied")]
    MissingInput(String),
    #[error("input '{0}' is not declared as a tensor")]
    NonTensorInput(String),
    #[error("input '{name}' element type mismatch: declared {expected:?}, got {actual:?}")]
    InputTypeMismatch {
        name: String,
        expected: ElementType,
        actual: ElementType,
    },
    #[error("input '{name}' shape mismatch: declared {expected}, got {actual}")]
    InputShapeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("'{0}' is not a declared value")]
    UnknownOutput(String),
    #[error("node {node} ('{op_type}') returned {actual} outputs, expected {expected}")]
    OutputArity {
        node: usize,
        op_type: String,
        expected: usize,
        actual: usize,
    },
    #[error("node {node} ('{op_type}') produced a value for absent output slot {slot}")]
    UnexpectedOutput {
        node: usize,
        op_type: String,
        slot: usize,
    },
    #[error("node {node} ('{op_type}') failed: {source}")]
    Operator {
        node: usize,
        op_type: String,
        #[source]
        source: KernelError,
    },
}

/// Error surface of the public session API.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("initialization failed: {0}")]
    Initialization(#[from] InitializationError),
    #[error("run failed: {0}")]
    Run(#[from] RunError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unloaded,
    Loaded,
    Initialized,
    Failed,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Unloaded => "unloaded",
            Stage::Loaded => "loaded",
            Stage::Initialized => "initialized",
            Stage::Failed => "failed",
        }
    }
}

struct PlannedNode {
    node: NodeId,
    kernel: Arc<dyn OpKernel>,
}

/// Materialized, executable binding of a graph: initialized constant
/// tensors plus the resolved execution plan. Built once during Initialize
/// and immutable afterwards.
pub struct SessionState {
    initializers: BTreeMap<String, Arc<TensorValue>>,
    plan: Vec<PlannedNode>,
}

impl SessionState {
    /// The initializer name → tensor map.
    pub fn initialized_tensors(&self) -> &BTreeMap<String, Arc<TensorValue>> {
        &self.initializers
    }

    /// Number of nodes in the resolved execution plan.
    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }
}

/// Orchestrates Load → Initialize → Run over one graph.
pub struct InferenceSession {
    options: SessionOptions,
    registry: Arc<KernelRegistry>,
    stage: Stage,
    graph: Option<Graph>,
    state: Option<SessionState>,
}

impl InferenceSession {
    pub fn new(options: SessionOptions, registry: Arc<KernelRegistry>) -> Self {
        InferenceSession {
            options,
            registry,
            stage: Stage::Unloaded,
            graph: None,
            state: None,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The loaded graph, once `load` has succeeded.
    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// The session state, once `initialize` has succeeded.
    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    fn guard(&self, expected: Stage, operation: &'static str) -> Result<(), SequenceError> {
        if self.stage != expected {
            return Err(SequenceError {
                operation,
                stage: self.stage.name(),
            });
        }
        Ok(())
    }

    /// Loads a model from a file. The format comes from the
    /// `session.load_model_format` config entry when present, otherwise
    /// from the filename extension.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.guard(Stage::Unloaded, "load")?;
        let path = path.as_ref();
        let result = self.load_path_inner(path);
        self.finish_load(result, &path.display().to_string())
    }

    /// Loads a model from an in-memory buffer. The format comes from the
    /// config entry when present; otherwise the blob's magic header decides.
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.guard(Stage::Unloaded, "load")?;
        let result = self
            .configured_format(CONFIG_LOAD_MODEL_FORMAT)
            .map_err(LoadError::UnknownFormat)
            .map(|explicit| explicit.unwrap_or_else(|| ModelFormat::sniff(bytes)))
            .and_then(|fmt| Self::decode(bytes, fmt));
        self.finish_load(result, "<buffer>")
    }

    fn finish_load(
        &mut self,
        result: Result<Graph, LoadError>,
        source: &str,
    ) -> Result<(), SessionError> {
        match result {
            Ok(graph) => {
                info!(
                    log_id = self.options.log_id(),
                    source,
                    nodes = graph.nodes().len(),
                    "model loaded"
                );
                self.graph = Some(graph);
                self.stage = Stage::Loaded;
                Ok(())
            }
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err.into())
            }
        }
    }

    fn load_path_inner(&self, path: &Path) -> Result<Graph, LoadError> {
        let format = match self
            .configured_format(CONFIG_LOAD_MODEL_FORMAT)
            .map_err(LoadError::UnknownFormat)?
        {
            Some(explicit) => explicit,
            None => ModelFormat::from_extension(path).ok_or(LoadError::UnresolvedFormat)?,
        };
        let bytes = fs::read(path)?;
        Self::decode(&bytes, format)
    }

    fn decode(bytes: &[u8], format: ModelFormat) -> Result<Graph, LoadError> {
        match format {
            ModelFormat::Json => {
                let doc = ModelDoc::from_json(bytes)?;
                Ok(doc.into_graph()?)
            }
            ModelFormat::Binary => Ok(ModelLoader::from_bytes(bytes)?),
        }
    }

    fn configured_format(&self, key: &str) -> Result<Option<ModelFormat>, String> {
        match self.options.config_entry(key) {
            Some(value) => ModelFormat::parse(value)
                .map(Some)
                .ok_or_else(|| value.to_string()),
            None => Ok(None),
        }
    }

    /// Validates the graph, resolves kernels, derives the execution plan,
    /// materializes initializers, and (when configured) serializes the
    /// model to the optimized-model path. Synchronous: does not return
    /// until the optional write completes or fails.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.guard(Stage::Loaded, "initialize")?;
        match self.initialize_inner() {
            Ok(state) => {
                info!(
                    log_id = self.options.log_id(),
                    plan_nodes = state.plan.len(),
                    initializers = state.initializers.len(),
                    "session initialized"
                );
                self.state = Some(state);
                self.stage = Stage::Initialized;
                Ok(())
            }
            Err(err) => {
                self.stage = Stage::Failed;
                self.state = None;
                Err(err.into())
            }
        }
    }

    fn initialize_inner(&self) -> Result<SessionState, InitializationError> {
        let graph = self.graph.as_ref().expect("loaded graph present");
        graph.validate_references()?;

        // Map each value name to the node producing it.
        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (index, node) in graph.nodes().iter().enumerate() {
            for slot in node.outputs.iter().flatten() {
                let name = graph.arg(*slot).name.as_str();
                if producers.insert(name, index).is_some() {
                    return Err(InitializationError::DuplicateProducer {
                        name: name.to_string(),
                    });
                }
            }
        }

        let mut feedable: Vec<&str> = graph
            .inputs()
            .iter()
            .map(|&id| graph.arg(id).name.as_str())
            .collect();
        feedable.extend(graph.initializers().keys().map(|name| name.as_str()));

        // Every consumed value must come from an input, an initializer, or
        // some node's output; build the dependency edges along the way.
        let node_count = graph.nodes().len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut in_degree: Vec<usize> = vec![0; node_count];
        for (index, node) in graph.nodes().iter().enumerate() {
            for slot in node.inputs.iter().flatten() {
                let name = graph.arg(*slot).name.as_str();
                if let Some(&producer) = producers.get(name) {
                    dependents[producer].push(index);
                    in_degree[index] += 1;
                } else if !feedable.contains(&name) {
                    return Err(InitializationError::UnresolvedValue {
                        name: name.to_string(),
                        node: index,
                    });
                }
            }
        }

        // Kahn's algorithm; ties resolve in node-index order so the plan is
        // deterministic.
        let mut queue: VecDeque<usize> = (0..node_count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(node_count);
        while let Some(index) = queue.pop_front() {
            order.push(index);
            for &next in &dependents[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        if order.len() != node_count {
            return Err(InitializationError::Cycle);
        }

        let mut plan = Vec::with_capacity(node_count);
        for index in order {
            let node = &graph.nodes()[index];
            let kernel = self
                .registry
                .resolve(&node.op_type, &node.domain, graph.opset())
                .ok_or_else(|| InitializationError::MissingKernel {
                    op_type: node.op_type.clone(),
                    domain: node.domain.clone(),
                    opset: graph.opset(),
                })?;
            plan.push(PlannedNode {
                node: NodeId(index as u32),
                kernel,
            });
        }

        let initializers: BTreeMap<String, Arc<TensorValue>> = graph
            .initializers()
            .iter()
            .map(|(name, value)| (name.clone(), Arc::new(value.clone())))
            .collect();

        if let Some(path) = self.options.config_entry(CONFIG_OPTIMIZED_MODEL_PATH) {
            self.export_model(graph, &initializers, Path::new(path))?;
        }

        Ok(SessionState { initializers, plan })
    }

    fn export_model(
        &self,
        graph: &Graph,
        initializers: &BTreeMap<String, Arc<TensorValue>>,
        path: &Path,
    ) -> Result<(), InitializationError> {
        let format = match self.options.config_entry(CONFIG_SAVE_MODEL_FORMAT) {
            Some(value) => ModelFormat::parse(value)
                .ok_or_else(|| InitializationError::UnknownSaveFormat(value.to_string()))?,
            None => ModelFormat::from_extension(path).unwrap_or(ModelFormat::Binary),
        };
        match format {
            ModelFormat::Binary => ModelSaver::save(path, graph, initializers)?,
            ModelFormat::Json => {
                let doc = ModelDoc::from_graph(graph)?;
                let bytes = doc
                    .to_json()
                    .map_err(|err| InitializationError::Invalid(err.into()))?;
                fs::write(path, bytes).map_err(SerializationError::Io)?;
            }
        }
        info!(
            log_id = self.options.log_id(),
            path = %path.display(),
            "serialized model written"
        );
        Ok(())
    }

    /// Binds the supplied inputs by name, executes the plan in dependency
    /// order, and returns one entry per requested output name, in request
    /// order. `None` marks a declared value that was not produced.
    /// All-or-nothing: the first operator failure aborts the whole run.
    pub fn run<S: AsRef<str>>(
        &self,
        inputs: &HashMap<String, TensorValue>,
        output_names: &[S],
    ) -> Result<Vec<Option<TensorValue>>, SessionError> {
        self.guard(Stage::Initialized, "run")?;
        let graph = self.graph.as_ref().expect("initialized graph present");
        let state = self.state.as_ref().expect("initialized state present");

        let mut workspace: HashMap<String, Arc<TensorValue>> = state
            .initializers
            .iter()
            .map(|(name, value)| (name.clone(), Arc::clone(value)))
            .collect();

        for (name, value) in inputs {
            let id = graph
                .find_arg(name)
                .filter(|id| graph.inputs().contains(id))
                .ok_or_else(|| RunError::UnknownInput(name.clone()))?;
            validate_feed(name, &graph.arg(id).ty.kind, value)?;
            workspace.insert(name.clone(), Arc::new(value.clone()));
        }

        for &id in graph.inputs() {
            let name = graph.arg(id).name.as_str();
            if !workspace.contains_key(name) {
                return Err(RunError::MissingInput(name.to_string()).into());
            }
        }

        for planned in &state.plan {
            let node = graph.node(planned.node).expect("planned node present");
            let node_index = planned.node.0 as usize;

            let gathered: Vec<Option<Arc<TensorValue>>> = node
                .inputs
                .iter()
                .map(|slot| slot.and_then(|id| workspace.get(&graph.arg(id).name).cloned()))
                .collect();
            let input_refs: Vec<Option<&TensorValue>> =
                gathered.iter().map(|value| value.as_deref()).collect();
            let output_slots: Vec<bool> = node.outputs.iter().map(Option::is_some).collect();

            let ctx = KernelContext::new(input_refs, &node.attributes, &output_slots);
            let produced =
                planned
                    .kernel
                    .compute(&ctx)
                    .map_err(|source| RunError::Operator {
                        node: node_index,
                        op_type: node.op_type.clone(),
                        source,
                    })?;

            if produced.len() != node.outputs.len() {
                return Err(RunError::OutputArity {
                    node: node_index,
                    op_type: node.op_type.clone(),
                    expected: node.outputs.len(),
                    actual: produced.len(),
                }
                .into());
            }
            for (slot_index, (slot, value)) in
                node.outputs.iter().zip(produced.into_iter()).enumerate()
            {
                match (slot, value) {
                    (Some(id), Some(value)) => {
                        workspace.insert(graph.arg(*id).name.clone(), Arc::new(value));
                    }
                    (None, Some(_)) => {
                        return Err(RunError::UnexpectedOutput {
                            node: node_index,
                            op_type: node.op_type.clone(),
                            slot: slot_index,
                        }
                        .into());
                    }
                    (_, None) => {}
                }
            }
        }

        let mut fetched = Vec::with_capacity(output_names.len());
        for name in output_names {
            let name = name.as_ref();
            if graph.find_arg(name).is_none() {
                return Err(RunError::UnknownOutput(name.to_string()).into());
            }
            fetched.push(workspace.get(name).map(|value| value.as_ref().clone()));
        }
        debug!(
            log_id = self.options.log_id(),
            fetched = fetched.len(),
            "run complete"
        );
        Ok(fetched)
    }
}

fn validate_feed(name: &str, declared: &TypeKind, value: &TensorValue) -> Result<(), RunError> {
    let tensor_ty = match declared {
        TypeKind::Tensor(tensor_ty) => tensor_ty,
        _ => return Err(RunError::NonTensorInput(name.to_string())),
    };
    if tensor_ty.elem != value.elem() {
        return Err(RunError::InputTypeMismatch {
            name: name.to_string(),
            expected: tensor_ty.elem,
            actual: value.elem(),
        });
    }
    // An empty declared dimension list means the shape is unknown and any
    // feed shape is acceptable.
    if tensor_ty.dims.is_empty() {
        return Ok(());
    }
    let shape_error = || RunError::InputShapeMismatch {
        name: name.to_string(),
        expected: format!(
            "[{}]",
            tensor_ty
                .dims
                .iter()
                .map(|d| d.display())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        actual: format!("{:?}", value.dims()),
    };
    if tensor_ty.dims.len() != value.rank() {
        return Err(shape_error());
    }
    for (declared_dim, &actual) in tensor_ty.dims.iter().zip(value.dims()) {
        if let crate::graph::Dim::Fixed(fixed) = declared_dim {
            if *fixed < 0 || *fixed as usize != actual {
                return Err(shape_error());
            }
        }
    }
    Ok(())
}
