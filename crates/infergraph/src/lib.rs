pub mod compare;
pub mod format;
pub mod graph;
pub mod kernels;
pub mod model;
pub mod session;
pub mod tensor;

pub use graph::{Graph, Node, NodeArg, NodeArgId, NodeId};
pub use kernels::{KernelRegistry, OpKernel};
pub use session::{InferenceSession, SessionOptions};
pub use tensor::{ElementType, TensorValue};
