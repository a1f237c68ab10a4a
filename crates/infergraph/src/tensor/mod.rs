//! Host-owned tensor values and their scalar element types.

mod element_type;
mod value;

pub use element_type::ElementType;
pub use value::{TensorData, TensorValue};
