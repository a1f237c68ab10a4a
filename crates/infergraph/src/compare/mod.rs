//! Deep equivalence checking between two graph / session-state pairs.
//!
//! Proves that a graph rebuilt from a serialized model is observably
//! identical to the directly-loaded original. Checks run in a fixed order
//! and fail fast on the first mismatch, naming the offending entity
//! (tensor name, node index, dimension index) rather than returning a bare
//! boolean. Each check is exported on its own so it can be tested in
//! isolation.
//!
//! Binary encodings of the same logical tensor differ across formats, so
//! tensor comparison is value-level, never a raw comparison of serialized
//! bytes.

use thiserror::Error;

use crate::graph::{Dim, Graph, TypeDesc, TypeKind};
use crate::session::SessionState;
use crate::tensor::{ElementType, TensorData, TensorValue};

#[derive(Debug, Error)]
pub enum ComparisonFailure {
    #[error("initializer count mismatch: {left} vs {right}")]
    InitializerCount { left: usize, right: usize },
    #[error("initializer '{name}' is missing from the second graph")]
    InitializerMissing { name: String },
    #[error("tensor '{name}' element type mismatch: {left:?} vs {right:?}")]
    TensorElemType {
        name: String,
        left: ElementType,
        right: ElementType,
    },
    #[error("tensor '{name}' shape mismatch: {left:?} vs {right:?}")]
    TensorShape {
        name: String,
        left: Vec<usize>,
        right: Vec<usize>,
    },
    #[error("tensor '{name}' content mismatch at element {index}")]
    TensorContent { name: String, index: usize },
    #[error("{context}: denotation mismatch: '{left}' vs '{right}'")]
    Denotation {
        context: String,
        left: String,
        right: String,
    },
    #[error("{context}: type variant mismatch: {left} vs {right}")]
    TypeVariant {
        context: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("{context}: element type mismatch: {left:?} vs {right:?}")]
    ElemType {
        context: String,
        left: ElementType,
        right: ElementType,
    },
    #[error("{context}: dimension count mismatch: {left} vs {right}")]
    DimCount {
        context: String,
        left: usize,
        right: usize,
    },
    #[error("{context}: dimension {index} mismatch: {left} vs {right}")]
    DimMismatch {
        context: String,
        index: usize,
        left: String,
        right: String,
    },
    #[error("{context}: map key type mismatch: {left:?} vs {right:?}")]
    MapKeyType {
        context: String,
        left: ElementType,
        right: ElementType,
    },
    #[error("value '{name}' is missing from the second graph")]
    ArgMissing { name: String },
    #[error("value '{name}' doc string mismatch: '{left}' vs '{right}'")]
    DocString {
        name: String,
        left: String,
        right: String,
    },
    #[error("node {index} is missing from the second graph")]
    NodeMissing { index: usize },
    #[error("node {node} output count mismatch: {left} vs {right}")]
    OutputCount {
        node: usize,
        left: usize,
        right: usize,
    },
    #[error("node {node} output slot {slot} presence mismatch")]
    OutputPresence { node: usize, slot: usize },
    #[error("node {node} output slot {slot} name mismatch: '{left}' vs '{right}'")]
    OutputName {
        node: usize,
        slot: usize,
        left: String,
        right: String,
    },
}

/// Step 1: the two initializer maps have equal cardinality and, name by
/// name, equal shape, element type, and content.
pub fn compare_initializers(
    left: &SessionState,
    right: &SessionState,
) -> Result<(), ComparisonFailure> {
    let left_map = left.initialized_tensors();
    let right_map = right.initialized_tensors();
    if left_map.len() != right_map.len() {
        return Err(ComparisonFailure::InitializerCount {
            left: left_map.len(),
            right: right_map.len(),
        });
    }
    for (name, left_value) in left_map {
        let right_value =
            right_map
                .get(name)
                .ok_or_else(|| ComparisonFailure::InitializerMissing {
                    name: name.clone(),
                })?;
        compare_tensor_values(name, left_value, right_value)?;
    }
    Ok(())
}

/// Value-level tensor comparison: shape, element type, then content.
/// Strings compare element by element, everything else bitwise per element.
pub fn compare_tensor_values(
    name: &str,
    left: &TensorValue,
    right: &TensorValue,
) -> Result<(), ComparisonFailure> {
    if left.dims() != right.dims() {
        return Err(ComparisonFailure::TensorShape {
            name: name.to_string(),
            left: left.dims().to_vec(),
            right: right.dims().to_vec(),
        });
    }
    if left.elem() != right.elem() {
        return Err(ComparisonFailure::TensorElemType {
            name: name.to_string(),
            left: left.elem(),
            right: right.elem(),
        });
    }
    let mismatch = |index: usize| ComparisonFailure::TensorContent {
        name: name.to_string(),
        index,
    };
    match (left.data(), right.data()) {
        (TensorData::F32(a), TensorData::F32(b)) => {
            for (index, (x, y)) in a.iter().zip(b).enumerate() {
                if x.to_bits() != y.to_bits() {
                    return Err(mismatch(index));
                }
            }
        }
        (TensorData::F64(a), TensorData::F64(b)) => {
            for (index, (x, y)) in a.iter().zip(b).enumerate() {
                if x.to_bits() != y.to_bits() {
                    return Err(mismatch(index));
                }
            }
        }
        (TensorData::I32(a), TensorData::I32(b)) => {
            if let Some(index) = first_diff(a, b) {
                return Err(mismatch(index));
            }
        }
        (TensorData::I64(a), TensorData::I64(b)) => {
            if let Some(index) = first_diff(a, b) {
                return Err(mismatch(index));
            }
        }
        (TensorData::U8(a), TensorData::U8(b)) | (TensorData::Bool(a), TensorData::Bool(b)) => {
            if let Some(index) = first_diff(a, b) {
                return Err(mismatch(index));
            }
        }
        (TensorData::Str(a), TensorData::Str(b)) => {
            if let Some(index) = first_diff(a, b) {
                return Err(mismatch(index));
            }
        }
        // Element types already matched above.
        _ => unreachable!("element types diverged after equality check"),
    }
    Ok(())
}

fn first_diff<T: PartialEq>(a: &[T], b: &[T]) -> Option<usize> {
    a.iter().zip(b).position(|(x, y)| x != y)
}

/// Step 2: recursive type-descriptor equality over the closed variant sum.
pub fn compare_type_descs(
    context: &str,
    left: &TypeDesc,
    right: &TypeDesc,
) -> Result<(), ComparisonFailure> {
    if left.denotation != right.denotation {
        return Err(ComparisonFailure::Denotation {
            context: context.to_string(),
            left: left.denotation.clone(),
            right: right.denotation.clone(),
        });
    }
    match (&left.kind, &right.kind) {
        (TypeKind::Tensor(a), TypeKind::Tensor(b)) => {
            if a.elem != b.elem {
                return Err(ComparisonFailure::ElemType {
                    context: context.to_string(),
                    left: a.elem,
                    right: b.elem,
                });
            }
            if a.dims.len() != b.dims.len() {
                return Err(ComparisonFailure::DimCount {
                    context: context.to_string(),
                    left: a.dims.len(),
                    right: b.dims.len(),
                });
            }
            for (index, (da, db)) in a.dims.iter().zip(&b.dims).enumerate() {
                let equal = matches!(
                    (da, db),
                    (Dim::Fixed(x), Dim::Fixed(y)) if x == y
                ) || matches!(
                    (da, db),
                    (Dim::Symbolic(x), Dim::Symbolic(y)) if x == y
                ) || matches!((da, db), (Dim::Anonymous, Dim::Anonymous));
                if !equal {
                    return Err(ComparisonFailure::DimMismatch {
                        context: context.to_string(),
                        index,
                        left: da.display(),
                        right: db.display(),
                    });
                }
            }
            Ok(())
        }
        (TypeKind::Sequence(a), TypeKind::Sequence(b)) => {
            compare_type_descs(&format!("{context}/sequence"), a, b)
        }
        (
            TypeKind::Map {
                key: key_a,
                value: value_a,
            },
            TypeKind::Map {
                key: key_b,
                value: value_b,
            },
        ) => {
            if key_a != key_b {
                return Err(ComparisonFailure::MapKeyType {
                    context: context.to_string(),
                    left: *key_a,
                    right: *key_b,
                });
            }
            compare_type_descs(&format!("{context}/map"), value_a, value_b)
        }
        (a, b) => Err(ComparisonFailure::TypeVariant {
            context: context.to_string(),
            left: a.tag_name(),
            right: b.tag_name(),
        }),
    }
}

/// Step 3: value-info equality (name, doc string, type descriptor) for
/// every graph-level input of `left`, including initializer-backed inputs.
pub fn compare_value_infos(left: &Graph, right: &Graph) -> Result<(), ComparisonFailure> {
    for &id in left.inputs() {
        let left_arg = left.arg(id);
        let right_id =
            right
                .find_arg(&left_arg.name)
                .ok_or_else(|| ComparisonFailure::ArgMissing {
                    name: left_arg.name.clone(),
                })?;
        let right_arg = right.arg(right_id);
        if left_arg.doc_string != right_arg.doc_string {
            return Err(ComparisonFailure::DocString {
                name: left_arg.name.clone(),
                left: left_arg.doc_string.clone(),
                right: right_arg.doc_string.clone(),
            });
        }
        compare_type_descs(&format!("input '{}'", left_arg.name), &left_arg.ty, &right_arg.ty)?;
    }
    Ok(())
}

/// Step 4: for every node of `left`, the node at the same index in `right`
/// has the same output-slot count, and each slot is either absent on both
/// sides or present on both with equal name and type descriptor.
pub fn compare_node_outputs(left: &Graph, right: &Graph) -> Result<(), ComparisonFailure> {
    for (index, left_node) in left.nodes().iter().enumerate() {
        let right_node = right
            .nodes()
            .get(index)
            .ok_or(ComparisonFailure::NodeMissing { index })?;
        if left_node.outputs.len() != right_node.outputs.len() {
            return Err(ComparisonFailure::OutputCount {
                node: index,
                left: left_node.outputs.len(),
                right: right_node.outputs.len(),
            });
        }
        for (slot, (left_slot, right_slot)) in left_node
            .outputs
            .iter()
            .zip(right_node.outputs.iter())
            .enumerate()
        {
            match (left_slot, right_slot) {
                (None, None) => {}
                (Some(left_id), Some(right_id)) => {
                    let left_arg = left.arg(*left_id);
                    let right_arg = right.arg(*right_id);
                    if left_arg.name != right_arg.name {
                        return Err(ComparisonFailure::OutputName {
                            node: index,
                            slot,
                            left: left_arg.name.clone(),
                            right: right_arg.name.clone(),
                        });
                    }
                    compare_type_descs(
                        &format!("node {index} output '{}'", left_arg.name),
                        &left_arg.ty,
                        &right_arg.ty,
                    )?;
                }
                _ => return Err(ComparisonFailure::OutputPresence { node: index, slot }),
            }
        }
    }
    Ok(())
}

/// Runs all four checks in order, failing fast on the first mismatch.
pub fn check_graph_equivalence(
    left_graph: &Graph,
    left_state: &SessionState,
    right_graph: &Graph,
    right_state: &SessionState,
) -> Result<(), ComparisonFailure> {
    compare_initializers(left_state, right_state)?;
    compare_value_infos(left_graph, right_graph)?;
    compare_node_outputs(left_graph, right_graph)?;
    Ok(())
}
