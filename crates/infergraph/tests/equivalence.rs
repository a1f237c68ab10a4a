use std::collections::BTreeMap;

use infergraph::compare::{
    compare_node_outputs, compare_tensor_values, compare_type_descs, compare_value_infos,
    ComparisonFailure,
};
use infergraph::graph::{Dim, Graph, TypeDesc};
use infergraph::model::{ModelDoc, NodeDoc, TensorDoc, TensorElements, ValueInfoDoc};
use infergraph::tensor::{ElementType, TensorValue};

fn nested_type(depth_marker: &str, leaf_dim: i64) -> TypeDesc {
    // sequence -> map -> sequence -> tensor, four levels deep.
    TypeDesc::sequence(TypeDesc::map(
        ElementType::I64,
        TypeDesc::sequence(
            TypeDesc::tensor(
                ElementType::F32,
                vec![Dim::Fixed(leaf_dim), Dim::Symbolic(depth_marker.to_string())],
            ),
        ),
    ))
}

#[test]
fn identical_nested_types_compare_equal() {
    let left = nested_type("batch", 2);
    let right = nested_type("batch", 2);
    compare_type_descs("value", &left, &right).unwrap();
}

#[test]
fn nested_type_mismatch_is_detected_at_every_level() {
    let reference = nested_type("batch", 2);

    // Level 0: sequence vs tensor.
    let err = compare_type_descs(
        "value",
        &reference,
        &TypeDesc::fixed_tensor(ElementType::F32, &[2]),
    )
    .unwrap_err();
    assert!(matches!(err, ComparisonFailure::TypeVariant { .. }));

    // Level 1: map key type differs.
    let other = TypeDesc::sequence(TypeDesc::map(
        ElementType::I32,
        TypeDesc::sequence(TypeDesc::tensor(
            ElementType::F32,
            vec![Dim::Fixed(2), Dim::Symbolic("batch".to_string())],
        )),
    ));
    let err = compare_type_descs("value", &reference, &other).unwrap_err();
    assert!(matches!(err, ComparisonFailure::MapKeyType { .. }));

    // Level 2: sequence replaced by tensor inside the map.
    let other = TypeDesc::sequence(TypeDesc::map(
        ElementType::I64,
        TypeDesc::fixed_tensor(ElementType::F32, &[2]),
    ));
    let err = compare_type_descs("value", &reference, &other).unwrap_err();
    assert!(matches!(err, ComparisonFailure::TypeVariant { .. }));

    // Level 3: leaf tensor element type differs.
    let other = TypeDesc::sequence(TypeDesc::map(
        ElementType::I64,
        TypeDesc::sequence(TypeDesc::tensor(
            ElementType::F64,
            vec![Dim::Fixed(2), Dim::Symbolic("batch".to_string())],
        )),
    ));
    let err = compare_type_descs("value", &reference, &other).unwrap_err();
    assert!(matches!(err, ComparisonFailure::ElemType { .. }));

    // Level 3: leaf dimension value differs, reported with its index.
    let err = compare_type_descs("value", &reference, &nested_type("batch", 3)).unwrap_err();
    match err {
        ComparisonFailure::DimMismatch { index, .. } => assert_eq!(index, 0),
        other => panic!("expected DimMismatch, got {other:?}"),
    }

    // Level 3: symbolic dimension name differs.
    let err = compare_type_descs("value", &reference, &nested_type("time", 2)).unwrap_err();
    match err {
        ComparisonFailure::DimMismatch { index, .. } => assert_eq!(index, 1),
        other => panic!("expected DimMismatch, got {other:?}"),
    }
}

#[test]
fn dim_alternative_must_match_not_just_render() {
    // Fixed(2) and Symbolic("2") render identically but are different
    // alternatives.
    let left = TypeDesc::tensor(ElementType::F32, vec![Dim::Fixed(2)]);
    let right = TypeDesc::tensor(ElementType::F32, vec![Dim::Symbolic("2".to_string())]);
    let err = compare_type_descs("value", &left, &right).unwrap_err();
    assert!(matches!(err, ComparisonFailure::DimMismatch { .. }));

    let left = TypeDesc::tensor(ElementType::F32, vec![Dim::Anonymous]);
    let right = TypeDesc::tensor(ElementType::F32, vec![Dim::Anonymous]);
    compare_type_descs("value", &left, &right).unwrap();
}

#[test]
fn denotation_participates_in_equality() {
    let left = TypeDesc::fixed_tensor(ElementType::F32, &[1]).with_denotation("image");
    let right = TypeDesc::fixed_tensor(ElementType::F32, &[1]);
    let err = compare_type_descs("value", &left, &right).unwrap_err();
    assert!(matches!(err, ComparisonFailure::Denotation { .. }));
}

#[test]
fn tensor_equality_is_content_based_not_representation_based() {
    // Same logical tensor built through two different construction paths.
    let direct = TensorValue::from_f32(vec![2, 2], vec![1.0, -2.5, 3.0, 0.0]).unwrap();
    let raw = direct.to_le_bytes();
    let decoded = TensorValue::from_le_bytes(ElementType::F32, vec![2, 2], &raw).unwrap();
    compare_tensor_values("t", &direct, &decoded).unwrap();

    let strings_a =
        TensorValue::from_strings(vec![2], vec!["a".to_string(), "b".to_string()]).unwrap();
    let strings_b =
        TensorValue::from_strings(vec![2], vec!["a".to_string(), "b".to_string()]).unwrap();
    compare_tensor_values("s", &strings_a, &strings_b).unwrap();
}

#[test]
fn tensor_mismatches_name_the_offending_element() {
    let left = TensorValue::from_f32(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
    let right = TensorValue::from_f32(vec![3], vec![1.0, 9.0, 3.0]).unwrap();
    match compare_tensor_values("weights", &left, &right).unwrap_err() {
        ComparisonFailure::TensorContent { name, index } => {
            assert_eq!(name, "weights");
            assert_eq!(index, 1);
        }
        other => panic!("expected TensorContent, got {other:?}"),
    }

    let left = TensorValue::from_f32(vec![2], vec![1.0, 2.0]).unwrap();
    let right = TensorValue::from_f32(vec![1, 2], vec![1.0, 2.0]).unwrap();
    assert!(matches!(
        compare_tensor_values("weights", &left, &right),
        Err(ComparisonFailure::TensorShape { .. })
    ));

    let left = TensorValue::from_f32(vec![1], vec![1.0]).unwrap();
    let right = TensorValue::from_i32(vec![1], vec![1]).unwrap();
    assert!(matches!(
        compare_tensor_values("weights", &left, &right),
        Err(ComparisonFailure::TensorElemType { .. })
    ));
}

fn graph_with_node_outputs(outputs: Vec<String>) -> Graph {
    ModelDoc {
        name: "g".to_string(),
        opset: 1,
        inputs: vec![ValueInfoDoc {
            name: "x".to_string(),
            doc_string: String::new(),
            ty: TypeDesc::fixed_tensor(ElementType::F32, &[1]),
        }],
        outputs: Vec::new(),
        value_infos: Vec::new(),
        nodes: vec![NodeDoc {
            name: "n".to_string(),
            op_type: "Identity".to_string(),
            domain: String::new(),
            attributes: BTreeMap::new(),
            inputs: vec!["x".to_string()],
            outputs,
        }],
        initializers: Vec::new(),
    }
    .into_graph()
    .unwrap()
}

#[test]
fn absent_output_slot_must_be_absent_on_both_sides() {
    let left = graph_with_node_outputs(vec!["y".to_string(), String::new()]);
    let matching = graph_with_node_outputs(vec!["y".to_string(), String::new()]);
    compare_node_outputs(&left, &matching).unwrap();

    let divergent = graph_with_node_outputs(vec!["y".to_string(), "extra".to_string()]);
    match compare_node_outputs(&left, &divergent).unwrap_err() {
        ComparisonFailure::OutputPresence { node, slot } => {
            assert_eq!(node, 0);
            assert_eq!(slot, 1);
        }
        other => panic!("expected OutputPresence, got {other:?}"),
    }
}

#[test]
fn node_output_name_and_count_mismatches_are_reported() {
    let left = graph_with_node_outputs(vec!["y".to_string()]);
    let renamed = graph_with_node_outputs(vec!["z".to_string()]);
    assert!(matches!(
        compare_node_outputs(&left, &renamed),
        Err(ComparisonFailure::OutputName { node: 0, slot: 0, .. })
    ));

    let widened = graph_with_node_outputs(vec!["y".to_string(), "aux".to_string()]);
    assert!(matches!(
        compare_node_outputs(&left, &widened),
        Err(ComparisonFailure::OutputCount { node: 0, .. })
    ));
}

#[test]
fn value_info_doc_string_mismatch_is_reported() {
    let make = |doc_string: &str| {
        ModelDoc {
            name: "g".to_string(),
            opset: 1,
            inputs: vec![ValueInfoDoc {
                name: "x".to_string(),
                doc_string: doc_string.to_string(),
                ty: TypeDesc::fixed_tensor(ElementType::F32, &[1]),
            }],
            outputs: Vec::new(),
            value_infos: Vec::new(),
            nodes: Vec::new(),
            initializers: vec![TensorDoc {
                name: "w".to_string(),
                dims: vec![1],
                elements: TensorElements::F32(vec![0.5]),
            }],
        }
        .into_graph()
        .unwrap()
    };
    let left = make("the state variable");
    compare_value_infos(&left, &make("the state variable")).unwrap();
    assert!(matches!(
        compare_value_infos(&left, &make("")),
        Err(ComparisonFailure::DocString { .. })
    ));
}
