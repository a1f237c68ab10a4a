use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use infergraph::compare::check_graph_equivalence;
use infergraph::graph::TypeDesc;
use infergraph::model::{ModelDoc, NodeDoc, TensorDoc, TensorElements, ValueInfoDoc};
use infergraph::session::{
    InferenceSession, SessionOptions, CONFIG_LOAD_MODEL_FORMAT, CONFIG_LOG_ID,
    CONFIG_OPTIMIZED_MODEL_PATH, CONFIG_SAVE_MODEL_FORMAT,
};
use infergraph::tensor::{ElementType, TensorValue};
use infergraph_kernels_cpu::shared_registry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn temp_path(name: &str, ext: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("infergraph_{name}_{timestamp}.{ext}"))
}

fn value_info(name: &str, ty: TypeDesc) -> ValueInfoDoc {
    ValueInfoDoc {
        name: name.to_string(),
        doc_string: String::new(),
        ty,
    }
}

/// Two chained Add nodes over a single state variable: feeding 123 yields
/// 125. The increment constant ships with the graph as an initializer.
fn counter_model() -> ModelDoc {
    ModelDoc {
        name: "counter".to_string(),
        opset: 1,
        inputs: vec![value_info(
            "state_var_in",
            TypeDesc::fixed_tensor(ElementType::F32, &[1]),
        )],
        outputs: vec![value_info(
            "state_var_out",
            TypeDesc::fixed_tensor(ElementType::F32, &[1]),
        )],
        value_infos: vec![value_info(
            "state_var_mid",
            TypeDesc::fixed_tensor(ElementType::F32, &[1]),
        )],
        nodes: vec![
            NodeDoc {
                name: "add_first".to_string(),
                op_type: "Add".to_string(),
                domain: String::new(),
                attributes: BTreeMap::new(),
                inputs: vec!["state_var_in".to_string(), "increment".to_string()],
                outputs: vec!["state_var_mid".to_string()],
            },
            NodeDoc {
                name: "add_second".to_string(),
                op_type: "Add".to_string(),
                domain: String::new(),
                attributes: BTreeMap::new(),
                inputs: vec!["state_var_mid".to_string(), "increment".to_string()],
                outputs: vec!["state_var_out".to_string()],
            },
        ],
        initializers: vec![TensorDoc {
            name: "increment".to_string(),
            dims: vec![1],
            elements: TensorElements::F32(vec![1.0]),
        }],
    }
}

/// Counter model enriched with the value kinds that stress serialization:
/// string and integer initializers, a nested sequence-of-map value, and a
/// declared-but-absent optional output slot.
fn exotic_model() -> ModelDoc {
    let mut doc = counter_model();
    doc.name = "counter_exotic".to_string();
    doc.initializers.push(TensorDoc {
        name: "class_names".to_string(),
        dims: vec![3],
        elements: TensorElements::Str(vec![
            "ok".to_string(),
            "warn".to_string(),
            "err".to_string(),
        ]),
    });
    doc.initializers.push(TensorDoc {
        name: "thresholds".to_string(),
        dims: vec![2, 2],
        elements: TensorElements::I64(vec![1, 2, 3, 4]),
    });
    let mut rng = StdRng::seed_from_u64(11);
    doc.initializers.push(TensorDoc {
        name: "noise".to_string(),
        dims: vec![4, 3],
        elements: TensorElements::F32((0..12).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()),
    });
    doc.value_infos.push(value_info(
        "wrapped",
        TypeDesc::sequence(TypeDesc::map(
            ElementType::I64,
            TypeDesc::fixed_tensor(ElementType::F32, &[2]),
        ))
        .with_denotation("per-class scores"),
    ));
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "note".to_string(),
        infergraph::graph::Attribute::Str("diagnostic passthrough".to_string()),
    );
    attributes.insert("level".to_string(), infergraph::graph::Attribute::Int(2));
    doc.nodes.push(NodeDoc {
        name: "wrap".to_string(),
        op_type: "Identity".to_string(),
        domain: String::new(),
        attributes,
        inputs: vec!["class_names".to_string()],
        outputs: vec!["wrapped".to_string(), String::new()],
    });
    doc
}

fn feed_state_var(value: f32) -> HashMap<String, TensorValue> {
    let mut inputs = HashMap::new();
    inputs.insert(
        "state_var_in".to_string(),
        TensorValue::from_f32(vec![1], vec![value]).unwrap(),
    );
    inputs
}

fn assert_counter_output(fetches: &[Option<TensorValue>]) {
    assert_eq!(fetches.len(), 1);
    let output = fetches[0].as_ref().expect("state_var_out produced");
    assert_eq!(output.dims(), &[1]);
    assert_eq!(output.f32_data()[0], 125.0);
}

/// Loads the native document, serializes during Initialize, reloads the
/// serialized form, and proves the two sessions observably identical.
fn save_and_compare(doc: &ModelDoc, save_format: &str, ext: &str) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let json_path = temp_path(&doc.name, "json");
    fs::write(&json_path, doc.to_json().unwrap()).unwrap();
    let saved_path = temp_path(&format!("{}_saved", doc.name), ext);

    let mut options = SessionOptions::new()
        .with_config_entry(CONFIG_LOG_ID, "serialize_roundtrip")
        .with_config_entry(CONFIG_SAVE_MODEL_FORMAT, save_format);
    options.add_config_entry(
        CONFIG_OPTIMIZED_MODEL_PATH,
        saved_path.display().to_string(),
    );
    let mut first = InferenceSession::new(options, shared_registry());
    first.load(&json_path).unwrap();
    first.initialize().unwrap();

    let options = SessionOptions::new()
        .with_config_entry(CONFIG_LOG_ID, "load_serialized")
        .with_config_entry(CONFIG_LOAD_MODEL_FORMAT, save_format);
    let mut second = InferenceSession::new(options, shared_registry());
    second.load(&saved_path).unwrap();
    second.initialize().unwrap();

    check_graph_equivalence(
        first.graph().unwrap(),
        first.state().unwrap(),
        second.graph().unwrap(),
        second.state().unwrap(),
    )
    .unwrap();

    let first_out = first.run(&feed_state_var(123.0), &["state_var_out"]).unwrap();
    let second_out = second
        .run(&feed_state_var(123.0), &["state_var_out"])
        .unwrap();
    assert_counter_output(&first_out);
    assert_counter_output(&second_out);

    fs::remove_file(&json_path).unwrap();
    fs::remove_file(&saved_path).unwrap();
}

#[test]
fn serialize_to_binary_format_roundtrips() {
    save_and_compare(&counter_model(), "igm", "igm");
}

#[test]
fn serialize_exotic_values_roundtrips() {
    save_and_compare(&exotic_model(), "igm", "igm");
}

#[test]
fn serialize_to_json_format_roundtrips() {
    save_and_compare(&counter_model(), "json", "json");
}

#[test]
fn load_serialized_model_from_buffer() {
    let doc = counter_model();
    let json_path = temp_path("buffer_src", "json");
    fs::write(&json_path, doc.to_json().unwrap()).unwrap();
    let saved_path = temp_path("buffer_saved", "igm");

    let options = SessionOptions::new().with_config_entry(
        CONFIG_OPTIMIZED_MODEL_PATH,
        saved_path.display().to_string(),
    );
    let mut first = InferenceSession::new(options, shared_registry());
    first.load(&json_path).unwrap();
    first.initialize().unwrap();

    // The blob's magic header identifies the format without config help.
    let bytes = fs::read(&saved_path).unwrap();
    let mut second = InferenceSession::new(SessionOptions::new(), shared_registry());
    second.load_from_bytes(&bytes).unwrap();
    second.initialize().unwrap();
    assert_eq!(second.state().unwrap().plan_len(), 2);

    let fetches = second
        .run(&feed_state_var(123.0), &["state_var_out"])
        .unwrap();
    assert_counter_output(&fetches);

    fs::remove_file(&json_path).unwrap();
    fs::remove_file(&saved_path).unwrap();
}

#[test]
fn format_config_entry_overrides_extension() {
    // A .json extension with an explicit binary load format must be decoded
    // as binary, and fail on JSON bytes.
    let doc = counter_model();
    let json_path = temp_path("override", "json");
    fs::write(&json_path, doc.to_json().unwrap()).unwrap();

    let options = SessionOptions::new().with_config_entry(CONFIG_LOAD_MODEL_FORMAT, "igm");
    let mut session = InferenceSession::new(options, shared_registry());
    assert!(session.load(&json_path).is_err());

    fs::remove_file(&json_path).unwrap();
}
