use infergraph::kernels::KernelError;
use infergraph::tensor::TensorValue;
use infergraph_kernels_cpu::loss::{
    softmax_cross_entropy, softmax_cross_entropy_grad, softmax_cross_entropy_loss,
    softmax_cross_entropy_loss_grad, Reduction,
};

fn f32_tensor(dims: Vec<usize>, data: Vec<f32>) -> TensorValue {
    TensorValue::from_f32(dims, data).unwrap()
}

fn i64_tensor(dims: Vec<usize>, data: Vec<i64>) -> TensorValue {
    TensorValue::from_i64(dims, data).unwrap()
}

/// Reference per-sample loss: `ln(sum(exp(row))) - row[class]`.
fn expected_sample_loss(row: &[f32], class: usize) -> f32 {
    let sum_exp: f32 = row.iter().map(|&x| x.exp()).sum();
    sum_exp.ln() - row[class]
}

#[test]
fn single_sample_mean_equals_sum() {
    // N = 1, D = 2, uniform logits, one-hot label on class 0.
    let logits = f32_tensor(vec![1, 2], vec![0.0, 0.0]);
    let label = f32_tensor(vec![1, 2], vec![1.0, 0.0]);

    let (mean_loss, _) = softmax_cross_entropy(&logits, &label, Reduction::Mean).unwrap();
    let (sum_loss, _) = softmax_cross_entropy(&logits, &label, Reduction::Sum).unwrap();

    assert!((mean_loss.f32_data()[0] - 2f32.ln()).abs() < 1e-6);
    assert_eq!(mean_loss.f32_data()[0], sum_loss.f32_data()[0]);
}

#[test]
fn reduction_none_yields_per_sample_losses() {
    let logits = f32_tensor(vec![2, 2], vec![1.0, 0.0, 0.0, 2.0]);
    let labels = i64_tensor(vec![2], vec![0, 1]);

    let (loss, log_prob) =
        softmax_cross_entropy_loss(&logits, &labels, None, Reduction::None).unwrap();
    assert_eq!(loss.dims(), &[2]);
    assert_eq!(log_prob.dims(), &[2, 2]);

    let expected = [
        expected_sample_loss(&[1.0, 0.0], 0),
        expected_sample_loss(&[0.0, 2.0], 1),
    ];
    for (actual, expected) in loss.f32_data().iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-6);
    }
}

#[test]
fn weighted_mean_normalizes_by_weight_sum_not_sample_count() {
    let logits = f32_tensor(vec![2, 2], vec![1.0, 0.0, 0.0, 2.0]);
    let labels = i64_tensor(vec![2], vec![0, 1]);
    let weight = f32_tensor(vec![2], vec![2.0, 0.5]);

    let (loss, _) =
        softmax_cross_entropy_loss(&logits, &labels, Some(&weight), Reduction::Mean).unwrap();

    let l0 = expected_sample_loss(&[1.0, 0.0], 0);
    let l1 = expected_sample_loss(&[0.0, 2.0], 1);
    let weighted_mean = (2.0 * l0 + 0.5 * l1) / (2.0 + 0.5);
    let by_sample_count = (2.0 * l0 + 0.5 * l1) / 2.0;

    assert!((loss.f32_data()[0] - weighted_mean).abs() < 1e-6);
    assert!((loss.f32_data()[0] - by_sample_count).abs() > 1e-3);
}

#[test]
fn label_rank_contract_is_enforced_before_compute() {
    let logits = f32_tensor(vec![2, 2], vec![0.0; 4]);
    // Same rank as the logits instead of one less.
    let labels = i64_tensor(vec![2, 1], vec![0, 1]);
    let err = softmax_cross_entropy_loss(&logits, &labels, None, Reduction::Mean).unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch(_)));

    // Leading dimensions must match positionally.
    let labels = i64_tensor(vec![3], vec![0, 1, 0]);
    let err = softmax_cross_entropy_loss(&logits, &labels, None, Reduction::Mean).unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch(_)));
}

#[test]
fn one_hot_label_shape_must_equal_logits() {
    let logits = f32_tensor(vec![2, 2], vec![0.0; 4]);
    let label = f32_tensor(vec![2], vec![1.0, 0.0]);
    let err = softmax_cross_entropy(&logits, &label, Reduction::Mean).unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch(_)));
}

#[test]
fn one_hot_backward_subtracts_label_from_probability() {
    let logits = f32_tensor(vec![1, 2], vec![0.0, 0.0]);
    let label = f32_tensor(vec![1, 2], vec![1.0, 0.0]);
    let (_, log_prob) = softmax_cross_entropy(&logits, &label, Reduction::Mean).unwrap();

    let dy = TensorValue::scalar_f32(1.0);
    let d_logit = softmax_cross_entropy_grad(&dy, &log_prob, &label, Reduction::Mean).unwrap();

    // prob = [0.5, 0.5]; gradient = (prob - label) * dY / N with N = 1.
    let grad = d_logit.f32_data();
    assert!((grad[0] + 0.5).abs() < 1e-6);
    assert!((grad[1] - 0.5).abs() < 1e-6);
}

#[test]
fn class_index_backward_matches_probability_minus_one_hot() {
    let logits = f32_tensor(vec![2, 2], vec![1.0, 0.0, 0.0, 2.0]);
    let labels = i64_tensor(vec![2], vec![0, 1]);
    let (_, log_prob) =
        softmax_cross_entropy_loss(&logits, &labels, None, Reduction::Sum).unwrap();

    let dy = TensorValue::scalar_f32(1.0);
    let d_logit =
        softmax_cross_entropy_loss_grad(&dy, &log_prob, &labels, None, Reduction::Sum).unwrap();

    let lp = log_prob.f32_data();
    let grad = d_logit.f32_data();
    for row in 0..2 {
        let class = [0usize, 1][row];
        for col in 0..2 {
            let index = row * 2 + col;
            let one_hot = (col == class) as u8 as f32;
            assert!((grad[index] - (lp[index].exp() - one_hot)).abs() < 1e-6);
        }
    }
}

#[test]
fn weighted_backward_scales_by_sample_weight_over_weight_sum() {
    let logits = f32_tensor(vec![2, 2], vec![0.0; 4]);
    let labels = i64_tensor(vec![2], vec![0, 1]);
    // Per-sample weights, already gathered by class.
    let weight = f32_tensor(vec![2], vec![3.0, 1.0]);
    let (_, log_prob) =
        softmax_cross_entropy_loss(&logits, &labels, None, Reduction::Mean).unwrap();

    let dy = TensorValue::scalar_f32(1.0);
    let d_logit = softmax_cross_entropy_loss_grad(
        &dy,
        &log_prob,
        &labels,
        Some(&weight),
        Reduction::Mean,
    )
    .unwrap();

    // dY is divided by the weight sum (4.0), each sample rescaled by its
    // own weight: sample 0 scale 3/4, sample 1 scale 1/4.
    let grad = d_logit.f32_data();
    assert!((grad[0] - (0.5 - 1.0) * 0.75).abs() < 1e-6);
    assert!((grad[1] - 0.5 * 0.75).abs() < 1e-6);
    assert!((grad[2] - 0.5 * 0.25).abs() < 1e-6);
    assert!((grad[3] - (0.5 - 1.0) * 0.25).abs() < 1e-6);
}

#[test]
fn backward_weight_shape_must_match_labels() {
    let logits = f32_tensor(vec![2, 2], vec![0.0; 4]);
    let labels = i64_tensor(vec![2], vec![0, 1]);
    let (_, log_prob) =
        softmax_cross_entropy_loss(&logits, &labels, None, Reduction::Mean).unwrap();
    let bad_weight = f32_tensor(vec![3], vec![1.0; 3]);

    let dy = TensorValue::scalar_f32(1.0);
    let err = softmax_cross_entropy_loss_grad(
        &dy,
        &log_prob,
        &labels,
        Some(&bad_weight),
        Reduction::Mean,
    )
    .unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch(_)));
}

#[test]
fn forward_class_weight_must_be_one_dimensional_over_classes() {
    let logits = f32_tensor(vec![2, 2], vec![0.0; 4]);
    let labels = i64_tensor(vec![2], vec![0, 1]);
    let bad_weight = f32_tensor(vec![2, 1], vec![1.0, 1.0]);
    let err = softmax_cross_entropy_loss(&logits, &labels, Some(&bad_weight), Reduction::Mean)
        .unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch(_)));
}
