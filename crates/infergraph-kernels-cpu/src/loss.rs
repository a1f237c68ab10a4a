//! Softmax cross-entropy loss kernels.
//!
//! Two families, as in the training operator set: the one-hot variant
//! (`SoftmaxCrossEntropy`/`SoftmaxCrossEntropyGrad`) whose label tensor has
//! the same shape as the logits, and the class-index variant
//! (`SoftmaxCrossEntropyLoss`/`SoftmaxCrossEntropyLossGrad`) whose label
//! tensor drops the class axis. Classes live on the last axis; N is the
//! product of all leading axes. All shape contracts are enforced before
//! any numeric work.

use anyhow::anyhow;

use infergraph::kernels::{
    KernelContext, KernelError, KernelResult, OpKernel, ShapeMismatchError,
};
use infergraph::tensor::{ElementType, TensorValue};

/// Policy for collapsing the per-sample loss vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
    None,
}

impl Reduction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mean" => Some(Reduction::Mean),
            "sum" => Some(Reduction::Sum),
            "none" => Some(Reduction::None),
            _ => None,
        }
    }
}

fn reduction_attr(ctx: &KernelContext<'_>) -> KernelResult<Reduction> {
    match ctx.attr_str("reduction") {
        Some(value) => Reduction::parse(value)
            .ok_or_else(|| KernelError::Other(anyhow!("unknown reduction '{}'", value))),
        None => Ok(Reduction::Mean),
    }
}

/// Splits a logit shape into (N, D): classes on the last axis, samples on
/// everything before it.
fn split_batch(logits: &TensorValue) -> KernelResult<(usize, usize)> {
    if logits.rank() == 0 {
        return Err(ShapeMismatchError::new(
            "logits",
            "rank >= 1",
            "rank 0".to_string(),
        )
        .into());
    }
    let dims = logits.dims();
    let d = dims[dims.len() - 1];
    let n: usize = dims[..dims.len() - 1].iter().product();
    Ok((n, d))
}

/// Numerically stable row-wise log-softmax: subtracts the row maximum
/// before exponentiating, so `log_prob = (x - max) - ln(sum(exp(x - max)))`.
fn compute_log_prob(n: usize, d: usize, logits: &[f32]) -> Vec<f32> {
    let mut log_prob = vec![0.0f32; n * d];
    for row in 0..n {
        let slice = &logits[row * d..(row + 1) * d];
        let row_max = slice.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for &value in slice {
            sum_exp += (value - row_max).exp();
        }
        let log_sum_exp = sum_exp.ln();
        let out = &mut log_prob[row * d..(row + 1) * d];
        for (dst, &value) in out.iter_mut().zip(slice) {
            *dst = (value - row_max) - log_sum_exp;
        }
    }
    log_prob
}

fn class_indices(labels: &TensorValue, d: usize) -> KernelResult<Vec<usize>> {
    let raw: Vec<i64> = match labels.elem() {
        ElementType::I64 => labels.i64_data().to_vec(),
        ElementType::I32 => labels.i32_data().iter().map(|&v| v as i64).collect(),
        other => return Err(KernelError::UnsupportedElementType(other)),
    };
    raw.into_iter()
        .map(|label| {
            if label < 0 || label as usize >= d {
                Err(KernelError::Other(anyhow!(
                    "label {} out of range for {} classes",
                    label,
                    d
                )))
            } else {
                Ok(label as usize)
            }
        })
        .collect()
}

fn scalar(value: f32) -> TensorValue {
    TensorValue::scalar_f32(value)
}

/// Forward pass of the one-hot variant. Returns the reduced loss and the
/// log-probability tensor.
pub fn softmax_cross_entropy(
    logits: &TensorValue,
    label: &TensorValue,
    reduction: Reduction,
) -> KernelResult<(TensorValue, TensorValue)> {
    if label.dims() != logits.dims() {
        return Err(ShapeMismatchError::new(
            "one-hot label shape",
            format!("{:?}", logits.dims()),
            format!("{:?}", label.dims()),
        )
        .into());
    }
    let (n, d) = split_batch(logits)?;
    let log_prob = compute_log_prob(n, d, logits.f32_data());
    let label_data = label.f32_data();

    let per_sample: Vec<f32> = (0..n)
        .map(|row| {
            -(0..d)
                .map(|col| label_data[row * d + col] * log_prob[row * d + col])
                .sum::<f32>()
        })
        .collect();

    let loss = match reduction {
        Reduction::None => TensorValue::from_f32(vec![n], per_sample).map_err(KernelError::Other)?,
        Reduction::Sum => scalar(per_sample.iter().sum()),
        Reduction::Mean => scalar(per_sample.iter().sum::<f32>() / n as f32),
    };
    let log_prob =
        TensorValue::from_f32(logits.dims().to_vec(), log_prob).map_err(KernelError::Other)?;
    Ok((loss, log_prob))
}

/// Backward pass of the one-hot variant: probability is reconstructed from
/// the log-probability, the one-hot label subtracted, and the result scaled
/// by the upstream gradient (divided by N under mean reduction).
pub fn softmax_cross_entropy_grad(
    dy: &TensorValue,
    log_prob: &TensorValue,
    label: &TensorValue,
    reduction: Reduction,
) -> KernelResult<TensorValue> {
    if label.dims() != log_prob.dims() {
        return Err(ShapeMismatchError::new(
            "one-hot label shape",
            format!("{:?}", log_prob.dims()),
            format!("{:?}", label.dims()),
        )
        .into());
    }
    let (n, _d) = split_batch(log_prob)?;
    let dy_value = dy.f32_data()[0];
    let dy_scaled = match reduction {
        Reduction::Mean => dy_value / n as f32,
        _ => dy_value,
    };
    let data = log_prob
        .f32_data()
        .iter()
        .zip(label.f32_data())
        .map(|(&lp, &lab)| (lp.exp() - lab) * dy_scaled)
        .collect();
    TensorValue::from_f32(log_prob.dims().to_vec(), data).map_err(KernelError::Other)
}

fn check_label_shape(op: &str, logits: &TensorValue, labels: &TensorValue) -> KernelResult<()> {
    let logit_dims = logits.dims();
    let label_dims = labels.dims();
    if logit_dims.len() != label_dims.len() + 1 {
        return Err(ShapeMismatchError::new(
            format!("{op} label rank"),
            format!("{}", logit_dims.len().saturating_sub(1)),
            format!("{}", label_dims.len()),
        )
        .into());
    }
    if label_dims != &logit_dims[..label_dims.len()] {
        return Err(ShapeMismatchError::new(
            format!("{op} label shape"),
            format!("{:?}", &logit_dims[..label_dims.len()]),
            format!("{:?}", label_dims),
        )
        .into());
    }
    Ok(())
}

/// Forward pass of the class-index variant. The label tensor's rank is
/// exactly one less than the logits'; an optional 1-D per-class weight
/// vector rescales each sample's contribution, and mean reduction then
/// normalizes by the sum of applied weights instead of the sample count.
pub fn softmax_cross_entropy_loss(
    logits: &TensorValue,
    labels: &TensorValue,
    weight: Option<&TensorValue>,
    reduction: Reduction,
) -> KernelResult<(TensorValue, TensorValue)> {
    check_label_shape("SoftmaxCrossEntropyLoss", logits, labels)?;
    let (n, d) = split_batch(logits)?;
    if let Some(weight) = weight {
        if weight.rank() != 1 || weight.dims()[0] != d {
            return Err(ShapeMismatchError::new(
                "class weight shape",
                format!("[{d}]"),
                format!("{:?}", weight.dims()),
            )
            .into());
        }
    }
    let indices = class_indices(labels, d)?;
    let log_prob = compute_log_prob(n, d, logits.f32_data());

    let mut per_sample = vec![0.0f32; n];
    let mut sum_weight = 0.0f32;
    for (row, &class) in indices.iter().enumerate() {
        let applied = match weight {
            Some(weight) => weight.f32_data()[class],
            None => 1.0,
        };
        per_sample[row] = -log_prob[row * d + class] * applied;
        sum_weight += applied;
    }

    let loss = match reduction {
        Reduction::None => {
            TensorValue::from_f32(labels.dims().to_vec(), per_sample).map_err(KernelError::Other)?
        }
        Reduction::Sum => scalar(per_sample.iter().sum()),
        Reduction::Mean => scalar(per_sample.iter().sum::<f32>() / sum_weight),
    };
    let log_prob =
        TensorValue::from_f32(logits.dims().to_vec(), log_prob).map_err(KernelError::Other)?;
    Ok((loss, log_prob))
}

/// Backward pass of the class-index variant. The optional weight tensor is
/// per-sample (same shape as the labels, already gathered by class); mean
/// reduction divides the upstream gradient by the applied-weight sum.
pub fn softmax_cross_entropy_loss_grad(
    dy: &TensorValue,
    log_prob: &TensorValue,
    labels: &TensorValue,
    weight: Option<&TensorValue>,
    reduction: Reduction,
) -> KernelResult<TensorValue> {
    check_label_shape("SoftmaxCrossEntropyLossGrad", log_prob, labels)?;
    let (n, d) = split_batch(log_prob)?;
    if let Some(weight) = weight {
        if weight.dims() != labels.dims() {
            return Err(ShapeMismatchError::new(
                "sample weight shape",
                format!("{:?}", labels.dims()),
                format!("{:?}", weight.dims()),
            )
            .into());
        }
    }
    let indices = class_indices(labels, d)?;
    let dy_value = dy.f32_data()[0];
    let log_prob_data = log_prob.f32_data();

    let mut data = vec![0.0f32; n * d];
    match weight {
        Some(weight) => {
            let weight_data = weight.f32_data();
            let dy_scaled = match reduction {
                Reduction::Mean => dy_value / weight_data.iter().sum::<f32>(),
                _ => dy_value,
            };
            for (row, &class) in indices.iter().enumerate() {
                let sample_scale = weight_data[row] * dy_scaled;
                for col in 0..d {
                    let index = row * d + col;
                    let one_hot = (class == col) as u8 as f32;
                    data[index] = (log_prob_data[index].exp() - one_hot) * sample_scale;
                }
            }
        }
        None => {
            let dy_scaled = match reduction {
                Reduction::Mean => dy_value / n as f32,
                _ => dy_value,
            };
            for (row, &class) in indices.iter().enumerate() {
                for col in 0..d {
                    let index = row * d + col;
                    let one_hot = (class == col) as u8 as f32;
                    data[index] = (log_prob_data[index].exp() - one_hot) * dy_scaled;
                }
            }
        }
    }
    TensorValue::from_f32(log_prob.dims().to_vec(), data).map_err(KernelError::Other)
}

fn with_optional_log_prob(
    ctx: &KernelContext<'_>,
    loss: TensorValue,
    log_prob: TensorValue,
) -> Vec<Option<TensorValue>> {
    let mut outputs = vec![Some(loss)];
    if ctx.output_count() > 1 {
        outputs.push(ctx.output_present(1).then_some(log_prob));
        outputs.resize_with(ctx.output_count(), || None);
    }
    outputs
}

pub struct SoftmaxCrossEntropyKernel;

impl OpKernel for SoftmaxCrossEntropyKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let reduction = reduction_attr(ctx)?;
        let (loss, log_prob) = softmax_cross_entropy(ctx.input(0)?, ctx.input(1)?, reduction)?;
        Ok(with_optional_log_prob(ctx, loss, log_prob))
    }
}

pub struct SoftmaxCrossEntropyGradKernel;

impl OpKernel for SoftmaxCrossEntropyGradKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let reduction = reduction_attr(ctx)?;
        let d_logit =
            softmax_cross_entropy_grad(ctx.input(0)?, ctx.input(1)?, ctx.input(2)?, reduction)?;
        Ok(vec![Some(d_logit)])
    }
}

pub struct SoftmaxCrossEntropyLossKernel;

impl OpKernel for SoftmaxCrossEntropyLossKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let reduction = reduction_attr(ctx)?;
        let (loss, log_prob) = softmax_cross_entropy_loss(
            ctx.input(0)?,
            ctx.input(1)?,
            ctx.opt_input(2),
            reduction,
        )?;
        Ok(with_optional_log_prob(ctx, loss, log_prob))
    }
}

pub struct SoftmaxCrossEntropyLossGradKernel;

impl OpKernel for SoftmaxCrossEntropyLossGradKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let reduction = reduction_attr(ctx)?;
        let d_logit = softmax_cross_entropy_loss_grad(
            ctx.input(0)?,
            ctx.input(1)?,
            ctx.input(2)?,
            ctx.opt_input(3),
            reduction,
        )?;
        Ok(vec![Some(d_logit)])
    }
}
