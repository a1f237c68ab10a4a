//! Core elementwise reference kernels.

use anyhow::anyhow;

use infergraph::kernels::{
    KernelContext, KernelError, KernelResult, OpKernel, ShapeMismatchError,
};
use infergraph::tensor::{ElementType, TensorValue};

fn check_same_shape(op: &str, a: &TensorValue, b: &TensorValue) -> KernelResult<()> {
    if a.dims() != b.dims() {
        return Err(ShapeMismatchError::new(
            format!("{op} inputs"),
            format!("{:?}", a.dims()),
            format!("{:?}", b.dims()),
        )
        .into());
    }
    if a.elem() != b.elem() {
        return Err(KernelError::Other(anyhow!(
            "{op} inputs have mixed element types {:?} and {:?}",
            a.elem(),
            b.elem()
        )));
    }
    Ok(())
}

/// Forwards its single input unchanged.
pub struct IdentityKernel;

impl OpKernel for IdentityKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let input = ctx.input(0)?;
        let mut outputs = vec![Some(input.clone())];
        // Trailing declared-but-absent slots stay unproduced.
        outputs.resize_with(ctx.output_count(), || None);
        Ok(outputs)
    }
}

/// Elementwise addition over identically-shaped inputs.
pub struct AddKernel;

impl OpKernel for AddKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let a = ctx.input(0)?;
        let b = ctx.input(1)?;
        check_same_shape("Add", a, b)?;
        let out = match a.elem() {
            ElementType::F32 => {
                let data = a
                    .f32_data()
                    .iter()
                    .zip(b.f32_data())
                    .map(|(x, y)| x + y)
                    .collect();
                TensorValue::from_f32(a.dims().to_vec(), data).map_err(KernelError::Other)?
            }
            ElementType::I64 => {
                let data = a
                    .i64_data()
                    .iter()
                    .zip(b.i64_data())
                    .map(|(x, y)| x + y)
                    .collect();
                TensorValue::from_i64(a.dims().to_vec(), data).map_err(KernelError::Other)?
            }
            other => return Err(KernelError::UnsupportedElementType(other)),
        };
        Ok(vec![Some(out)])
    }
}

/// Elementwise multiplication over identically-shaped inputs.
pub struct MulKernel;

impl OpKernel for MulKernel {
    fn compute(&self, ctx: &KernelContext<'_>) -> KernelResult<Vec<Option<TensorValue>>> {
        let a = ctx.input(0)?;
        let b = ctx.input(1)?;
        check_same_shape("Mul", a, b)?;
        let out = match a.elem() {
            ElementType::F32 => {
                let data = a
                    .f32_data()
                    .iter()
                    .zip(b.f32_data())
                    .map(|(x, y)| x * y)
                    .collect();
                TensorValue::from_f32(a.dims().to_vec(), data).map_err(KernelError::Other)?
            }
            ElementType::I64 => {
                let data = a
                    .i64_data()
                    .iter()
                    .zip(b.i64_data())
                    .map(|(x, y)| x * y)
                    .collect();
                TensorValue::from_i64(a.dims().to_vec(), data).map_err(KernelError::Other)?
            }
            other => return Err(KernelError::UnsupportedElementType(other)),
        };
        Ok(vec![Some(out)])
    }
}
