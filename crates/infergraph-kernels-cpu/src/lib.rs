//! Reference CPU kernels for the infergraph engine.
//!
//! Provides the core elementwise operators plus the softmax cross-entropy
//! loss family, registered under the engine's `(op_type, domain, version)`
//! scheme.

pub mod elementwise;
pub mod loss;

use std::sync::Arc;

use once_cell::sync::Lazy;

use infergraph::kernels::{KernelRegistry, CORE_DOMAIN, TRAINING_DOMAIN};

/// Builds a registry holding every reference CPU kernel.
pub fn registry() -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    registry.register(
        "Identity",
        CORE_DOMAIN,
        1,
        Arc::new(elementwise::IdentityKernel),
    );
    registry.register("Add", CORE_DOMAIN, 1, Arc::new(elementwise::AddKernel));
    registry.register("Mul", CORE_DOMAIN, 1, Arc::new(elementwise::MulKernel));
    registry.register(
        "SoftmaxCrossEntropy",
        TRAINING_DOMAIN,
        1,
        Arc::new(loss::SoftmaxCrossEntropyKernel),
    );
    registry.register(
        "SoftmaxCrossEntropyGrad",
        TRAINING_DOMAIN,
        1,
        Arc::new(loss::SoftmaxCrossEntropyGradKernel),
    );
    registry.register(
        "SoftmaxCrossEntropyLoss",
        TRAINING_DOMAIN,
        1,
        Arc::new(loss::SoftmaxCrossEntropyLossKernel),
    );
    registry.register(
        "SoftmaxCrossEntropyLossGrad",
        TRAINING_DOMAIN,
        1,
        Arc::new(loss::SoftmaxCrossEntropyLossGradKernel),
    );
    registry
}

static SHARED: Lazy<Arc<KernelRegistry>> = Lazy::new(|| Arc::new(registry()));

/// Process-wide shared instance of the reference registry.
pub fn shared_registry() -> Arc<KernelRegistry> {
    Arc::clone(&SHARED)
}
