//! Kernel execution seam and the built-in traversal probe.

use crate::graph::Program;
use anyhow::{anyhow, ensure, Result};
use layoutforge_layout::matches_layout;
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::hint::black_box;
use std::time::Instant;

/// Concrete argument buffers keyed by array name.
pub type Arguments = BTreeMap<String, ArrayD<f64>>;

/// Runs an isolated kernel and reports a scalar cost (lower is better).
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, kernel: &Program, arguments: &Arguments) -> Result<f64>;
}

/// Times a logical-order sweep over every argument of the kernel.
///
/// Each argument is walked in row-major logical index order, so the elapsed
/// time follows how well the physical layout matches that access pattern.
/// Arguments whose strides disagree with the kernel's descriptors are
/// rejected.
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    passes: usize,
}

impl ProbeExecutor {
    pub fn new() -> Self {
        Self { passes: 1 }
    }

    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes.max(1);
        self
    }
}

impl Default for ProbeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ProbeExecutor {
    fn name(&self) -> &str {
        "probe"
    }

    fn execute(&self, kernel: &Program, arguments: &Arguments) -> Result<f64> {
        let mut buffers = Vec::new();
        for (name, desc) in kernel.arrays.tunable() {
            let buffer = arguments
                .get(name)
                .ok_or_else(|| anyhow!("kernel `{}` is missing argument `{}`", kernel.name, name))?;
            ensure!(
                matches_layout(desc, buffer),
                "argument `{}` has strides {:?}, kernel expects {:?}",
                name,
                buffer.strides(),
                desc.strides
            );
            buffers.push(buffer);
        }

        let start = Instant::now();
        for _ in 0..self.passes {
            for buffer in &buffers {
                let sum: f64 = buffer.iter().sum();
                black_box(sum);
            }
        }
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}
