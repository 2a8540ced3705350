//! Repeated execution and aggregation of a kernel's cost.

use crate::error::{Result, TuneError};
use anyhow::anyhow;
use layoutforge_program::{Arguments, Executor, Program};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How repeated runs collapse into a single cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// Middle sample; mean of the two middle samples for even counts.
    #[default]
    Median,
    Mean,
    Min,
}

impl Aggregation {
    pub fn aggregate(self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let value = match self {
            Self::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Self::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
        };
        Some(value)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Median => "median",
            Self::Mean => "mean",
            Self::Min => "min",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub runs: Vec<f64>,
    pub cost: f64,
}

/// Calls an executor a fixed number of times per configuration.
pub struct MeasurementDriver<'a> {
    executor: &'a dyn Executor,
    repetitions: usize,
    aggregation: Aggregation,
}

impl<'a> MeasurementDriver<'a> {
    pub fn new(executor: &'a dyn Executor, repetitions: usize, aggregation: Aggregation) -> Self {
        Self {
            executor,
            repetitions,
            aggregation,
        }
    }

    /// Run `kernel` exactly `repetitions` times; any failure aborts the sample.
    pub fn measure(&self, label: &str, kernel: &Program, arguments: &Arguments, signature: &str) -> Result<Sample> {
        let execution_error = |source: anyhow::Error| TuneError::Execution {
            kernel: label.to_string(),
            signature: signature.to_string(),
            source,
        };

        if self.repetitions == 0 {
            return Err(TuneError::configuration(label, "repetitions must be at least 1"));
        }

        let mut runs = Vec::with_capacity(self.repetitions);
        for _ in 0..self.repetitions {
            let cost = self.executor.execute(kernel, arguments).map_err(execution_error)?;
            if !cost.is_finite() {
                return Err(execution_error(anyhow!(
                    "executor `{}` returned non-finite cost {cost}",
                    self.executor.name()
                )));
            }
            runs.push(cost);
        }

        let cost = self
            .aggregation
            .aggregate(&runs)
            .ok_or_else(|| execution_error(anyhow!("no samples collected")))?;
        Ok(Sample { runs, cost })
    }
}
