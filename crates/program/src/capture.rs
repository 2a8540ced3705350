//! Captured argument data recorded from earlier program runs.

use crate::graph::Program;
use anyhow::{anyhow, ensure, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Source of representative input buffers for tuning.
pub trait CapturedData: Send + Sync {
    /// The first recorded version of `array`, in logical order.
    fn first_version(&self, array: &str) -> Result<ArrayD<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedArray {
    pub shape: Vec<usize>,
    /// Values in logical row-major order.
    pub values: Vec<f64>,
}

impl CapturedArray {
    pub fn from_view(view: ArrayViewD<'_, f64>) -> Self {
        Self {
            shape: view.shape().to_vec(),
            values: view.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        let expected: usize = self.shape.iter().product();
        ensure!(
            self.values.len() == expected,
            "captured buffer has {} values for shape {:?}",
            self.values.len(),
            self.shape
        );
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())?)
    }
}

/// Versioned captures for every recorded array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataReport {
    arrays: BTreeMap<String, Vec<CapturedArray>>,
}

impl DataReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Append a new version of `array`.
    pub fn record(&mut self, array: impl Into<String>, data: ArrayViewD<'_, f64>) {
        self.arrays
            .entry(array.into())
            .or_default()
            .push(CapturedArray::from_view(data));
    }

    pub fn versions(&self, array: &str) -> usize {
        self.arrays.get(array).map_or(0, Vec::len)
    }

    /// Record seeded random data for every non-transient array with no capture.
    pub fn fill_missing(&mut self, program: &Program, seed: u64) -> usize {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut filled = 0;
        for (name, desc) in program.arrays.tunable() {
            if self.versions(name) > 0 {
                continue;
            }
            let values = (0..desc.element_count())
                .map(|_| rng.f64() * 2.0 - 1.0)
                .collect();
            self.arrays.entry(name.to_string()).or_default().push(CapturedArray {
                shape: desc.shape.clone(),
                values,
            });
            debug!(array = name, shape = ?desc.shape, "synthesized capture");
            filled += 1;
        }
        filled
    }

    pub fn synthesize(program: &Program, seed: u64) -> Self {
        let mut report = Self::new();
        report.fill_missing(program, seed);
        report
    }
}

impl CapturedData for DataReport {
    fn first_version(&self, array: &str) -> Result<ArrayD<f64>> {
        self.arrays
            .get(array)
            .and_then(|versions| versions.first())
            .ok_or_else(|| anyhow!("no captured data for array `{array}`"))?
            .to_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::State;
    use ndarray::Array;

    #[test]
    fn test_first_version_wins() {
        let mut report = DataReport::new();
        let first = Array::from_elem(IxDyn(&[2, 2]), 1.0);
        let second = Array::from_elem(IxDyn(&[2, 2]), 2.0);
        report.record("A", first.view());
        report.record("A", second.view());

        assert_eq!(report.versions("A"), 2);
        assert_eq!(report.first_version("A").unwrap(), first);
        assert!(report.first_version("B").is_err());
    }

    #[test]
    fn test_capture_keeps_logical_order() {
        let data = Array::from_shape_fn(IxDyn(&[2, 3]), |idx| (idx[0] * 3 + idx[1]) as f64);
        let transposed = data.t().to_owned();
        let captured = CapturedArray::from_view(transposed.view());
        assert_eq!(captured.shape, vec![3, 2]);
        assert_eq!(captured.values, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_synthesize_is_seeded_and_skips_transients() {
        let mut state = State::new("s");
        let a = state.add_access("A");
        let t = state.add_tasklet("t", None);
        let tmp = state.add_access("tmp");
        state.add_edge(a, t);
        state.add_edge(t, tmp);
        let program = Program::builder("p")
            .array("A", &[3, 4])
            .transient("tmp", &[3, 4])
            .state(state)
            .build()
            .unwrap();

        let one = DataReport::synthesize(&program, 7);
        let two = DataReport::synthesize(&program, 7);
        assert_eq!(one, two);
        assert_eq!(one.versions("A"), 1);
        assert_eq!(one.versions("tmp"), 0);
        assert_eq!(one.first_version("A").unwrap().shape(), &[3, 4]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        let mut report = DataReport::new();
        report.record("x", Array::from_elem(IxDyn(&[3]), 0.5).view());
        report.save(&path).unwrap();
        assert_eq!(DataReport::load(&path).unwrap(), report);
    }
}
