//! Core layout tuning loop.

use crate::cache::{LayoutReport, ReportStore};
use crate::error::{Result, TuneError};
use crate::groups::{group, resolve_groups, GroupPolicy};
use crate::measure::{Aggregation, MeasurementDriver};
use crate::signature::{best_entry, layout_signature};
use crate::space::{GroupLayout, LayoutSpace};
use anyhow::anyhow;
use layoutforge_layout::relayout;
use layoutforge_program::{Arguments, CapturedData, Executor, KernelUnit, Program};
use ndarray::ArrayD;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerOptions {
    pub group_by: GroupPolicy,
    /// Executor calls per configuration.
    pub repetitions: usize,
    pub aggregation: Aggregation,
    /// Record failed kernels and continue instead of aborting the sweep.
    pub keep_going: bool,
}

impl Default for TunerOptions {
    fn default() -> Self {
        Self {
            group_by: GroupPolicy::InputsOutputs,
            repetitions: 30,
            aggregation: Aggregation::Median,
            keep_going: false,
        }
    }
}

/// The fastest layout found for a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestLayout {
    pub signature: String,
    pub cost: f64,
    /// Group permutations that produced it; absent when read back from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Vec<GroupLayout>>,
}

#[derive(Debug, Clone)]
pub struct KernelOutcome {
    pub label: String,
    pub results: LayoutReport,
    pub best: Option<BestLayout>,
    pub from_cache: bool,
    /// Configurations actually measured in this call.
    pub measured: usize,
}

impl KernelOutcome {
    fn cached(label: &str, results: LayoutReport) -> Self {
        let best = best_entry(&results).map(|(signature, cost)| BestLayout {
            signature: signature.to_string(),
            cost,
            configuration: None,
        });
        Self {
            label: label.to_string(),
            results,
            best,
            from_cache: true,
            measured: 0,
        }
    }
}

/// Completed kernels of one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningReport {
    pub kernels: BTreeMap<String, LayoutReport>,
    pub best: BTreeMap<String, BestLayout>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl TuningReport {
    fn record(&mut self, outcome: KernelOutcome) {
        if let Some(best) = outcome.best {
            self.best.insert(outcome.label.clone(), best);
        }
        self.kernels.insert(outcome.label, outcome.results);
    }
}

/// Searches the layout space of each kernel by measurement.
///
/// Applying the winning layout back to the source program is left to the
/// caller; the tuner only reports it.
pub struct LayoutTuner<'a> {
    executor: &'a dyn Executor,
    capture: &'a dyn CapturedData,
    store: &'a dyn ReportStore,
    options: TunerOptions,
}

impl<'a> LayoutTuner<'a> {
    pub fn new(executor: &'a dyn Executor, capture: &'a dyn CapturedData, store: &'a dyn ReportStore) -> Self {
        Self {
            executor,
            capture,
            store,
            options: TunerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TunerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &TunerOptions {
        &self.options
    }

    /// Tune one kernel of `program`, reusing a cached report when present.
    pub fn tune(&self, program: &Program, unit: &KernelUnit) -> Result<KernelOutcome> {
        if let Some(results) = self.cached(&unit.label) {
            return Ok(KernelOutcome::cached(&unit.label, results));
        }
        let cutout = program.cutout(unit).map_err(|source| TuneError::Extraction {
            kernel: unit.label.clone(),
            source,
        })?;
        self.sweep(&unit.label, &cutout)
    }

    /// Tune an already isolated kernel under `label`.
    pub fn tune_kernel(&self, label: &str, kernel: &Program) -> Result<KernelOutcome> {
        if let Some(results) = self.cached(label) {
            return Ok(KernelOutcome::cached(label, results));
        }
        self.sweep(label, kernel)
    }

    /// Tune every kernel of `program` in enumeration order.
    pub fn tune_all(&self, program: &Program) -> Result<TuningReport> {
        let units = program.kernels();
        info!(program = %program.name, kernels = units.len(), "starting layout sweep");

        let mut report = TuningReport::default();
        for unit in &units {
            let outcome = self.tune(program, unit);
            self.collect(&mut report, &unit.label, outcome)?;
        }
        Ok(report)
    }

    /// Like [`tune_all`](Self::tune_all), with independent kernels tuned in
    /// parallel. Each worker extracts its own cutout and argument buffers.
    pub fn tune_all_parallel(&self, program: &Program) -> Result<TuningReport> {
        let units = program.kernels();
        info!(
            program = %program.name,
            kernels = units.len(),
            threads = rayon::current_num_threads(),
            "starting parallel layout sweep"
        );

        let outcomes: Vec<Result<KernelOutcome>> = units
            .par_iter()
            .map(|unit| self.tune(program, unit))
            .collect();

        let mut report = TuningReport::default();
        for (unit, outcome) in units.iter().zip(outcomes) {
            self.collect(&mut report, &unit.label, outcome)?;
        }
        Ok(report)
    }

    fn collect(&self, report: &mut TuningReport, label: &str, outcome: Result<KernelOutcome>) -> Result<()> {
        match outcome {
            Ok(outcome) => report.record(outcome),
            Err(err) if self.options.keep_going => {
                warn!(kernel = label, error = %err, "kernel sweep failed; continuing");
                report.failures.insert(label.to_string(), format!("{err:#}"));
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn cached(&self, label: &str) -> Option<LayoutReport> {
        let results = self.store.get(label)?;
        info!(kernel = label, layouts = results.len(), "using cached layouts");
        Some(results)
    }

    fn sweep(&self, label: &str, kernel: &Program) -> Result<KernelOutcome> {
        if self.options.repetitions == 0 {
            return Err(TuneError::configuration(label, "repetitions must be at least 1"));
        }

        let groups = group(kernel, self.options.group_by).map_err(|err| relabel(err, label))?;
        let groups = resolve_groups(kernel, groups).map_err(|err| relabel(err, label))?;
        let space = LayoutSpace::new(groups).map_err(|err| TuneError::configuration(label, err.to_string()))?;

        let captured = self.materialize(label, kernel)?;
        let mut arguments = Arguments::new();
        for (name, desc) in kernel.arrays.tunable() {
            arguments.insert(name.to_string(), self.relayout(label, kernel, name, desc, &captured)?);
        }

        info!(
            kernel = label,
            groups = space.groups().len(),
            configurations = space.size(),
            policy = %self.options.group_by,
            "sweeping layouts"
        );

        let driver = MeasurementDriver::new(self.executor, self.options.repetitions, self.options.aggregation);
        let mut configured = kernel.clone();
        let mut results = LayoutReport::new();
        let mut best: Option<BestLayout> = None;
        let mut measured = 0;

        for config in &space {
            let applied = config
                .apply(space.groups(), &kernel.arrays)
                .map_err(|source| TuneError::Layout {
                    kernel: label.to_string(),
                    array: "<group>".to_string(),
                    source,
                })?;
            let signature = layout_signature(&applied.arrays);
            if results.contains_key(&signature) {
                debug!(kernel = label, index = config.index, "layout already measured");
                continue;
            }

            for name in &applied.modified {
                let desc = applied.arrays.require(name).map_err(|source| TuneError::Layout {
                    kernel: label.to_string(),
                    array: name.clone(),
                    source,
                })?;
                arguments.insert(name.clone(), self.relayout(label, kernel, name, desc, &captured)?);
            }
            configured.arrays = applied.arrays;

            let sample = driver.measure(label, &configured, &arguments, &signature)?;
            measured += 1;
            debug!(
                kernel = label,
                index = config.index,
                cost = sample.cost,
                runs = sample.runs.len(),
                "measured layout"
            );

            if best.as_ref().map_or(true, |b| sample.cost < b.cost) {
                best = Some(BestLayout {
                    signature: signature.clone(),
                    cost: sample.cost,
                    configuration: Some(config.describe(space.groups())),
                });
            }
            results.insert(signature, sample.cost);
        }

        self.store.put(label, &results)?;
        if let Some(best) = &best {
            info!(
                kernel = label,
                measured,
                cost = best.cost,
                layout = %best.signature.trim(),
                "best layout"
            );
        }

        Ok(KernelOutcome {
            label: label.to_string(),
            results,
            best,
            from_cache: false,
            measured,
        })
    }

    /// First captured version of every non-transient array, in logical order.
    fn materialize(&self, label: &str, kernel: &Program) -> Result<BTreeMap<String, ArrayD<f64>>> {
        let mut captured = BTreeMap::new();
        for (name, desc) in kernel.arrays.tunable() {
            let capture_error = |source| TuneError::Capture {
                kernel: label.to_string(),
                array: name.to_string(),
                source,
            };
            let data = self.capture.first_version(name).map_err(capture_error)?;
            if data.shape() != desc.shape.as_slice() {
                return Err(capture_error(anyhow!(
                    "captured shape {:?} does not match {:?}",
                    data.shape(),
                    desc.shape
                )));
            }
            captured.insert(name.to_string(), data);
        }
        Ok(captured)
    }

    fn relayout(
        &self,
        label: &str,
        kernel: &Program,
        name: &str,
        desc: &layoutforge_layout::ArrayDescriptor,
        captured: &BTreeMap<String, ArrayD<f64>>,
    ) -> Result<ArrayD<f64>> {
        let layout_error = |source| TuneError::Layout {
            kernel: label.to_string(),
            array: name.to_string(),
            source,
        };
        let source = captured
            .get(name)
            .ok_or_else(|| layout_error(anyhow!("`{}` has no argument buffer in `{}`", name, kernel.name)))?;
        relayout(desc, source.view()).map_err(layout_error)
    }
}

/// Attribute an error raised against a cutout to the kernel's label.
fn relabel(err: TuneError, label: &str) -> TuneError {
    match err {
        TuneError::Configuration { reason, .. } => TuneError::configuration(label, reason),
        other => other,
    }
}
