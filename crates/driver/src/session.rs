//! Tuning session orchestration.

use anyhow::{anyhow, Context, Result};
use layoutforge_autotune::{
    group, resolve_groups, Aggregation, FileStore, GroupPolicy, LayoutSpace, LayoutTuner, TuningReport,
    TunerOptions,
};
use layoutforge_program::{DataReport, ProbeExecutor, Program};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub cache_dir: PathBuf,
    /// Captured argument data; absent means every array is synthesized.
    pub data: Option<PathBuf>,
    pub synthesize_missing: bool,
    pub seed: u64,
    /// Worker threads for parallel sweeps; `None` uses the rayon default.
    pub jobs: Option<usize>,
    pub group_by: GroupPolicy,
    pub repetitions: usize,
    pub aggregation: Aggregation,
    pub keep_going: bool,
}

impl SessionOptions {
    pub fn to_tuner_options(&self) -> TunerOptions {
        TunerOptions {
            group_by: self.group_by,
            repetitions: self.repetitions,
            aggregation: self.aggregation,
            keep_going: self.keep_going,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        let tuner = TunerOptions::default();
        Self {
            cache_dir: PathBuf::from(".layoutforge"),
            data: None,
            synthesize_missing: false,
            seed: 0,
            jobs: None,
            group_by: tuner.group_by,
            repetitions: tuner.repetitions,
            aggregation: tuner.aggregation,
            keep_going: tuner.keep_going,
        }
    }
}

/// Groups and size of one kernel's layout space.
#[derive(Debug, Clone, Serialize)]
pub struct SpaceSummary {
    pub kernel: String,
    pub policy: String,
    pub groups: Vec<GroupSummary>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub members: Vec<String>,
    pub rank: usize,
}

/// Describe the layout space of `label` without capturing or measuring anything.
pub fn describe_space(program: &Program, label: &str, policy: GroupPolicy) -> Result<SpaceSummary> {
    let unit = program
        .kernel(label)
        .ok_or_else(|| anyhow!("no kernel labelled `{label}` in `{}`", program.name))?;
    let cutout = program.cutout(&unit)?;
    let groups = resolve_groups(&cutout, group(&cutout, policy)?)?;
    let space = LayoutSpace::new(groups).with_context(|| format!("kernel `{}`", unit.label))?;

    Ok(SpaceSummary {
        kernel: unit.label,
        policy: policy.to_string(),
        groups: space
            .groups()
            .iter()
            .map(|g| GroupSummary {
                members: g.members().map(str::to_string).collect(),
                rank: g.rank(),
            })
            .collect(),
        size: space.size(),
    })
}

pub struct TuningSession {
    program: Program,
    capture: DataReport,
    store: FileStore,
    executor: ProbeExecutor,
    options: SessionOptions,
}

impl TuningSession {
    pub fn open(program: impl AsRef<Path>, options: SessionOptions) -> Result<Self> {
        let path = program.as_ref();
        let program = Program::load(path).with_context(|| format!("loading program {}", path.display()))?;
        Self::new(program, options)
    }

    pub fn new(program: Program, options: SessionOptions) -> Result<Self> {
        let mut capture = match &options.data {
            Some(path) => {
                DataReport::load(path).with_context(|| format!("loading captured data {}", path.display()))?
            }
            None => DataReport::new(),
        };

        if options.data.is_none() || options.synthesize_missing {
            // Cutouts may promote transients to boundary arrays, so fill per kernel.
            let mut filled = 0;
            for unit in program.kernels() {
                match program.cutout(&unit) {
                    Ok(cutout) => filled += capture.fill_missing(&cutout, options.seed),
                    Err(err) => warn!(kernel = %unit.label, error = %err, "cannot extract kernel"),
                }
            }
            info!(arrays = filled, seed = options.seed, "synthesized missing captures");
        }

        let store = FileStore::new(&options.cache_dir);
        info!(
            program = %program.name,
            cache = %store.dir().display(),
            "opened tuning session"
        );
        Ok(Self {
            program,
            capture,
            store,
            executor: ProbeExecutor::new(),
            options,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn kernel_labels(&self) -> Vec<String> {
        self.program.kernels().into_iter().map(|unit| unit.label).collect()
    }

    pub fn space(&self, label: &str) -> Result<SpaceSummary> {
        describe_space(&self.program, label, self.options.group_by)
    }

    pub fn tune(&self, parallel: bool) -> Result<TuningReport> {
        let tuner = LayoutTuner::new(&self.executor, &self.capture, &self.store)
            .with_options(self.options.to_tuner_options());

        if !parallel {
            return Ok(tuner.tune_all(&self.program)?);
        }
        match self.options.jobs {
            Some(jobs) => {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
                Ok(pool.install(|| tuner.tune_all_parallel(&self.program))?)
            }
            None => Ok(tuner.tune_all_parallel(&self.program)?),
        }
    }

    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.store.clear()?;
        info!(removed, cache = %self.store.dir().display(), "cleared layout cache");
        Ok(removed)
    }
}
