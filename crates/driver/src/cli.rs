//! CLI wiring for layout tuning.

use crate::session::{describe_space, SessionOptions, TuningSession};
use anyhow::Result;
use clap::{Parser, Subcommand};
use layoutforge_autotune::{Aggregation, FileStore, GroupPolicy};
use layoutforge_program::Program;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "layoutforge", about = "Data layout search for program kernels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupByArg {
    Separate,
    InputsOutputs,
    Dimension,
    InputsOutputsDimension,
}

impl From<GroupByArg> for GroupPolicy {
    fn from(value: GroupByArg) -> GroupPolicy {
        match value {
            GroupByArg::Separate => GroupPolicy::Separate,
            GroupByArg::InputsOutputs => GroupPolicy::InputsOutputs,
            GroupByArg::Dimension => GroupPolicy::Dimension,
            GroupByArg::InputsOutputsDimension => GroupPolicy::InputsOutputsDimension,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationArg {
    Median,
    Mean,
    Min,
}

impl From<AggregationArg> for Aggregation {
    fn from(value: AggregationArg) -> Aggregation {
        match value {
            AggregationArg::Median => Aggregation::Median,
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Min => Aggregation::Min,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the tunable kernels of a program.
    Kernels {
        #[arg(long)]
        program: PathBuf,
    },
    /// Show the tuning groups and layout space size of one kernel.
    Space {
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        kernel: String,
        #[arg(long, value_enum, default_value = "inputs-outputs")]
        group_by: GroupByArg,
    },
    /// Measure every layout of every kernel and report the fastest.
    Tune {
        #[arg(long)]
        program: PathBuf,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        synthesize_missing: bool,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_enum, default_value = "inputs-outputs")]
        group_by: GroupByArg,
        #[arg(long, env = "LAYOUTFORGE_REPETITIONS", default_value_t = 30)]
        repetitions: usize,
        #[arg(long, value_enum, default_value = "median")]
        aggregation: AggregationArg,
        #[arg(long, env = "LAYOUTFORGE_CACHE_DIR", default_value = ".layoutforge")]
        cache_dir: PathBuf,
        #[arg(long, default_value_t = false)]
        keep_going: bool,
        #[arg(long, default_value_t = false)]
        parallel: bool,
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete cached tuning results.
    ClearCache {
        #[arg(long, env = "LAYOUTFORGE_CACHE_DIR", default_value = ".layoutforge")]
        cache_dir: PathBuf,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Kernels { program } => {
            for unit in Program::load(&program)?.kernels() {
                println!("{}", unit.label);
            }
        }
        Command::Space {
            program,
            kernel,
            group_by,
        } => {
            let summary = describe_space(&Program::load(&program)?, &kernel, group_by.into())?;
            println!(
                "kernel={} policy={} configurations={}",
                summary.kernel, summary.policy, summary.size
            );
            for group in &summary.groups {
                println!("- {{{}}} rank {}", group.members.join(", "), group.rank);
            }
        }
        Command::Tune {
            program,
            data,
            synthesize_missing,
            seed,
            group_by,
            repetitions,
            aggregation,
            cache_dir,
            keep_going,
            parallel,
            jobs,
            output,
        } => {
            let options = SessionOptions {
                cache_dir,
                data,
                synthesize_missing,
                seed,
                jobs,
                group_by: group_by.into(),
                repetitions,
                aggregation: aggregation.into(),
                keep_going,
            };
            let session = TuningSession::open(program, options)?;
            let report = session.tune(parallel)?;

            for (kernel, best) in &report.best {
                println!("{kernel}: cost={:.6}", best.cost);
                println!("{}", best.signature);
            }
            for (kernel, reason) in &report.failures {
                eprintln!("{kernel}: failed: {reason}");
            }

            if let Some(path) = output {
                fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                info!(path = %path.display(), "wrote tuning report");
            }
        }
        Command::ClearCache { cache_dir } => {
            let removed = FileStore::new(&cache_dir).clear()?;
            println!("removed {removed} cached entries from {}", cache_dir.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tune_flags() {
        let cli = Cli::try_parse_from([
            "layoutforge",
            "tune",
            "--program",
            "p.json",
            "--group-by",
            "separate",
            "--aggregation",
            "min",
            "--repetitions",
            "5",
            "--cache-dir",
            "/tmp/lf",
            "--keep-going",
            "--parallel",
        ])
        .unwrap();

        match cli.command {
            Command::Tune {
                group_by,
                aggregation,
                repetitions,
                cache_dir,
                keep_going,
                parallel,
                data,
                ..
            } => {
                assert_eq!(GroupPolicy::from(group_by), GroupPolicy::Separate);
                assert_eq!(Aggregation::from(aggregation), Aggregation::Min);
                assert_eq!(repetitions, 5);
                assert_eq!(cache_dir, PathBuf::from("/tmp/lf"));
                assert!(keep_going && parallel);
                assert!(data.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_space_defaults_to_inputs_outputs() {
        let cli = Cli::try_parse_from(["layoutforge", "space", "--program", "p.json", "--kernel", "gemm"]).unwrap();
        match cli.command {
            Command::Space { kernel, group_by, .. } => {
                assert_eq!(kernel, "gemm");
                assert_eq!(group_by, GroupByArg::InputsOutputs);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(Cli::try_parse_from(["layoutforge", "space", "--program", "p", "--kernel", "k", "--group-by", "rows"]).is_err());
    }
}
