use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dicom_ensemble::{
    config::PipelineConfig,
    pipeline::{self, StageReport},
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Group DICOM folders into axial series and copy each series out
    Group {
        /// Root of the DICOM folders
        #[arg(short, long)]
        input: PathBuf,
        /// Folder receiving one sub-folder per series group
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        min_files: Option<usize>,
    },
    /// Export the slices containing the anchor label as classifier inputs
    Select {
        /// Label volumes, one `<group>.npy` per group
        #[arg(short, long)]
        labels: PathBuf,
        /// Output of the `group` command
        #[arg(short, long)]
        groups: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        anchor_label: Option<i32>,
    },
    /// Reduce ensemble predictions into masks, uncertainty maps and a summary
    Reduce {
        /// Member output folders, in order
        #[arg(short, long, num_args = 1..)]
        members: Vec<PathBuf>,
        /// Folder holding `ensemble_*` member folders
        #[arg(short, long, conflicts_with = "members")]
        ensemble_root: Option<PathBuf>,
        /// Output of the `group` command
        #[arg(short, long)]
        groups: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Variance above which a pixel counts as uncertain
        #[arg(long)]
        threshold: Option<f64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config =
        PipelineConfig::load_or_default(cli.config.as_deref()).context("loading configuration")?;

    let report = match cli.command {
        Command::Group {
            input,
            output,
            min_files,
        } => {
            if let Some(min_files) = min_files {
                config.grouping.min_files = min_files;
            }
            pipeline::run_group_stage(&input, &output, &config.grouping)
                .with_context(|| format!("grouping {}", input.display()))?
        }
        Command::Select {
            labels,
            groups,
            output,
            anchor_label,
        } => {
            if let Some(anchor_label) = anchor_label {
                config.selection.anchor_label = anchor_label;
            }
            pipeline::run_select_stage(&labels, &groups, &output, &config.selection)
                .with_context(|| format!("selecting slices from {}", labels.display()))?
        }
        Command::Reduce {
            members,
            ensemble_root,
            groups,
            output,
            threshold,
        } => {
            if let Some(threshold) = threshold {
                config.ensemble.variance_threshold = threshold;
            }
            if !members.is_empty() {
                config.ensemble.members = members;
            }
            config.validate().context("validating configuration")?;

            let members = pipeline::resolve_members(&config.ensemble, ensemble_root.as_deref())
                .context("resolving ensemble members")?;
            let outcome = pipeline::run_reduce_stage(&members, &groups, &output, &config)
                .context("reducing ensemble")?;
            println!("summary written to {}", outcome.summary_path.display());
            outcome.report
        }
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &StageReport) {
    println!(
        "{}: {} processed, {} skipped",
        report.stage,
        report.processed,
        report.skipped.len()
    );
    for skip in &report.skipped {
        println!("  skipped {skip}");
    }
}
