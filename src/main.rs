// src/main.rs
//
// =============================================================================
// ESMRUN: COMMANDER & ENTRY POINT (v 0.1 )
// =============================================================================
//
// Thin wiring around the library for use inside batch job scripts.
//
// Modes:
// 1. PREPARE: resolves the file tables and fills the experiment tree.
// 2. WORK:    copies the prepared tree into the work directory.
// 3. CLEANUP: after the model ran, collects its output into the experiment tree.
// 4. RUN:     all three phases in one process.
// 5. SHOW:    prints the resolved prepare manifest without touching any file.
//
// Each mode is its own process, so WORK and CLEANUP pick the lifecycle up
// from what the previous phase left on disk.
// Scheduling, job submission and running the model binary stay outside.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use esmrun::context::DATE_FORMAT;
use esmrun::{ComponentConfig, ComputeComponent, LifecycleState};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "esmrun",
    version,
    about = "Component lifecycle engine for Earth System Model runs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Component configuration (YAML).
    #[arg(long)]
    config: PathBuf,

    /// Experiment ID.
    #[arg(long)]
    expid: String,

    /// Current simulation date, YYYYMMDD.
    #[arg(long)]
    date: String,

    /// Where the experiment tree lives.
    #[arg(long, default_value = ".")]
    parent_dir: PathBuf,

    /// Variant (e.g. resolution) from the configuration's registry.
    #[arg(long)]
    variant: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Place all input files into the experiment tree.
    Prepare(RunArgs),

    /// Copy the prepared files into the work directory.
    Work(RunArgs),

    /// Collect model output from the work directory.
    Cleanup(RunArgs),

    /// Prepare, work and cleanup in order.
    Run(RunArgs),

    /// Print the resolved prepare manifest as JSON.
    Show(RunArgs),
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli.command {
        Commands::Prepare(args) => {
            let mut component = build(&args)?;
            component.prepare().context("prepare phase failed")?;
            log::info!("✅ {} prepared under {}", args.expid, component.context().root().display());
        }
        Commands::Work(args) => {
            let mut component = build(&args)?;
            component
                .restore_prepared()
                .context("could not restore the prepared tree")?;
            component.work().context("work phase failed")?;
            log::info!("✅ {} staged in {}", args.expid, component.context().work_dir().display());
        }
        Commands::Cleanup(args) => {
            // Prepare and work ran in an earlier job against the same tree.
            let mut component = build(&args)?.resume_from(LifecycleState::Worked);
            component.cleanup().context("cleanup phase failed")?;
            log::info!("✅ {} output collected", args.expid);
        }
        Commands::Run(args) => {
            let mut component = build(&args)?;
            component.prepare().context("prepare phase failed")?;
            component.work().context("work phase failed")?;
            component.cleanup().context("cleanup phase failed")?;
            log::info!("✅ {} finished all phases", args.expid);
        }
        Commands::Show(args) => {
            let mut component = build(&args)?;
            component.run_steps(
                "prepare",
                &["read_filetables", "modify_filetables", "override_filetables_from_env"],
            )?;
            println!(
                "{}",
                serde_json::to_string_pretty(&component.workspace().prepare_files)?
            );
        }
    }
    Ok(())
}

fn build(args: &RunArgs) -> Result<ComputeComponent> {
    let date = NaiveDate::parse_from_str(&args.date, DATE_FORMAT)
        .map_err(|e| anyhow!("invalid --date '{}' (expected YYYYMMDD): {}", args.date, e))?;

    let cfg = ComponentConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?
        .select_variant(args.variant.as_deref())?;

    log::info!(
        "🚀 {} {} | expid {} | date {}",
        cfg.name,
        cfg.version,
        args.expid,
        args.date
    );
    Ok(ComputeComponent::from_config(
        &cfg,
        &args.expid,
        date,
        &args.parent_dir,
    ))
}
