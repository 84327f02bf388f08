use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context};
use clap::Parser;
use goptune_core::{CancelToken, Error, Project, SearchOptions};
use once_cell::sync::OnceCell;
use path_abs::{PathAbs, PathInfo};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// Keeps the non-blocking file writer alive for the whole process.
static WORKER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Per-GOP two-stage perceptual-quality transcode parameter search
#[derive(Parser, Debug)]
#[command(name = "goptune", version)]
pub struct CliOpts {
    /// Input file to analyze
    #[arg(short)]
    pub input: PathBuf,

    /// Parameter table output, one JSON record per GOP
    #[arg(short, long, default_value = "gop_params.jsonl")]
    pub output: PathBuf,

    /// Minimum decoded frames before a keyframe may close a GOP
    #[arg(long, default_value_t = 300)]
    pub min_gop: usize,

    /// Frames of pixels retained per GOP sample
    #[arg(long, default_value_t = 50)]
    pub sample_size: usize,

    /// Stage-1 stopping threshold on Δbitrate/Δquality, kb/s per point
    #[arg(long, default_value_t = 400.0)]
    pub marginal_threshold: f64,

    /// Lower the stage-2 quality target by 2 when that stays at or above 91
    #[arg(long)]
    pub target_tolerance: bool,

    /// Score stages 0 and 1 against a CRF-5 encode of the sample instead of
    /// the decoded pixels themselves
    #[arg(long)]
    pub crf5_reference: bool,

    /// libvmaf model file [default: the library's bundled model]
    #[arg(long)]
    pub vmaf_model: Option<PathBuf>,

    /// libvmaf worker threads
    #[arg(long, default_value_t = 1)]
    pub vmaf_threads: usize,

    /// Score every n-th frame of the scored range
    #[arg(long, default_value_t = 1)]
    pub vmaf_subsample: usize,

    /// Directory for the run log and libvmaf score logs
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log level for the log file (the console stays at info)
    #[arg(long, default_value_t = LevelFilter::DEBUG, ignore_case = true)]
    pub log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    let cli = CliOpts::parse();
    ensure!(cli.sample_size >= 8, "--sample-size must be at least 8");
    ensure!(cli.min_gop >= 1, "--min-gop must be at least 1");
    ensure!(cli.vmaf_subsample >= 1, "--vmaf-subsample must be at least 1");

    init_logging(&cli)?;

    let cancel: CancelToken = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(Arc::clone(&cancel));

    let input = PathAbs::new(&cli.input)
        .with_context(|| format!("cannot resolve input path {}", cli.input.display()))?
        .as_path()
        .to_path_buf();

    let project = Project {
        input,
        output: Some(cli.output.clone()),
        search: SearchOptions {
            sample_frames: cli.sample_size,
            min_gop: cli.min_gop,
            marginal_threshold: cli.marginal_threshold,
            relaxed_target: cli.target_tolerance,
            crf5_reference: cli.crf5_reference,
            ..SearchOptions::default()
        },
        vmaf_model: cli.vmaf_model.clone(),
        log_dir: cli.log_dir.clone(),
        vmaf_threads: cli.vmaf_threads,
        vmaf_subsample: cli.vmaf_subsample,
    };

    match project.run(cancel) {
        Ok(table) => {
            info!(
                gops = table.len(),
                output = %cli.output.display(),
                "parameter table written"
            );
            Ok(())
        }
        Err(Error::Interrupted) => {
            warn!("interrupted; records for completed GOPs were kept");
            exit(130);
        }
        Err(e) => Err(e.into()),
    }
}

fn init_logging(cli: &CliOpts) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("cannot create log directory {}", cli.log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::NEVER, &cli.log_dir, "goptune.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    WORKER_GUARD
        .set(guard)
        .map_err(|_| anyhow!("logging initialized twice"))?;

    let file_filter =
        EnvFilter::try_new(format!("goptune={0},goptune_core={0}", cli.log_level))?;
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("goptune=info,goptune_core=info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(non_blocking)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();
    Ok(())
}

/// First ctrl-c sets the cancellation flag; the driver finishes the trial
/// in flight, keeps every completed record, and exits 130.
fn install_interrupt_handler(cancel: CancelToken) {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .expect("failed to build the signal runtime");
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("interrupt received, finishing the current trial");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}
