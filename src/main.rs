use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use fibermorph_lib::config::{AnalysisMode, Config, WindowUnit};
use fibermorph_lib::runner::{format_duration, run_analysis, CancelToken};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "fibermorph - Hair fiber curvature and cross-section analysis")]
struct Args {
    /// Path to input file or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file (defaults are used when absent)
    #[clap(short, long)]
    config: Option<String>,

    /// Analysis to run (overwrites config)
    #[clap(short, long)]
    analysis: Option<AnalysisArg>,

    /// Pixels per mm for curvature
    #[clap(long)]
    resolution_mm: Option<f64>,

    /// Pixels per micron for sections
    #[clap(long)]
    resolution_mu: Option<f64>,

    /// Windows of measurement, one run per size (unit set by --window-unit)
    #[clap(long, num_args = 1..)]
    window_size: Vec<f64>,

    #[clap(long)]
    window_unit: Option<WindowUnitArg>,

    /// Minimum section diameter in microns
    #[clap(long)]
    minsize: Option<f64>,

    /// Maximum section diameter in microns
    #[clap(long)]
    maxsize: Option<f64>,

    /// Number of parallel workers
    #[clap(short, long)]
    jobs: Option<usize>,

    /// Save intermediate images
    #[clap(long)]
    save_image: bool,

    /// Write per-window measurement tables
    #[clap(long)]
    within_element: bool,

    /// Apply the ridge filter before thresholding
    #[clap(long)]
    ridge_filter: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AnalysisArg {
    Curvature,
    Section,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WindowUnitArg {
    Px,
    Mm,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new("fibermorph.toml").exists() => Config::from_file("fibermorph.toml")?,
        None => Config::default(),
    };

    // Override config with command-line arguments
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }
    if let Some(output) = args.output.clone() {
        config.output_base_dir = output;
    }
    if let Some(analysis) = args.analysis {
        config.analysis = match analysis {
            AnalysisArg::Curvature => AnalysisMode::Curvature,
            AnalysisArg::Section => AnalysisMode::Section,
        };
    }
    if let Some(unit) = args.window_unit {
        config.window_unit = match unit {
            WindowUnitArg::Px => WindowUnit::Px,
            WindowUnitArg::Mm => WindowUnit::Mm,
        };
    }
    if let Some(v) = args.resolution_mm {
        config.resolution_mm = v;
    }
    if let Some(v) = args.resolution_mu {
        config.resolution_mu = v;
    }
    if !args.window_size.is_empty() {
        config.window_size = args.window_size.clone();
    }
    if let Some(v) = args.minsize {
        config.minsize = v;
    }
    if let Some(v) = args.maxsize {
        config.maxsize = v;
    }
    if args.jobs.is_some() {
        config.jobs = args.jobs;
    }
    config.save_image |= args.save_image;
    config.within_element |= args.within_element;
    config.ridge_filter |= args.ridge_filter;

    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(&args)?;

    if let Err(e) = config.validate() {
        log::error!("{}", e);
        return Err(e).context("invalid configuration");
    }

    // First Ctrl-C stops dispatching new images; running ones finish and are written
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, finishing images already in progress");
        handler_token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let start_time = Instant::now();
    let summary = run_analysis(&config, &cancel)
        .with_context(|| format!("{} analysis of {} failed", config.analysis.as_str(), config.input_path))?;

    log::info!(
        "{} images processed, {} failed, {} cancelled; results in {}",
        summary.processed,
        summary.failed,
        summary.cancelled,
        summary.output.run_dir.display()
    );
    log::info!("Complete in {}", format_duration(start_time.elapsed()));

    Ok(())
}
