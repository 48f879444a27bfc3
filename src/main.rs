//! Biosignal Features CLI
//!
//! Multi-resolution windowed feature extraction for EEG and ECG recordings.

use anyhow::{Context, Result};
use biosignal_features::{
    config::Config,
    core::{parse_timezone, SweepProgress},
    pipeline::{
        DEFAULT_ECG_CHANNEL, DEFAULT_EEG_CHANNEL, DEFAULT_FILE_NAME, DEFAULT_INPUT,
        DEFAULT_OUTPUT_DIR,
    },
    EdfReader, Pipeline, RecordingReader, RunRequest, SignalSelection, SpectralFeatureExtractor,
    VERSION,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biosignal-features")]
#[command(version = VERSION)]
#[command(about = "Multi-resolution windowed feature extraction for EEG and ECG", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep a recording and write merged feature tables
    Run {
        /// Recording to read (EDF/EDF+)
        #[arg(short = 'i', long, default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// Directory receiving EEG/ and ECG/ tables and the run report
        #[arg(short = 'd', long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Base name of the output files
        #[arg(short = 'o', long, default_value = DEFAULT_FILE_NAME)]
        output_file_name: String,

        /// EEG channel name
        #[arg(short = 'e', long, default_value = DEFAULT_EEG_CHANNEL)]
        eeg: String,

        /// ECG channel name
        #[arg(short = 'c', long, default_value = DEFAULT_ECG_CHANNEL)]
        ecg: String,

        /// Optional 1 Hz label file
        #[arg(short = 'l', long)]
        labels: Option<PathBuf>,

        /// Process only one signal
        #[arg(long, value_enum)]
        only: Option<OnlySignal>,

        /// Worker threads per sweep (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Timezone of the recording's wall-clock start (overrides config)
        #[arg(long)]
        timezone: Option<String>,

        /// Config file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List the channels of a recording
    Channels {
        /// Recording to inspect
        #[arg(short = 'i', long, default_value = DEFAULT_INPUT)]
        input: PathBuf,
    },

    /// Show configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnlySignal {
    Eeg,
    Ecg,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output_dir,
            output_file_name,
            eeg,
            ecg,
            labels,
            only,
            workers,
            timezone,
            config,
        } => {
            let request = RunRequest {
                input,
                output_dir,
                file_name: output_file_name,
                eeg_channel: eeg,
                ecg_channel: ecg,
                labels,
                signals: match only {
                    None => SignalSelection::All,
                    Some(OnlySignal::Eeg) => SignalSelection::Eeg,
                    Some(OnlySignal::Ecg) => SignalSelection::Ecg,
                },
            };
            cmd_run(&request, config.as_deref(), workers, timezone)
        }
        Commands::Channels { input } => cmd_channels(&input),
        Commands::Config => cmd_config(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("could not load config from {}", path.display())),
        None => Config::load().context("could not load config"),
    }
}

fn cmd_run(
    request: &RunRequest,
    config_path: Option<&Path>,
    workers: Option<usize>,
    timezone: Option<String>,
) -> Result<()> {
    println!("Biosignal Features v{VERSION}");
    println!();

    let mut config = load_config(config_path)?;
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if let Some(timezone) = timezone {
        parse_timezone(&timezone)?;
        config.timezone = timezone;
    }

    println!("Input: {}", request.input.display());
    println!("Output: {}", request.output_dir.display());
    println!("Timezone: {}", config.timezone);
    println!("Workers: {}", config.workers.max(1));
    if let Some(labels) = &request.labels {
        println!("Labels: {}", labels.display());
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = Arc::new(AtomicBool::new(false));
    ctrlc_handler(cancel.clone())?;

    let mut pipeline = Pipeline::new(config, EdfReader::new(), SpectralFeatureExtractor::new())
        .with_cancel_flag(cancel)
        .with_progress(print_progress);

    let report = pipeline.run(request).context("feature run failed")?;

    println!();
    println!("{}", report.summary());
    Ok(())
}

fn print_progress(progress: &SweepProgress) {
    println!(
        "[{}] {}/{} ({:.1}%) {} -> {} rows in {} (elapsed {}, ETA {})",
        progress.signal_type,
        progress.completed,
        progress.total,
        progress.percent(),
        progress.spec,
        progress.rows,
        format_duration(progress.iteration_elapsed),
        format_duration(progress.total_elapsed),
        format_duration(progress.eta()),
    );
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn cmd_channels(input: &Path) -> Result<()> {
    let channels = EdfReader::new()
        .list_channels(input)
        .with_context(|| format!("could not read {}", input.display()))?;

    println!("Channels in {}", input.display());
    println!();
    for channel in &channels {
        println!(
            "  {:<24} {:>8} Hz  {:>10} samples  {}",
            channel.name, channel.sample_rate, channel.sample_count, channel.unit
        );
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("Stopping after the current iteration...");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
