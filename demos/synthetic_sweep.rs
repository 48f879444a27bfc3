//! Demonstration of a full feature sweep over a synthetic recording.
//!
//! This example shows how to:
//! 1. Write a two-channel EDF recording (10 Hz EEG, 72 bpm ECG)
//! 2. List its channels
//! 3. Run the EEG and heart-rate sweeps with progress reporting
//! 4. Inspect the merged tables
//!
//! Run with: cargo run --example synthetic_sweep

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use biosignal_features::{
    recording::{write_edf, EdfSignal},
    Config, EdfReader, Pipeline, RecordingReader, RunRequest, SpectralFeatureExtractor, SweepGrid,
};
use chrono::NaiveDate;

const SAMPLE_RATE: f64 = 128.0;
const DURATION_SECS: usize = 900;

fn main() {
    println!("Biosignal Features - Synthetic Sweep Demo");
    println!("=========================================");
    println!();

    let dir = std::env::temp_dir().join(format!("biosignal-demo-{}", uuid::Uuid::new_v4()));
    let input = dir.join("synthetic.edf");

    // Alpha rhythm over a weaker theta component
    let n = DURATION_SECS * SAMPLE_RATE as usize;
    let eeg: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            40.0 * (2.0 * PI * 10.0 * t).sin() + 15.0 * (2.0 * PI * 6.0 * t).sin()
        })
        .collect();
    // Gaussian R-waves every 60/72 s
    let period = 60.0 / 72.0;
    let ecg: Vec<f64> = (0..n)
        .map(|i| {
            let phase = (i as f64 / SAMPLE_RATE % period) - period / 2.0;
            800.0 * (-(phase * phase) / (2.0 * 0.012f64.powi(2))).exp()
        })
        .collect();

    let start = NaiveDate::from_ymd_opt(2023, 3, 1)
        .and_then(|d| d.and_hms_opt(22, 0, 0))
        .expect("valid start time");
    std::fs::create_dir_all(&dir).expect("Failed to create demo dir");
    write_edf(
        &input,
        start,
        1,
        &[
            EdfSignal {
                label: "EEG_ICA5",
                unit: "uV",
                sample_rate: SAMPLE_RATE,
                samples: &eeg,
            },
            EdfSignal {
                label: "ECG_Raw_Ch1",
                unit: "uV",
                sample_rate: SAMPLE_RATE,
                samples: &ecg,
            },
        ],
    )
    .expect("Failed to write EDF");
    println!("Wrote {}", input.display());
    println!();

    match EdfReader::new().list_channels(&input) {
        Ok(channels) => {
            for c in channels {
                println!(
                    "  {} ({} Hz, {} samples, {})",
                    c.name, c.sample_rate, c.sample_count, c.unit
                );
            }
        }
        Err(e) => {
            eprintln!("Error reading channels: {e}");
            return;
        }
    }
    println!();

    // A reduced grid keeps the demo quick
    let mut config = Config {
        eeg: SweepGrid::new(vec![16, 32, 64], vec![1, 2, 4]),
        ecg: SweepGrid::new(vec![128, 256], vec![64, 128]),
        workers: 2,
        ..Config::default()
    };
    // Beats are ~107 samples apart at 128 Hz
    config.heart_rate.search_radius = 40;

    let cancel = Arc::new(AtomicBool::new(false));
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        c.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    let mut pipeline = Pipeline::new(config, EdfReader::new(), SpectralFeatureExtractor::new())
        .with_cancel_flag(cancel)
        .with_progress(|p| {
            println!(
                "  [{}] {:>2}/{} {:<22} {:>4} rows",
                p.signal_type,
                p.completed,
                p.total,
                p.spec.to_string(),
                p.rows
            );
        });

    let request = RunRequest {
        input,
        output_dir: dir.join("features"),
        file_name: "synthetic".to_string(),
        ..RunRequest::default()
    };

    let report = match pipeline.run(&request) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Run failed: {e}");
            return;
        }
    };

    println!();
    println!("{}", report.summary());

    // Show a snippet of each table
    for signal in &report.signals {
        let content = std::fs::read_to_string(&signal.output).unwrap_or_default();
        println!("=== {} ===", signal.output.display());
        for line in content.lines().take(3) {
            let preview: String = line.chars().take(100).collect();
            println!("  {preview}...");
        }
        println!();
    }
}
