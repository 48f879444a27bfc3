//! End-to-end runs over synthetic EDF recordings

use biosignal_features::recording::{write_edf, EdfSignal};
use biosignal_features::{
    Config, EdfReader, Error, Pipeline, RunReport, RunRequest, SignalSelection, SignalType,
    SpectralFeatureExtractor, SweepGrid,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("biosignal-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("Failed to create test dir");
    dir
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 3, 1)
        .unwrap()
        .and_hms_opt(22, 0, 0)
        .unwrap()
}

/// 10 Hz EEG at 256 Hz and a 60 bpm ECG at 256 Hz.
fn write_recording(path: &Path, secs: usize) {
    let sample_rate = 256.0;
    let n = secs * 256;
    let eeg: Vec<f64> = (0..n)
        .map(|i| 50.0 * (2.0 * PI * 10.0 * i as f64 / sample_rate).sin())
        .collect();
    let ecg: Vec<f64> = (0..n)
        .map(|i| {
            let phase = (i as f64 / sample_rate % 1.0) - 0.5;
            1000.0 * (-(phase * phase) / (2.0 * 0.01f64.powi(2))).exp()
        })
        .collect();

    write_edf(
        path,
        start(),
        1,
        &[
            EdfSignal {
                label: "EEG_ICA5",
                unit: "uV",
                sample_rate,
                samples: &eeg,
            },
            EdfSignal {
                label: "ECG_Raw_Ch1",
                unit: "uV",
                sample_rate,
                samples: &ecg,
            },
        ],
    )
    .expect("Failed to write EDF");
}

fn config(eeg: SweepGrid, ecg: SweepGrid) -> Config {
    Config {
        eeg,
        ecg,
        ..Config::default()
    }
}

fn run(config: Config, input: &Path, output_dir: &Path, signals: SignalSelection) -> RunReport {
    let request = RunRequest {
        input: input.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        file_name: "synthetic".to_string(),
        signals,
        ..RunRequest::default()
    };
    Pipeline::new(config, EdfReader::new(), SpectralFeatureExtractor::new())
        .run(&request)
        .expect("Run failed")
}

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("Failed to open CSV");
    let header = reader
        .headers()
        .expect("Missing header")
        .iter()
        .map(String::from)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("Bad record").iter().map(String::from).collect())
        .collect();
    (header, rows)
}

#[test]
fn test_hour_long_eeg_single_spec() {
    let dir = test_dir();
    let input = dir.join("hour.edf");
    write_recording(&input, 3600);

    let report = run(
        config(SweepGrid::new(vec![16], vec![1]), SweepGrid::ecg_default()),
        &input,
        &dir.join("out"),
        SignalSelection::Eeg,
    );

    let eeg = report.signal(SignalType::Eeg).expect("EEG report");
    let (header, rows) = read_csv(&eeg.output);

    // floor((3600 - 16) / 2) + 1
    assert_eq!(rows.len(), 1793);
    assert_eq!(header[0], "timestamp");
    assert!(header[1..]
        .iter()
        .all(|c| c.starts_with("EPOCH_16_WELCH_1_EEG_")));
    assert_eq!(rows[0][0], "2023-03-01T22:00:00-08:00");
    assert_eq!(rows[1][0], "2023-03-01T22:00:02-08:00");
    assert_eq!(rows[1792][0], "2023-03-01T22:59:44-08:00");

    let peak = header
        .iter()
        .position(|c| c == "EPOCH_16_WELCH_1_EEG_peak_freq")
        .expect("peak_freq column");
    assert_eq!(rows[0][peak], "10");
}

#[test]
fn test_full_run_merges_both_signals() {
    let dir = test_dir();
    let input = dir.join("both.edf");
    write_recording(&input, 600);
    let output_dir = dir.join("out");

    let report = run(
        config(
            SweepGrid::new(vec![16, 32], vec![1, 4]),
            SweepGrid::new(vec![128, 256], vec![64, 128]),
        ),
        &input,
        &output_dir,
        SignalSelection::All,
    );

    let eeg = report.signal(SignalType::Eeg).expect("EEG report");
    let (eeg_header, eeg_rows) = read_csv(&eeg.output);
    assert_eq!(eeg.iterations, 4);
    // Union of 2 s and 4 s strides is the 2 s grid
    assert_eq!(eeg_rows.len(), (600 - 16) / 2 + 1);
    assert!(eeg_header.contains(&"EPOCH_32_WELCH_4_EEG_rel_alpha".to_string()));

    let hr = report.signal(SignalType::HeartRate).expect("HR report");
    assert!(hr.output.ends_with("ECG/synthetic_ECG.csv"));
    let (hr_header, hr_rows) = read_csv(&hr.output);
    assert_eq!(hr.iterations, 4);
    assert_eq!(hr_rows.len(), (600 - 128) / 16 + 1);
    assert!(hr_header.contains(&"EPOCH_256_WELCH_128_HR_mean".to_string()));

    let mean = hr_header
        .iter()
        .position(|c| c == "EPOCH_128_WELCH_64_HR_mean")
        .expect("HR mean column");
    let bpm: f64 = hr_rows[0][mean].parse().expect("numeric HR");
    assert!((bpm - 60.0).abs() < 1.0, "mean HR {bpm}");

    // 256 s epochs stride 32 s, so most 16 s rows have no value there
    let sparse = hr_header
        .iter()
        .position(|c| c == "EPOCH_256_WELCH_64_HR_mean")
        .expect("sparse column");
    assert_eq!(hr_rows[1][sparse], "");

    assert!(output_dir.join("synthetic_run.json").exists());
}

#[test]
fn test_parallel_run_matches_sequential() {
    let dir = test_dir();
    let input = dir.join("parallel.edf");
    write_recording(&input, 300);
    let grid = SweepGrid::new(vec![16, 32, 64], vec![1, 2, 4]);

    let sequential = run(
        config(grid.clone(), SweepGrid::ecg_default()),
        &input,
        &dir.join("seq"),
        SignalSelection::Eeg,
    );
    let mut parallel_config = config(grid, SweepGrid::ecg_default());
    parallel_config.workers = 4;
    let parallel = run(parallel_config, &input, &dir.join("par"), SignalSelection::Eeg);

    let a = std::fs::read_to_string(&sequential.signals[0].output).unwrap();
    let b = std::fs::read_to_string(&parallel.signals[0].output).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_missing_channel_fails_without_output() {
    let dir = test_dir();
    let input = dir.join("channels.edf");
    write_recording(&input, 64);
    let output_dir = dir.join("out");

    let request = RunRequest {
        input,
        output_dir: output_dir.clone(),
        eeg_channel: "EEG_Fpz".to_string(),
        signals: SignalSelection::Eeg,
        ..RunRequest::default()
    };
    let result = Pipeline::new(Config::default(), EdfReader::new(), SpectralFeatureExtractor::new())
        .run(&request);

    assert!(matches!(result, Err(Error::Input(_))));
    assert!(!output_dir.exists());
}
