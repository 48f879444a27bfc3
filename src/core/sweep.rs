//! Parameter sweep over epoch and Welch window sizes.
//!
//! One sweep runs every `(epoch, welch)` pair of a [`SweepGrid`] over a
//! single signal, namespaces each resulting table, and merges them into one
//! wide [`MergedFeatureTable`]. Iterations only read the signal, so they may
//! run on a pool of worker threads; results are always merged in grid order
//! regardless of which worker finished first.

use crate::core::features::FeatureExtractor;
use crate::core::signal::{Signal, SignalType};
use crate::core::table::{merge, namespace_columns, MergedFeatureTable, NamespacedFeatureTable};
use crate::core::windowing::{derive_step_size, window, WindowSpec};
use crate::error::{ConfigError, Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Epoch and Welch sizes, in seconds, swept as a cartesian product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub epoch_sizes: Vec<u32>,
    pub welch_sizes: Vec<u32>,
}

impl SweepGrid {
    pub fn new(epoch_sizes: Vec<u32>, welch_sizes: Vec<u32>) -> Self {
        Self {
            epoch_sizes,
            welch_sizes,
        }
    }

    /// Default grid for EEG sweeps.
    pub fn eeg_default() -> Self {
        Self::new(vec![16, 32, 64, 128, 256], vec![1, 2, 4, 8, 16])
    }

    /// Default grid for heart-rate sweeps.
    pub fn ecg_default() -> Self {
        Self::new(vec![128, 256, 512], vec![64, 128, 256, 512])
    }

    /// Reject grids that cannot produce a well-formed sweep.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.epoch_sizes.is_empty() {
            return Err(ConfigError::InvalidGrid("no epoch sizes".to_string()));
        }
        if self.welch_sizes.is_empty() {
            return Err(ConfigError::InvalidGrid("no welch sizes".to_string()));
        }
        for (what, sizes) in [("epoch", &self.epoch_sizes), ("welch", &self.welch_sizes)] {
            if sizes.contains(&0) {
                return Err(ConfigError::InvalidGrid(format!("{what} size 0")));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = sizes.iter().find(|s| !seen.insert(**s)) {
                return Err(ConfigError::InvalidGrid(format!(
                    "duplicate {what} size {dup}"
                )));
            }
        }

        let largest_epoch = self.epoch_sizes.iter().copied().max().unwrap_or(0);
        for &welch in &self.welch_sizes {
            if welch > largest_epoch {
                return Err(ConfigError::InvalidWindowSpec {
                    epoch_size_sec: largest_epoch,
                    welch_window_sec: welch,
                    step_size_sec: derive_step_size(largest_epoch),
                    reason: "welch window exceeds every epoch size".to_string(),
                });
            }
        }
        self.specs().iter().try_for_each(WindowSpec::validate)
    }

    /// Window specs in sweep order: epoch sizes outer, Welch sizes inner.
    ///
    /// Pairs whose Welch window is longer than the epoch are skipped.
    pub fn specs(&self) -> Vec<WindowSpec> {
        self.epoch_sizes
            .iter()
            .flat_map(|&epoch| {
                self.welch_sizes
                    .iter()
                    .filter(move |&&welch| welch <= epoch)
                    .map(move |&welch| WindowSpec::new(epoch, welch))
            })
            .collect()
    }

    /// Pairs left out of [`specs`](Self::specs) because the Welch window is
    /// longer than the epoch, in grid order.
    pub fn skipped_specs(&self) -> Vec<WindowSpec> {
        self.epoch_sizes
            .iter()
            .flat_map(|&epoch| {
                self.welch_sizes
                    .iter()
                    .filter(move |&&welch| welch > epoch)
                    .map(move |&welch| WindowSpec::new(epoch, welch))
            })
            .collect()
    }

    /// Nominal run time of the whole sweep in minutes.
    pub fn expected_minutes(&self, signal_type: SignalType) -> f64 {
        self.specs().len() as f64 * signal_type.nominal_minutes_per_iteration()
    }
}

/// Execution options for [`run_sweep`].
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Worker threads; 0 or 1 runs the iterations inline
    pub workers: usize,
    /// Checked before each iteration; when set the sweep stops with [`Error::Cancelled`]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            cancel: None,
        }
    }
}

impl SweepOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Emitted after every completed iteration.
#[derive(Debug, Clone)]
pub struct SweepProgress {
    pub signal_type: SignalType,
    /// Spec of the iteration that just finished
    pub spec: WindowSpec,
    pub completed: usize,
    pub total: usize,
    /// Rows produced by the finished iteration
    pub rows: usize,
    pub iteration_elapsed: Duration,
    pub total_elapsed: Duration,
}

impl SweepProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    /// Remaining iterations times the mean time per completed iteration.
    pub fn eta(&self) -> Duration {
        if self.completed == 0 {
            return Duration::ZERO;
        }
        let remaining = self.total.saturating_sub(self.completed) as u32;
        self.total_elapsed / self.completed as u32 * remaining
    }
}

/// Result of a complete sweep.
#[derive(Debug, Clone)]
pub struct SweepOutput {
    pub signal_type: SignalType,
    pub table: MergedFeatureTable,
    /// Iterations run
    pub iterations: usize,
    /// Specs whose epoch was longer than the signal
    pub empty_specs: Vec<WindowSpec>,
    /// Grid pairs not run because the Welch window exceeds the epoch
    pub skipped_specs: Vec<WindowSpec>,
    pub elapsed: Duration,
}

struct Completed {
    index: usize,
    table: NamespacedFeatureTable,
    elapsed: Duration,
}

fn run_iteration(
    index: usize,
    spec: WindowSpec,
    signal: &Signal,
    signal_type: SignalType,
    extractor: &dyn FeatureExtractor,
) -> Result<Completed> {
    let started = Instant::now();
    let table = window(signal, signal_type, &spec, extractor)?;
    Ok(Completed {
        index,
        table: namespace_columns(table, spec, signal_type),
        elapsed: started.elapsed(),
    })
}

/// Run every spec of `grid` over `signal` and merge the results.
///
/// `on_progress` is called on the calling thread after each iteration, in
/// completion order. The first failing iteration aborts the sweep.
pub fn run_sweep<F>(
    signal: &Signal,
    signal_type: SignalType,
    grid: &SweepGrid,
    extractor: &dyn FeatureExtractor,
    options: &SweepOptions,
    mut on_progress: F,
) -> Result<SweepOutput>
where
    F: FnMut(&SweepProgress),
{
    grid.validate()?;
    let specs = grid.specs();
    for spec in &specs {
        spec.validate_for_rate(signal.sample_rate())?;
    }
    let skipped_specs = grid.skipped_specs();
    for spec in &skipped_specs {
        warn!(signal = %signal_type, %spec, "Welch window exceeds epoch, pair skipped");
    }

    let total = specs.len();
    let started = Instant::now();
    let mut slots: Vec<Option<NamespacedFeatureTable>> = vec![None; total];
    let mut completed = 0;

    info!(
        signal = %signal_type,
        iterations = total,
        workers = options.workers.max(1),
        "Starting sweep"
    );

    let mut record = |done: Completed| {
        completed += 1;
        let spec = specs[done.index];
        let rows = done.table.len();
        if rows == 0 {
            warn!(signal = %signal_type, %spec, "Signal shorter than epoch, no windows produced");
        }
        debug!(signal = %signal_type, %spec, rows, elapsed = ?done.elapsed, "Iteration complete");
        on_progress(&SweepProgress {
            signal_type,
            spec,
            completed,
            total,
            rows,
            iteration_elapsed: done.elapsed,
            total_elapsed: started.elapsed(),
        });
        slots[done.index] = Some(done.table);
    };

    if options.workers <= 1 {
        for (index, &spec) in specs.iter().enumerate() {
            if options.is_cancelled() {
                return Err(Error::Cancelled);
            }
            record(run_iteration(index, spec, signal, signal_type, extractor)?);
        }
    } else {
        run_parallel(&specs, signal, signal_type, extractor, options, &mut record)?;
    }

    let tables: Vec<NamespacedFeatureTable> = slots.into_iter().flatten().collect();
    let empty_specs = tables
        .iter()
        .filter(|t| t.is_empty())
        .map(|t| t.spec)
        .collect();
    let table = merge(&tables)?;

    info!(
        signal = %signal_type,
        rows = table.row_count(),
        columns = table.column_count(),
        elapsed = ?started.elapsed(),
        "Sweep complete"
    );

    Ok(SweepOutput {
        signal_type,
        table,
        iterations: total,
        empty_specs,
        skipped_specs,
        elapsed: started.elapsed(),
    })
}

/// Fan iterations out to scoped workers fed from a job queue.
fn run_parallel(
    specs: &[WindowSpec],
    signal: &Signal,
    signal_type: SignalType,
    extractor: &dyn FeatureExtractor,
    options: &SweepOptions,
    record: &mut dyn FnMut(Completed),
) -> Result<()> {
    let (job_tx, job_rx): (Sender<(usize, WindowSpec)>, Receiver<(usize, WindowSpec)>) =
        unbounded();
    let (result_tx, result_rx) = unbounded::<Result<Completed>>();
    for job in specs.iter().copied().enumerate() {
        // Receiver is alive until the scope below ends
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let abort = AtomicBool::new(false);
    let workers = options.workers.min(specs.len()).max(1);

    thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let abort = &abort;
            scope.spawn(move || {
                for (index, spec) in job_rx.iter() {
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }
                    if options.is_cancelled() {
                        let _ = result_tx.send(Err(Error::Cancelled));
                        break;
                    }
                    debug!(worker, %spec, "Worker picked up iteration");
                    let outcome = run_iteration(index, spec, signal, signal_type, extractor);
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut first_error = None;
        for outcome in result_rx.iter() {
            match outcome {
                Ok(done) if first_error.is_none() => record(done),
                Ok(_) => {}
                Err(e) => {
                    abort.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}
