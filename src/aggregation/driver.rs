use std::cmp::Reverse;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use super::task::{SliceTask, TaskContext, TaskOutcome, isolate};
use super::types::Slice;
use crate::corpus::TripFile;
use crate::tasklog::TaskLog;

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} tasks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Runs every (file, slice) task on the global rayon pool and returns the
/// outcomes together with the wall time in seconds.
///
/// Each file is loaded once; its 48 slice tasks run on forks of the loaded
/// dataset. A load fault is reported by every slice task of that file. Every
/// outcome is written to `log` as soon as it is known.
pub fn run_batch(
    files: &[Arc<TripFile>],
    ctx: &TaskContext,
    log: &TaskLog,
) -> (Vec<TaskOutcome>, f64) {
    run_batch_in_waves(files, ctx, log, rayon::current_num_threads())
}

/// [`run_batch`] with at most `width` files loaded at a time. Files are taken
/// in waves; a wave's files run concurrently and the next wave starts once
/// all of them are done.
pub fn run_batch_in_waves(
    files: &[Arc<TripFile>],
    ctx: &TaskContext,
    log: &TaskLog,
    width: usize,
) -> (Vec<TaskOutcome>, f64) {
    let t0 = Instant::now();

    // big files first so the tail of the run is short
    let mut files: Vec<(Arc<TripFile>, u64)> = files
        .iter()
        .map(|f| {
            let weight = fs::metadata(&f.path).map(|m| m.len()).unwrap_or(0);
            (Arc::clone(f), weight)
        })
        .collect();
    files.sort_by_key(|(_, weight)| Reverse(*weight));

    let slices: Vec<Slice> = Slice::all().collect();
    let pb = progress_bar((files.len() * slices.len()) as u64);

    let mut outcomes = Vec::with_capacity(files.len() * slices.len());
    for wave in files.chunks(width.max(1)) {
        let done: Vec<TaskOutcome> = wave
            .par_iter()
            .flat_map(|(file, _)| run_file(file, &slices, ctx, log, &pb))
            .collect();
        outcomes.extend(done);
    }

    pb.finish_and_clear();
    (outcomes, t0.elapsed().as_secs_f64())
}

fn run_file(
    file: &Arc<TripFile>,
    slices: &[Slice],
    ctx: &TaskContext,
    log: &TaskLog,
    pb: &ProgressBar,
) -> Vec<TaskOutcome> {
    let t_load0 = Instant::now();
    let loaded = isolate(|| ctx.load(file));
    if let Ok(ds) = &loaded {
        log::debug!(
            "[load] {} rows={} in {:.3}s",
            file.label(),
            ds.len(),
            t_load0.elapsed().as_secs_f64()
        );
    }
    pb.set_message(file.label());

    slices
        .par_iter()
        .map(|&slice| {
            let task = SliceTask::new(Arc::clone(file), slice);
            let outcome = match &loaded {
                Ok(ds) => task.execute_on(ds, ctx),
                Err(fault) => task.fail_in(ctx, fault.clone()),
            };
            log.record(&outcome);
            pb.inc(1);
            outcome
        })
        .collect()
}
