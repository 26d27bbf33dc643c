use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use tripmatrix::aggregation::{Aggregator, MatrixAxes, TaskOutcome, run_batch, write_result};
use tripmatrix::config::{Cli, OutputMode, RunConfig};
use tripmatrix::corpus::{CorpusSource, LocalCorpus, TripFile};
use tripmatrix::runtime;
use tripmatrix::tasklog::TaskLog;
use tripmatrix::zones::ZoneCatalog;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = RunConfig::from_cli(Cli::parse())?;
    runtime::configure_thread_pool(cfg.threads);

    // the only fatal input: without regions no task can run
    let catalog = ZoneCatalog::from_path(&cfg.zone_file)
        .with_context(|| format!("load zone lookup {}", cfg.zone_file.display()))?;
    log::info!(
        "[catalog] {} zones in {} regions from {}",
        catalog.n_zones(),
        catalog.regions().count(),
        cfg.zone_file.display()
    );

    let corpus = LocalCorpus::new(&cfg.zone_file).fetch_corpus(&cfg.source_dir)?;
    let found = corpus.trip_files.len();
    let files: Vec<Arc<TripFile>> = corpus
        .trip_files
        .into_iter()
        .map(TripFile::new)
        .filter(|f| cfg.period.matches(f))
        .map(Arc::new)
        .collect();
    log::info!(
        "[corpus] {} of {} trip files selected in {}",
        files.len(),
        found,
        cfg.source_dir.display()
    );

    for dir in cfg.output_dirs() {
        std::fs::create_dir_all(&dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    let axes = cfg.axes(&catalog).unwrap_or_else(|err| {
        // every task will fail with the same error; outputs fall back to observed zones
        log::warn!("[axes] {err}");
        MatrixAxes::observed()
    });
    let ctx = cfg.task_context(Arc::new(catalog), axes.clone());

    let log_path = cfg.task_log_path(chrono::Utc::now().timestamp());
    let task_log = TaskLog::create(&log_path)?;
    let (outcomes, wall) = run_batch(&files, &ctx, &task_log);
    task_log.close()?;

    let total = outcomes.len();
    let failed = match cfg.mode {
        OutputMode::PerFile => outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Failed(_)))
            .count(),
        OutputMode::Aggregate => {
            let mut agg = Aggregator::new();
            agg.extend(outcomes);
            let report = agg.finish(&axes);
            let label = cfg.output_label();
            let sink = cfg.sink();
            for s in &report.slices {
                write_result(&sink, &s.result, &label, s.slice)
                    .with_context(|| format!("write {label}-{} matrices", s.slice))?;
                log::debug!(
                    "[slice {}] files={} failed={} defined={}",
                    s.slice,
                    s.totals.contributing_files,
                    s.totals.failed_files,
                    s.result.n_defined()
                );
            }
            log::info!("[aggregate] {} slices written as '{label}'", report.slices.len());
            report.failures.len()
        }
    };

    log::info!(
        "[done] tasks={} failed={} wall={:.3}s log={}",
        total,
        failed,
        wall,
        log_path.display()
    );
    Ok(())
}
