use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;

use crate::aggregation::{Axis, MatrixAxes, MatrixFormat, MatrixSink, TaskContext};
use crate::corpus::PeriodFilter;
use crate::error::TripError;
use crate::trips::{CleaningRules, ZoneSelector};
use crate::zones::ZoneCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    /// one matrix pair per slice for the whole corpus
    #[default]
    Aggregate,
    /// one matrix pair per (file, slice), written by the task itself
    PerFile,
}

/// Arrival-interval (AAM) and travel-time (ATM) matrices from taxi trip files,
/// one pair per weekday-class and pickup hour.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// directory holding the raw monthly trip CSV files
    #[arg(long)]
    pub source_dir: PathBuf,

    /// zone lookup CSV with LocationID and Borough columns. defaults to
    /// `taxi+_zone_lookup.csv` inside the source directory.
    #[arg(long)]
    pub zone_file: Option<PathBuf>,

    /// AAM matrices go to `<out>/aam`, ATM to `<out>/atm`, npz to `<out>/npz`
    #[arg(long, default_value = "out")]
    pub out_dir: PathBuf,

    /// where the task log is appended. defaults to `<out>/logs`
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// worker threads; falls back to environment hints, then the core count
    #[arg(long)]
    pub threads: Option<usize>,

    /// only process files whose name carries this year
    #[arg(long)]
    pub year: Option<u16>,

    /// only process files whose name carries this month (1-12)
    #[arg(long)]
    pub month: Option<u8>,

    /// region applied to both pickup and dropoff zones
    #[arg(long, default_value = "Manhattan")]
    pub region: String,

    /// pickup region or zone id, overrides --region for pickups
    #[arg(long)]
    pub pickup_region: Option<String>,

    /// dropoff region or zone id, overrides --region for dropoffs
    #[arg(long)]
    pub dropoff_region: Option<String>,

    /// keep trips from every zone
    #[arg(long, conflicts_with_all = ["pickup_region", "dropoff_region"])]
    pub no_region_filter: bool,

    /// drop trips from pickup zones with at most this many trips in a slice
    #[arg(long)]
    pub min_demand: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputMode::Aggregate)]
    pub mode: OutputMode,

    #[arg(long, value_enum, default_value_t = MatrixFormat::Csv)]
    pub format: MatrixFormat,

    /// output token in aggregate mode. defaults to the year filter, or `all`
    #[arg(long)]
    pub label: Option<String>,
}

pub const DEFAULT_ZONE_FILE: &str = "taxi+_zone_lookup.csv";

/// Validated run settings; everything a task reads comes from here.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_dir: PathBuf,
    pub zone_file: PathBuf,
    pub out_dir: PathBuf,
    pub log_dir: PathBuf,
    pub threads: Option<usize>,
    pub period: PeriodFilter,
    pub pickup: Option<ZoneSelector>,
    pub dropoff: Option<ZoneSelector>,
    pub min_demand: Option<usize>,
    pub cleaning: CleaningRules,
    pub mode: OutputMode,
    pub format: MatrixFormat,
    pub label: Option<String>,
}

fn selector(raw: &str) -> ZoneSelector {
    match raw.parse() {
        Ok(sel) => sel,
        Err(never) => match never {},
    }
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.threads == Some(0) {
            bail!("--threads must be positive");
        }
        if let Some(month) = cli.month {
            if !(1..=12).contains(&month) {
                bail!("--month must be in 1..=12, got {month}");
            }
        }
        if let Some(label) = &cli.label {
            if label.is_empty() || label.contains(['/', '\\']) {
                bail!("--label '{label}' cannot be used in a file name");
            }
        }
        if !cli.source_dir.is_dir() {
            bail!("source dir {} does not exist", cli.source_dir.display());
        }

        let (pickup, dropoff) = if cli.no_region_filter {
            (None, None)
        } else {
            let pickup = cli.pickup_region.as_deref().unwrap_or(&cli.region);
            let dropoff = cli.dropoff_region.as_deref().unwrap_or(&cli.region);
            (Some(selector(pickup)), Some(selector(dropoff)))
        };

        let zone_file = cli
            .zone_file
            .unwrap_or_else(|| cli.source_dir.join(DEFAULT_ZONE_FILE));
        let log_dir = cli.log_dir.unwrap_or_else(|| cli.out_dir.join("logs"));

        Ok(RunConfig {
            source_dir: cli.source_dir,
            zone_file,
            out_dir: cli.out_dir,
            log_dir,
            threads: cli.threads,
            period: PeriodFilter {
                year: cli.year,
                month: cli.month,
            },
            pickup,
            dropoff,
            min_demand: cli.min_demand,
            cleaning: CleaningRules::default(),
            mode: cli.mode,
            format: cli.format,
            label: cli.label,
        })
    }

    /// `--label`, else the year filter, else `all`.
    pub fn output_label(&self) -> String {
        match (&self.label, self.period.year) {
            (Some(label), _) => label.clone(),
            (None, Some(year)) => year.to_string(),
            (None, None) => "all".to_string(),
        }
    }

    pub fn sink(&self) -> MatrixSink {
        MatrixSink::under(&self.out_dir, self.format)
    }

    pub fn task_log_path(&self, started_at: i64) -> PathBuf {
        self.log_dir.join(format!("process-{started_at}.log"))
    }

    pub fn output_dirs(&self) -> Vec<PathBuf> {
        let sink = self.sink();
        let mut dirs: Vec<PathBuf> = sink.dirs().into_iter().map(Path::to_path_buf).collect();
        dirs.push(self.log_dir.clone());
        dirs
    }

    /// Row and column labels of every output matrix.
    pub fn axes(&self, catalog: &ZoneCatalog) -> Result<MatrixAxes, TripError> {
        Ok(MatrixAxes {
            pickups: axis_for(self.pickup.as_ref(), catalog)?,
            dropoffs: axis_for(self.dropoff.as_ref(), catalog)?,
        })
    }

    pub fn task_context(&self, catalog: Arc<ZoneCatalog>, axes: MatrixAxes) -> TaskContext {
        TaskContext {
            catalog,
            cleaning: self.cleaning,
            pickup: self.pickup.clone(),
            dropoff: self.dropoff.clone(),
            min_demand: self.min_demand,
            axes,
            sink: match self.mode {
                OutputMode::PerFile => Some(self.sink()),
                OutputMode::Aggregate => None,
            },
        }
    }
}

fn axis_for(sel: Option<&ZoneSelector>, catalog: &ZoneCatalog) -> Result<Axis, TripError> {
    Ok(match sel {
        None => Axis::Observed,
        Some(ZoneSelector::Zone(id)) => Axis::Fixed(vec![*id]),
        Some(ZoneSelector::Region(name)) => {
            Axis::Fixed(catalog.zones_in(name)?.iter().copied().collect())
        }
    })
}
