use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use super::io::{MatrixSink, write_result};
use super::metrics::partial_from_view;
use super::types::{DayClass, MatrixAxes, PartialMatrix, ResultMatrix, Slice};
use crate::corpus::TripFile;
use crate::error::{ErrorKind, TripError};
use crate::trips::{CleaningRules, FilterPipeline, TripDataset, TripFilter, TripSource, ZoneSelector};
use crate::zones::ZoneCatalog;

/// Everything a slice task needs besides its own descriptor. Built once and
/// shared read-only by all tasks.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub catalog: Arc<ZoneCatalog>,
    pub cleaning: CleaningRules,
    pub pickup: Option<ZoneSelector>,
    pub dropoff: Option<ZoneSelector>,
    pub min_demand: Option<usize>,
    pub axes: MatrixAxes,
    /// set in per-file mode: each task writes its own matrices
    pub sink: Option<MatrixSink>,
}

impl TaskContext {
    pub fn new(catalog: Arc<ZoneCatalog>) -> Self {
        TaskContext {
            catalog,
            cleaning: CleaningRules::default(),
            pickup: None,
            dropoff: None,
            min_demand: None,
            axes: MatrixAxes::observed(),
            sink: None,
        }
    }

    pub fn pipeline(&self, slice: Slice) -> FilterPipeline {
        let mut p = FilterPipeline::new()
            .then(TripFilter::by_pickup_hour(slice.hour, slice.hour + 1))
            .then(TripFilter::by_weekday(slice.class.is_weekend()));
        if let Some(sel) = &self.pickup {
            p = p.then(TripFilter::by_pickup_region(sel.clone()));
        }
        if let Some(sel) = &self.dropoff {
            p = p.then(TripFilter::by_dropoff_region(sel.clone()));
        }
        if let Some(threshold) = self.min_demand {
            p = p.then(TripFilter::by_minimum_demand(threshold));
        }
        p
    }

    pub fn load(&self, file: &TripFile) -> Result<TripDataset, TripError> {
        TripDataset::load_with(
            TripSource::FilePath(file.path.clone()),
            Some(Arc::clone(&self.catalog)),
            &self.cleaning,
        )
    }
}

/// One (file, weekday-class, hour) unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceTask {
    pub file: Arc<TripFile>,
    pub slice: Slice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub file: PathBuf,
    pub label: String,
    pub slice: Slice,
    pub kind: ErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        task: SliceTask,
        partial: PartialMatrix,
    },
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub fn slice(&self) -> Slice {
        match self {
            TaskOutcome::Completed { task, .. } => task.slice,
            TaskOutcome::Failed(f) => f.slice,
        }
    }

    /// A failed task contributes nothing, i.e. an all-zero matrix.
    pub fn partial(&self) -> Option<&PartialMatrix> {
        match self {
            TaskOutcome::Completed { partial, .. } => Some(partial),
            TaskOutcome::Failed(_) => None,
        }
    }
}

/// A task-local fault: a typed error or a caught panic.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<TripError> for Fault {
    fn from(err: TripError) -> Self {
        Fault {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Runs `f`, turning both errors and panics into a [`Fault`].
pub fn isolate<T>(f: impl FnOnce() -> Result<T, TripError>) -> Result<T, Fault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(Fault::from),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic with non-string payload".to_string());
            Err(Fault {
                kind: ErrorKind::Panic,
                detail,
            })
        }
    }
}

impl SliceTask {
    pub fn new(file: Arc<TripFile>, slice: Slice) -> Self {
        SliceTask { file, slice }
    }

    pub fn weekday(file: Arc<TripFile>, hour: u32) -> Self {
        SliceTask::new(file, Slice::new(DayClass::Weekday, hour))
    }

    /// Loads the file itself, then runs the slice.
    pub fn execute(&self, ctx: &TaskContext) -> TaskOutcome {
        match isolate(|| ctx.load(&self.file)) {
            Ok(ds) => self.execute_on(&ds, ctx),
            Err(fault) => self.fail_in(ctx, fault),
        }
    }

    /// Runs the slice on a private fork of an already loaded file.
    pub fn execute_on(&self, loaded: &TripDataset, ctx: &TaskContext) -> TaskOutcome {
        let result = isolate(|| {
            let mut ds = loaded.fork();
            ds.apply_pipeline(&ctx.pipeline(self.slice))?;
            let partial = partial_from_view(ds.current_view());
            if let Some(sink) = &ctx.sink {
                let token = self.file.token()?;
                let result = ResultMatrix::from_partial(&partial, &ctx.axes);
                write_result(sink, &result, token, self.slice)?;
            }
            Ok(partial)
        });
        match result {
            Ok(partial) => TaskOutcome::Completed {
                task: self.clone(),
                partial,
            },
            Err(fault) => self.fail_in(ctx, fault),
        }
    }

    /// Like [`SliceTask::fail`], but in per-file mode the slice still gets
    /// its matrices, with every cell undefined.
    pub fn fail_in(&self, ctx: &TaskContext, fault: Fault) -> TaskOutcome {
        if let (Some(sink), Ok(token)) = (&ctx.sink, self.file.token()) {
            let empty = ResultMatrix::from_partial(&PartialMatrix::new(), &ctx.axes);
            if let Err(err) = write_result(sink, &empty, token, self.slice) {
                log::warn!(
                    "[task] {}-{} cannot write empty matrices: {err}",
                    self.file.label(),
                    self.slice
                );
            }
        }
        self.fail(fault)
    }

    pub fn fail(&self, fault: Fault) -> TaskOutcome {
        TaskOutcome::Failed(TaskFailure {
            file: self.file.path.clone(),
            label: self.file.label(),
            slice: self.slice,
            kind: fault.kind,
            detail: fault.detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::io::{MatrixFormat, read_matrix_csv};
    use crate::aggregation::types::Axis;
    use crate::trips::dataset::tests::write_trip_csv;
    use crate::zones::tests::sample_catalog;

    fn ctx() -> TaskContext {
        TaskContext::new(Arc::new(sample_catalog()))
    }

    #[test]
    fn test_weekday_hour_scenario() {
        let file = write_trip_csv(&[
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1,1.2,10,20",
            "2,2019-01-08 08:30:00,2019-01-08 08:35:00,1,1.2,10,20",
            "2,2019-01-08 09:30:00,2019-01-08 09:35:00,1,1.2,10,20",
            "2,2019-01-12 08:30:00,2019-01-12 08:35:00,1,1.2,10,20",
        ]);
        let task = SliceTask::weekday(Arc::new(TripFile::new(file.path())), 8);
        let out = task.execute(&ctx());
        let partial = out.partial().expect("task should complete");
        let stats = partial.get(10, 20);
        assert_eq!((stats.days, stats.trips), (2, 2));
        assert_eq!(stats.duration_sum, 600.0);
        assert_eq!(stats.aam(), 3600.0);
        assert_eq!(stats.atm(), 300.0);
    }

    #[test]
    fn test_bad_record_becomes_failure() {
        let file = write_trip_csv(&[
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1,1.2,10,20",
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1.2,10,20",
        ]);
        let task = SliceTask::weekday(Arc::new(TripFile::new(file.path())), 8);
        match task.execute(&ctx()) {
            TaskOutcome::Failed(f) => {
                assert_eq!(f.kind, ErrorKind::BadRecord);
                assert_eq!(f.slice, Slice::new(DayClass::Weekday, 8));
                assert!(f.detail.contains("2,2019-01-07 08:05:00,2019-01-07 08:10:00,1.2,10,20"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_and_unknown_region_fail() {
        let task = SliceTask::weekday(Arc::new(TripFile::new("/no/such/yellow_tripdata_2019-01.csv")), 8);
        let out = task.execute(&ctx());
        assert!(matches!(out, TaskOutcome::Failed(TaskFailure { kind: ErrorKind::Io, .. })));

        let file = write_trip_csv(&["2,2019-01-07 08:05:00,2019-01-07 08:10:00,1,1.2,10,20"]);
        let mut c = ctx();
        c.pickup = Some(ZoneSelector::Region("Atlantis".into()));
        let task = SliceTask::weekday(Arc::new(TripFile::new(file.path())), 8);
        let out = task.execute(&c);
        assert!(matches!(out, TaskOutcome::Failed(TaskFailure { kind: ErrorKind::UnknownRegion, .. })));
        assert!(out.partial().is_none());
    }

    #[test]
    fn test_per_file_failure_still_writes_matrices() {
        let bad = write_trip_csv(&[
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1,1.2,10,20",
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1.2,10,20",
        ]);
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("yellow_tripdata_2019-01.csv");
        std::fs::copy(bad.path(), &raw).unwrap();

        let sink = MatrixSink::under(dir.path(), MatrixFormat::Csv);
        for d in sink.dirs() {
            std::fs::create_dir_all(d).unwrap();
        }
        let mut c = ctx();
        c.axes = MatrixAxes {
            pickups: Axis::Fixed(vec![4, 10, 20]),
            dropoffs: Axis::Fixed(vec![4, 10, 20]),
        };
        c.sink = Some(sink);

        let out = SliceTask::weekday(Arc::new(TripFile::new(&raw)), 8).execute(&c);
        assert!(matches!(out, TaskOutcome::Failed(TaskFailure { kind: ErrorKind::BadRecord, .. })));

        let aam = dir.path().join("aam").join("aam-2019-01-wd-8.csv");
        let atm = dir.path().join("atm").join("atm-2019-01-wd-8.csv");
        assert!(atm.is_file());
        let back = read_matrix_csv(&aam).unwrap();
        assert_eq!(back.rows, vec![4, 10, 20]);
        assert_eq!(back.values.dim(), (3, 3));
        assert!(back.values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_isolate_catches_panics() {
        let fault = isolate::<()>(|| panic!("boom")).unwrap_err();
        assert_eq!(fault.kind, ErrorKind::Panic);
        assert_eq!(fault.detail, "boom");
    }

    #[test]
    fn test_pipeline_order() {
        let mut c = ctx();
        c.pickup = Some(ZoneSelector::Region("Manhattan".into()));
        c.min_demand = Some(100);
        let p = c.pipeline(Slice::new(DayClass::Weekend, 23));
        let steps = p.steps();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], TripFilter::by_pickup_hour(23, 24));
        assert_eq!(steps[1], TripFilter::by_weekday(true));
        assert_eq!(steps[3], TripFilter::by_minimum_demand(100));
    }
}
