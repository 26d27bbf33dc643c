use std::collections::BTreeMap;

use super::task::{TaskFailure, TaskOutcome};
use super::types::{MatrixAxes, PartialMatrix, ResultMatrix, Slice};

/// Running per-slice totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceTotals {
    pub partial: PartialMatrix,
    pub contributing_files: usize,
    pub failed_files: usize,
}

/// Single-threaded reduction of task outcomes into one partial per slice.
/// Every slice exists from the start, so a slice whose tasks all failed
/// still finalizes (to an all-NaN matrix on fixed axes).
#[derive(Debug, Clone)]
pub struct Aggregator {
    slices: BTreeMap<Slice, SliceTotals>,
    failures: Vec<TaskFailure>,
}

#[derive(Debug, Clone)]
pub struct SliceReport {
    pub slice: Slice,
    pub result: ResultMatrix,
    pub totals: SliceTotals,
}

#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub slices: Vec<SliceReport>,
    pub failures: Vec<TaskFailure>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator {
            slices: Slice::all().map(|s| (s, SliceTotals::default())).collect(),
            failures: Vec::new(),
        }
    }

    pub fn absorb(&mut self, outcome: TaskOutcome) {
        let totals = self.slices.entry(outcome.slice()).or_default();
        match outcome {
            TaskOutcome::Completed { partial, .. } => {
                totals.partial.merge(&partial);
                totals.contributing_files += 1;
            }
            TaskOutcome::Failed(failure) => {
                totals.failed_files += 1;
                self.failures.push(failure);
            }
        }
    }

    pub fn totals(&self, slice: Slice) -> Option<&SliceTotals> {
        self.slices.get(&slice)
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Divides once per slice, after every contribution is in.
    pub fn finish(self, axes: &MatrixAxes) -> AggregateReport {
        let slices = self
            .slices
            .into_iter()
            .map(|(slice, totals)| SliceReport {
                slice,
                result: ResultMatrix::from_partial(&totals.partial, axes),
                totals,
            })
            .collect();
        AggregateReport {
            slices,
            failures: self.failures,
        }
    }
}

impl Extend<TaskOutcome> for Aggregator {
    fn extend<I: IntoIterator<Item = TaskOutcome>>(&mut self, iter: I) {
        for outcome in iter {
            self.absorb(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::aggregation::metrics::partial_from_view;
    use crate::aggregation::task::{SliceTask, TaskContext};
    use crate::aggregation::types::{Axis, DayClass};
    use crate::corpus::TripFile;
    use crate::trips::TripRecord;
    use crate::trips::dataset::tests::{trip, write_trip_csv};
    use crate::zones::tests::sample_catalog;

    fn completed(file: &str, slice: Slice, partial: PartialMatrix) -> TaskOutcome {
        TaskOutcome::Completed {
            task: SliceTask::new(Arc::new(TripFile::new(file)), slice),
            partial,
        }
    }

    #[test]
    fn test_every_slice_finalizes() {
        let axes = MatrixAxes {
            pickups: Axis::Fixed(vec![4, 10]),
            dropoffs: Axis::Fixed(vec![20]),
        };
        let report = Aggregator::new().finish(&axes);
        assert_eq!(report.slices.len(), Slice::COUNT);
        assert!(report.slices.iter().all(|s| s.result.aam.dim() == (2, 1)));
        assert!(report.slices.iter().all(|s| s.result.n_defined() == 0));
    }

    #[test]
    fn test_ratio_of_sums() {
        let slice = Slice::new(DayClass::Weekday, 8);
        // file a: 1 day, 1 trip of 100 s; file b: 1 day, 3 trips totalling 900 s
        let a = partial_from_view(&[trip(10, 20, "2019-01-07 08:05:00", 100)]);
        let b = partial_from_view(&[
            trip(10, 20, "2019-02-04 08:05:00", 300),
            trip(10, 20, "2019-02-04 08:15:00", 300),
            trip(10, 20, "2019-02-04 08:25:00", 300),
        ]);
        let mut agg = Aggregator::new();
        agg.absorb(completed("yellow_tripdata_2019-01.csv", slice, a));
        agg.absorb(completed("yellow_tripdata_2019-02.csv", slice, b));
        let report = agg.finish(&MatrixAxes::observed());
        let r = &report.slices.iter().find(|s| s.slice == slice).unwrap().result;
        // 3600 * 2 / 4, not mean(3600, 1200)
        assert_eq!(r.aam[[0, 0]], 1800.0);
        assert_eq!(r.atm[[0, 0]], 250.0);
    }

    #[test]
    fn test_bad_file_does_not_affect_others() {
        let good = write_trip_csv(&[
            "2,2019-01-07 08:05:00,2019-01-07 08:10:00,1,1.2,10,20",
            "2,2019-01-08 08:30:00,2019-01-08 08:35:00,1,1.2,10,20",
        ]);
        let bad = write_trip_csv(&[
            "2,2019-01-09 08:05:00,2019-01-09 08:10:00,1,1.2,10,20",
            "2,2019-01-09 08:05:00,2019-01-09 08:10:00,1.2,10,20",
        ]);
        let ctx = TaskContext::new(Arc::new(sample_catalog()));
        let slice = Slice::new(DayClass::Weekday, 8);

        let mut with_bad = Aggregator::new();
        let mut alone = Aggregator::new();
        let good_out = SliceTask::new(Arc::new(TripFile::new(good.path())), slice).execute(&ctx);
        let bad_out = SliceTask::new(Arc::new(TripFile::new(bad.path())), slice).execute(&ctx);
        alone.absorb(good_out.clone());
        with_bad.absorb(good_out);
        with_bad.absorb(bad_out);

        assert_eq!(with_bad.failures().len(), 1);
        assert_eq!(with_bad.totals(slice).unwrap().failed_files, 1);
        assert_eq!(
            with_bad.totals(slice).unwrap().partial,
            alone.totals(slice).unwrap().partial
        );
    }

    fn arb_trip(day_offset: u32) -> impl Strategy<Value = TripRecord> {
        (
            prop::sample::select(vec![10u32, 20, 4]),
            prop::sample::select(vec![10u32, 20]),
            0u32..3,
            0u32..60,
            61i64..7200,
        )
            .prop_map(move |(pu, dz, day, minute, secs)| {
                let stamp = format!("2019-01-{:02} 08:{:02}:00", 7 + day + day_offset, minute);
                trip(pu, dz, &stamp, secs)
            })
    }

    proptest! {
        #[test]
        fn merged_partials_match_concatenated_view(
            first in prop::collection::vec(arb_trip(0), 0..40),
            second in prop::collection::vec(arb_trip(10), 0..40),
        ) {
            let slice = Slice::new(DayClass::Weekday, 8);
            let mut agg = Aggregator::new();
            agg.absorb(completed("a.csv", slice, partial_from_view(&first)));
            agg.absorb(completed("b.csv", slice, partial_from_view(&second)));
            let merged = &agg.totals(slice).unwrap().partial;

            let all: Vec<TripRecord> = first.iter().chain(second.iter()).cloned().collect();
            let whole = partial_from_view(&all);

            prop_assert_eq!(merged.n_pairs(), whole.n_pairs());
            for (pair, stats) in whole.iter() {
                let got = merged.get(pair.0, pair.1);
                prop_assert_eq!(got.days, stats.days);
                prop_assert_eq!(got.trips, stats.trips);
                prop_assert!((got.duration_sum - stats.duration_sum).abs() < 1e-6);
                prop_assert!((got.aam() - stats.aam()).abs() < 1e-9);
            }
        }
    }
}
