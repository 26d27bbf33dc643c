use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;

use super::types::{PairStats, PartialMatrix};
use crate::trips::{TripDataset, TripRecord};
use crate::zones::ZoneId;

/// Estimated seconds between arrivals inside a one-hour slice:
/// `3600 * days / trips`. NaN when there are no trips, or when there are more
/// distinct days than trips (impossible under correct filtering).
#[inline]
pub fn arrival_interval(days: u64, trips: u64) -> f64 {
    if trips == 0 || days > trips {
        return f64::NAN;
    }
    3600.0 * days as f64 / trips as f64
}

#[inline]
pub fn mean_duration(duration_sum: f64, trips: u64) -> f64 {
    if trips == 0 {
        return f64::NAN;
    }
    duration_sum / trips as f64
}

/// Additive statistics for every (pickup, dropoff) pair in a view.
pub fn partial_from_view<'a>(trips: impl IntoIterator<Item = &'a TripRecord>) -> PartialMatrix {
    #[derive(Default)]
    struct Acc {
        days: AHashSet<NaiveDate>,
        trips: u64,
        duration_sum: f64,
    }

    let mut by_pair: AHashMap<(ZoneId, ZoneId), Acc> = AHashMap::default();
    for t in trips {
        let acc = by_pair.entry((t.pickup_zone, t.dropoff_zone)).or_default();
        acc.days.insert(t.pickup_date());
        acc.trips += 1;
        acc.duration_sum += t.duration_s;
    }

    let mut out = PartialMatrix::new();
    for ((pu, dz), acc) in by_pair {
        out.insert(
            pu,
            dz,
            PairStats {
                days: acc.days.len() as u64,
                trips: acc.trips,
                duration_sum: acc.duration_sum,
            },
        );
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMetrics {
    pub days: u64,
    pub trips: u64,
    pub aam: f64,
    pub atm: f64,
}

/// AAM and ATM for each pair present in the dataset's current view.
pub fn pairwise_metrics(ds: &TripDataset) -> BTreeMap<(ZoneId, ZoneId), PairMetrics> {
    partial_from_view(ds.current_view())
        .iter()
        .map(|(pair, s)| {
            let m = PairMetrics {
                days: s.days,
                trips: s.trips,
                aam: s.aam(),
                atm: s.atm(),
            };
            (pair, m)
        })
        .collect()
}
