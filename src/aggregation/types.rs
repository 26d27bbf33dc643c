use std::collections::BTreeSet;
use std::fmt;
use std::ops::AddAssign;

use ahash::AHashMap;
use ndarray::Array2;

use super::metrics::{arrival_interval, mean_duration};
use crate::zones::ZoneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DayClass {
    Weekday,
    Weekend,
}

impl DayClass {
    pub const ALL: [DayClass; 2] = [DayClass::Weekday, DayClass::Weekend];

    pub fn token(self) -> &'static str {
        match self {
            DayClass::Weekday => "wd",
            DayClass::Weekend => "wn",
        }
    }

    #[inline]
    pub fn is_weekend(self) -> bool {
        self == DayClass::Weekend
    }
}

/// (weekday-class, hour-of-day) partition of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slice {
    pub class: DayClass,
    pub hour: u32,
}

impl Slice {
    pub const COUNT: usize = 48;

    pub fn new(class: DayClass, hour: u32) -> Self {
        Slice { class, hour }
    }

    pub fn all() -> impl Iterator<Item = Slice> {
        DayClass::ALL
            .into_iter()
            .flat_map(|class| (0..24).map(move |hour| Slice { class, hour }))
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.class.token(), self.hour)
    }
}

/// Additive per-pair statistics. Counts add exactly; `duration_sum` is an
/// ordinary f64 sum, so its last bits depend on the order files are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairStats {
    pub days: u64,
    pub trips: u64,
    pub duration_sum: f64,
}

impl PairStats {
    pub fn aam(&self) -> f64 {
        arrival_interval(self.days, self.trips)
    }

    pub fn atm(&self) -> f64 {
        mean_duration(self.duration_sum, self.trips)
    }
}

impl AddAssign for PairStats {
    fn add_assign(&mut self, rhs: Self) {
        self.days += rhs.days;
        self.trips += rhs.trips;
        self.duration_sum += rhs.duration_sum;
    }
}

/// (pickup, dropoff) -> additive statistics, for one file and one slice or
/// summed over many files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMatrix {
    cells: AHashMap<(ZoneId, ZoneId), PairStats>,
}

impl PartialMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pickup: ZoneId, dropoff: ZoneId, stats: PairStats) {
        *self.cells.entry((pickup, dropoff)).or_default() += stats;
    }

    /// Element-wise sum; pairs missing on either side count as zero.
    pub fn merge(&mut self, other: &PartialMatrix) {
        for (&(pu, dz), &stats) in &other.cells {
            self.insert(pu, dz, stats);
        }
    }

    pub fn get(&self, pickup: ZoneId, dropoff: ZoneId) -> PairStats {
        self.cells
            .get(&(pickup, dropoff))
            .copied()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((ZoneId, ZoneId), PairStats)> + '_ {
        self.cells.iter().map(|(&k, &v)| (k, v))
    }

    pub fn n_pairs(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total_trips(&self) -> u64 {
        self.cells.values().map(|s| s.trips).sum()
    }

    pub fn pickups(&self) -> Vec<ZoneId> {
        let set: BTreeSet<ZoneId> = self.cells.keys().map(|&(pu, _)| pu).collect();
        set.into_iter().collect()
    }

    pub fn dropoffs(&self) -> Vec<ZoneId> {
        let set: BTreeSet<ZoneId> = self.cells.keys().map(|&(_, dz)| dz).collect();
        set.into_iter().collect()
    }
}

/// How one side of the output matrix is labelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Axis {
    /// every zone of a region (or a single literal zone), sorted
    Fixed(Vec<ZoneId>),
    /// whatever zones show up in the data
    Observed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxes {
    pub pickups: Axis,
    pub dropoffs: Axis,
}

impl MatrixAxes {
    pub fn observed() -> Self {
        MatrixAxes {
            pickups: Axis::Observed,
            dropoffs: Axis::Observed,
        }
    }

    fn resolve(&self, partial: &PartialMatrix) -> (Vec<ZoneId>, Vec<ZoneId>) {
        let pickups = match &self.pickups {
            Axis::Fixed(zones) => zones.clone(),
            Axis::Observed => partial.pickups(),
        };
        let dropoffs = match &self.dropoffs {
            Axis::Fixed(zones) => zones.clone(),
            Axis::Observed => partial.dropoffs(),
        };
        (pickups, dropoffs)
    }
}

/// Final AAM/ATM for one slice. Rows are pickup zones, columns dropoff zones;
/// undefined cells hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMatrix {
    pub pickups: Vec<ZoneId>,
    pub dropoffs: Vec<ZoneId>,
    pub aam: Array2<f64>,
    pub atm: Array2<f64>,
}

impl ResultMatrix {
    /// Divides only now, after all contributions are summed.
    pub fn from_partial(partial: &PartialMatrix, axes: &MatrixAxes) -> Self {
        let (pickups, dropoffs) = axes.resolve(partial);
        let shape = (pickups.len(), dropoffs.len());
        let mut aam = Array2::from_elem(shape, f64::NAN);
        let mut atm = Array2::from_elem(shape, f64::NAN);
        for (r, &pu) in pickups.iter().enumerate() {
            for (c, &dz) in dropoffs.iter().enumerate() {
                let stats = partial.get(pu, dz);
                aam[[r, c]] = stats.aam();
                atm[[r, c]] = stats.atm();
            }
        }
        ResultMatrix {
            pickups,
            dropoffs,
            aam,
            atm,
        }
    }

    pub fn n_defined(&self) -> usize {
        self.aam.iter().filter(|v| !v.is_nan()).count()
    }
}
