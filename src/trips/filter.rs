use std::fmt;
use std::str::FromStr;

use ahash::AHashMap;

use super::dataset::TripRecord;
use crate::error::TripError;
use crate::zones::{ZoneCatalog, ZoneId};

/// A region name from the catalog, or one literal zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSelector {
    Region(String),
    Zone(ZoneId),
}

impl FromStr for ZoneSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<ZoneId>() {
            Ok(id) => ZoneSelector::Zone(id),
            Err(_) => ZoneSelector::Region(s.to_string()),
        })
    }
}

impl fmt::Display for ZoneSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneSelector::Region(name) => f.write_str(name),
            ZoneSelector::Zone(id) => write!(f, "{id}"),
        }
    }
}

impl ZoneSelector {
    fn matcher<'a>(
        &'a self,
        catalog: Option<&'a ZoneCatalog>,
    ) -> Result<Box<dyn Fn(ZoneId) -> bool + 'a>, TripError> {
        match self {
            ZoneSelector::Zone(id) => {
                let id = *id;
                Ok(Box::new(move |z| z == id))
            }
            ZoneSelector::Region(name) => {
                let catalog = catalog.ok_or_else(|| TripError::MissingCatalog(name.clone()))?;
                let zones = catalog.zones_in(name)?;
                Ok(Box::new(move |z| zones.contains(&z)))
            }
        }
    }
}

/// One predicate over the current view. Every variant is a pure function of
/// (view, parameters); see [`TripFilter::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum TripFilter {
    PickupHour { start: u32, end: u32 },
    Weekday { weekend: bool },
    PickupZone(ZoneSelector),
    DropoffZone(ZoneSelector),
    MinimumDemand(usize),
}

impl TripFilter {
    pub fn by_pickup_hour(start: u32, end: u32) -> Self {
        TripFilter::PickupHour { start, end }
    }

    pub fn by_weekday(is_weekend: bool) -> Self {
        TripFilter::Weekday {
            weekend: is_weekend,
        }
    }

    pub fn by_pickup_region(selector: ZoneSelector) -> Self {
        TripFilter::PickupZone(selector)
    }

    pub fn by_dropoff_region(selector: ZoneSelector) -> Self {
        TripFilter::DropoffZone(selector)
    }

    pub fn by_minimum_demand(threshold: usize) -> Self {
        TripFilter::MinimumDemand(threshold)
    }

    /// Returns the subset of `view` (indices into `records`) this filter keeps,
    /// preserving order.
    pub fn select(
        &self,
        records: &[TripRecord],
        view: &[usize],
        catalog: Option<&ZoneCatalog>,
    ) -> Result<Vec<usize>, TripError> {
        let kept = match self {
            TripFilter::PickupHour { start, end } => {
                let (start, end) = (*start, *end);
                if !(start < end && end <= 24) {
                    return Err(TripError::InvalidRange { start, end });
                }
                keep_where(records, view, |t| (start..end).contains(&t.pickup_hour()))
            }
            TripFilter::Weekday { weekend } => keep_where(records, view, |t| t.is_weekend() == *weekend),
            TripFilter::PickupZone(sel) => {
                let hit = sel.matcher(catalog)?;
                keep_where(records, view, |t| hit(t.pickup_zone))
            }
            TripFilter::DropoffZone(sel) => {
                let hit = sel.matcher(catalog)?;
                keep_where(records, view, |t| hit(t.dropoff_zone))
            }
            TripFilter::MinimumDemand(threshold) => {
                let mut demand: AHashMap<ZoneId, usize> = AHashMap::default();
                for &i in view {
                    *demand.entry(records[i].pickup_zone).or_default() += 1;
                }
                keep_where(records, view, |t| {
                    demand.get(&t.pickup_zone).copied().unwrap_or(0) > *threshold
                })
            }
        };
        Ok(kept)
    }
}

fn keep_where(
    records: &[TripRecord],
    view: &[usize],
    pred: impl Fn(&TripRecord) -> bool,
) -> Vec<usize> {
    view.iter().copied().filter(|&i| pred(&records[i])).collect()
}

/// Filters applied left to right. Order matters: demand is counted over
/// whatever the earlier steps left in the view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPipeline {
    steps: Vec<TripFilter>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, filter: TripFilter) -> Self {
        self.steps.push(filter);
        self
    }

    pub fn steps(&self) -> &[TripFilter] {
        &self.steps
    }
}
