use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::error::TripError;
use crate::table::{Table, open_csv};

pub type ZoneId = u32;

pub const ZONE_ID_COLUMN: &str = "LocationID";
pub const REGION_COLUMN: &str = "Borough";

/// Where a zone lookup comes from.
#[derive(Debug, Clone)]
pub enum ZoneSource {
    Path(PathBuf),
    Table(Table),
}

/// Region name -> zone ids, built once from the lookup table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneCatalog {
    regions: BTreeMap<String, BTreeSet<ZoneId>>,
}

impl ZoneCatalog {
    pub fn load(source: ZoneSource) -> Result<Self, TripError> {
        match source {
            ZoneSource::Path(path) => Self::from_path(&path),
            ZoneSource::Table(table) => Self::from_table(&table),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, TripError> {
        let mut reader = open_csv(path, true)?;
        let header = reader.headers()?.clone();
        let mut table = Table::new(header.iter());
        for record in reader.records() {
            table.push_row(record?.iter());
        }
        Self::from_table(&table)
    }

    pub fn from_table(table: &Table) -> Result<Self, TripError> {
        let id_col = required_column(table, ZONE_ID_COLUMN)?;
        let region_col = required_column(table, REGION_COLUMN)?;

        let mut regions: BTreeMap<String, BTreeSet<ZoneId>> = BTreeMap::new();
        for (idx, row) in table.rows.iter().enumerate() {
            // header is line 1
            let line = idx as u64 + 2;
            let raw_id = row.get(id_col).map(|s| s.trim()).unwrap_or_default();
            let zone: ZoneId = raw_id.parse().map_err(|_| TripError::InvalidZoneId {
                row: line,
                value: raw_id.to_string(),
            })?;
            let region = row.get(region_col).map(|s| s.trim()).unwrap_or_default();
            regions.entry(region.to_string()).or_default().insert(zone);
        }
        Ok(ZoneCatalog { regions })
    }

    pub fn zones_in(&self, region: &str) -> Result<&BTreeSet<ZoneId>, TripError> {
        self.regions
            .get(region)
            .ok_or_else(|| TripError::UnknownRegion {
                region: region.to_string(),
                known: self.regions().join(", "),
            })
    }

    pub fn contains(&self, region: &str, zone: ZoneId) -> Result<bool, TripError> {
        Ok(self.zones_in(region)?.contains(&zone))
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn n_zones(&self) -> usize {
        self.regions.values().map(BTreeSet::len).sum()
    }
}

fn required_column(table: &Table, name: &str) -> Result<usize, TripError> {
    table.column_index(name).ok_or_else(|| TripError::Schema {
        column: name.to_string(),
    })
}
