//! Canonical trip columns and the alias table that maps historical header
//! names onto them.

use chrono::NaiveDateTime;

use crate::error::TripError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    PickupTime,
    DropoffTime,
    Distance,
    PickupZone,
    DropoffZone,
}

impl Column {
    pub const REQUIRED: [Column; 5] = [
        Column::PickupTime,
        Column::DropoffTime,
        Column::Distance,
        Column::PickupZone,
        Column::DropoffZone,
    ];

    pub const fn canonical_name(self) -> &'static str {
        match self {
            Column::PickupTime => "tpep_pickup_datetime",
            Column::DropoffTime => "tpep_dropoff_datetime",
            Column::Distance => "trip_distance",
            Column::PickupZone => "PULocationID",
            Column::DropoffZone => "DOLocationID",
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

/// Header spellings seen across the yellow/green corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEra {
    /// 2009 files (`Trip_Pickup_DateTime`, ...)
    Legacy2009,
    /// 2010 to 2014 files (`pickup_datetime`, often space-prefixed)
    Legacy2010,
    /// green taxi files
    Green,
}

pub struct ColumnAlias {
    pub legacy: &'static str,
    pub canonical: Column,
    pub era: SchemaEra,
}

pub const ALIASES: &[ColumnAlias] = &[
    ColumnAlias { legacy: "Trip_Pickup_DateTime", canonical: Column::PickupTime, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: " Trip_Pickup_DateTime", canonical: Column::PickupTime, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: "Trip_Dropoff_DateTime", canonical: Column::DropoffTime, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: " Trip_Dropoff_DateTime", canonical: Column::DropoffTime, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: "Trip_Distance", canonical: Column::Distance, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: " Trip_Distance", canonical: Column::Distance, era: SchemaEra::Legacy2009 },
    ColumnAlias { legacy: "pickup_datetime", canonical: Column::PickupTime, era: SchemaEra::Legacy2010 },
    ColumnAlias { legacy: " pickup_datetime", canonical: Column::PickupTime, era: SchemaEra::Legacy2010 },
    ColumnAlias { legacy: "dropoff_datetime", canonical: Column::DropoffTime, era: SchemaEra::Legacy2010 },
    ColumnAlias { legacy: " dropoff_datetime", canonical: Column::DropoffTime, era: SchemaEra::Legacy2010 },
    ColumnAlias { legacy: "lpep_pickup_datetime", canonical: Column::PickupTime, era: SchemaEra::Green },
    ColumnAlias { legacy: "lpep_dropoff_datetime", canonical: Column::DropoffTime, era: SchemaEra::Green },
];

/// Resolves a raw header name to its canonical column, if it names one.
pub fn normalize(header: &str) -> Option<Column> {
    if let Some(col) = Column::REQUIRED
        .iter()
        .find(|c| c.canonical_name() == header)
    {
        return Some(*col);
    }
    ALIASES
        .iter()
        .find(|a| a.legacy == header)
        .map(|a| a.canonical)
}

/// Position of every required column in a file's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndex {
    positions: [usize; 5],
    width: usize,
}

impl ColumnIndex {
    /// The first header mapping to a canonical column wins.
    pub fn resolve<'a>(header: impl IntoIterator<Item = &'a str>) -> Result<Self, TripError> {
        let mut found: [Option<usize>; 5] = [None; 5];
        let mut width = 0;
        for (pos, name) in header.into_iter().enumerate() {
            width = pos + 1;
            if let Some(col) = normalize(name) {
                found[col.slot()].get_or_insert(pos);
            }
        }
        let mut positions = [0usize; 5];
        for col in Column::REQUIRED {
            positions[col.slot()] =
                found[col.slot()].ok_or(TripError::ColumnNotFound(col.canonical_name()))?;
        }
        Ok(ColumnIndex { positions, width })
    }

    #[inline]
    pub fn position(&self, col: Column) -> usize {
        self.positions[col.slot()]
    }

    /// Number of fields a well-formed row must carry.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }
}

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%m/%d/%Y %I:%M:%S %p"];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
