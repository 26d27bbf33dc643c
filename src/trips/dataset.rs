use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};

use super::filter::{FilterPipeline, TripFilter};
use super::schema::{Column, ColumnIndex, parse_timestamp};
use crate::error::TripError;
use crate::table::{RowFields, Table, open_csv};
use crate::zones::{ZoneCatalog, ZoneId};

/// One cleaned trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripRecord {
    pub pickup_zone: ZoneId,
    pub dropoff_zone: ZoneId,
    pub pickup_at: NaiveDateTime,
    pub dropoff_at: NaiveDateTime,
    pub distance: f64,
    pub duration_s: f64,
}

impl TripRecord {
    pub fn new(
        pickup_zone: ZoneId,
        dropoff_zone: ZoneId,
        pickup_at: NaiveDateTime,
        dropoff_at: NaiveDateTime,
        distance: f64,
    ) -> Self {
        let duration_s = (dropoff_at - pickup_at).num_milliseconds() as f64 / 1000.0;
        TripRecord {
            pickup_zone,
            dropoff_zone,
            pickup_at,
            dropoff_at,
            distance,
            duration_s,
        }
    }

    #[inline]
    pub fn pickup_hour(&self) -> u32 {
        self.pickup_at.hour()
    }

    #[inline]
    pub fn pickup_date(&self) -> NaiveDate {
        self.pickup_at.date()
    }

    #[inline]
    pub fn is_weekend(&self) -> bool {
        matches!(self.pickup_at.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Physical plausibility bounds. Duration is `(min, max]`, distance `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleaningRules {
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    pub min_distance: f64,
    pub max_distance: f64,
}

impl Default for CleaningRules {
    fn default() -> Self {
        CleaningRules {
            min_duration_s: 60.0,
            max_duration_s: 7200.0,
            min_distance: 0.1,
            max_distance: 20.0,
        }
    }
}

impl CleaningRules {
    #[inline]
    pub fn keeps(&self, trip: &TripRecord) -> bool {
        trip.duration_s > self.min_duration_s
            && trip.duration_s <= self.max_duration_s
            && trip.distance > self.min_distance
            && trip.distance < self.max_distance
    }
}

/// Where a trip dataset is read from.
#[derive(Debug, Clone)]
pub enum TripSource {
    FilePath(PathBuf),
    Table(Table),
}

/// A cleaned trip file plus the current filtered view over it.
///
/// The snapshot is immutable and shared between forks; each fork owns its
/// view, so filtering one never affects another.
#[derive(Debug, Clone)]
pub struct TripDataset {
    snapshot: Arc<[TripRecord]>,
    view: Vec<usize>,
    catalog: Option<Arc<ZoneCatalog>>,
}

impl TripDataset {
    pub fn load(source: TripSource, catalog: Option<Arc<ZoneCatalog>>) -> Result<Self, TripError> {
        Self::load_with(source, catalog, &CleaningRules::default())
    }

    pub fn load_with(
        source: TripSource,
        catalog: Option<Arc<ZoneCatalog>>,
        rules: &CleaningRules,
    ) -> Result<Self, TripError> {
        let records = match &source {
            TripSource::FilePath(path) => read_trip_file(path, rules)?,
            TripSource::Table(table) => read_trip_table(table, rules)?,
        };
        Ok(Self::from_records(records, catalog))
    }

    /// Wraps records that are already cleaned.
    pub fn from_records(records: Vec<TripRecord>, catalog: Option<Arc<ZoneCatalog>>) -> Self {
        let view = (0..records.len()).collect();
        TripDataset {
            snapshot: records.into(),
            view,
            catalog,
        }
    }

    pub fn current_view(&self) -> impl ExactSizeIterator<Item = &TripRecord> + Clone {
        self.view.iter().map(|&i| &self.snapshot[i])
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn snapshot(&self) -> &[TripRecord] {
        &self.snapshot
    }

    pub fn catalog(&self) -> Option<&ZoneCatalog> {
        self.catalog.as_deref()
    }

    pub fn reset(&mut self) {
        self.view = (0..self.snapshot.len()).collect();
    }

    /// Independent dataset over the same snapshot, starting unfiltered.
    pub fn fork(&self) -> Self {
        TripDataset {
            snapshot: Arc::clone(&self.snapshot),
            view: (0..self.snapshot.len()).collect(),
            catalog: self.catalog.clone(),
        }
    }

    /// Replaces the current view with the filtered one.
    pub fn apply(&mut self, filter: &TripFilter) -> Result<(), TripError> {
        self.view = filter.select(&self.snapshot, &self.view, self.catalog())?;
        Ok(())
    }

    /// Leaves `self` untouched and returns a filtered copy.
    pub fn filtered(&self, filter: &TripFilter) -> Result<Self, TripError> {
        let mut out = self.clone();
        out.apply(filter)?;
        Ok(out)
    }

    pub fn apply_pipeline(&mut self, pipeline: &FilterPipeline) -> Result<(), TripError> {
        for step in pipeline.steps() {
            self.apply(step)?;
        }
        Ok(())
    }
}

fn read_trip_file(path: &Path, rules: &CleaningRules) -> Result<Vec<TripRecord>, TripError> {
    let mut reader = open_csv(path, false)?;
    let cols = ColumnIndex::resolve(reader.headers()?.iter())?;

    let mut out = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => return Err(record_error(path, err)),
        }
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        if let Some(trip) = parse_row(&record, &cols, line, rules)? {
            out.push(trip);
        }
    }
    Ok(out)
}

fn read_trip_table(table: &Table, rules: &CleaningRules) -> Result<Vec<TripRecord>, TripError> {
    let cols = ColumnIndex::resolve(table.header.iter().map(String::as_str))?;
    let mut out = Vec::new();
    for (idx, row) in table.rows.iter().enumerate() {
        let line = idx as u64 + 2;
        if row.len() != cols.width() {
            return Err(TripError::BadRecord {
                line_number: line,
                expected: cols.width(),
                saw: row.len(),
                line: row.join(","),
            });
        }
        if let Some(trip) = parse_row(row.as_slice(), &cols, line, rules)? {
            out.push(trip);
        }
    }
    Ok(out)
}

/// A field-count mismatch becomes a `BadRecord` carrying the line exactly as
/// it appears in the file.
fn record_error(path: &Path, err: csv::Error) -> TripError {
    if let csv::ErrorKind::UnequalLengths {
        pos: Some(pos),
        expected_len,
        len,
    } = err.kind()
    {
        let line_number = pos.line();
        return match read_line_at(path, line_number) {
            Ok(line) => TripError::BadRecord {
                line_number,
                expected: *expected_len as usize,
                saw: *len as usize,
                line,
            },
            Err(e) => e,
        };
    }
    TripError::Csv(err)
}

fn read_line_at(path: &Path, line_number: u64) -> Result<String, TripError> {
    let file = File::open(path).map_err(|e| TripError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    for _ in 0..line_number {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| TripError::io(path, e))?;
        if n == 0 {
            let msg = format!("no line {line_number} in file");
            return Err(TripError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg),
            ));
        }
    }
    Ok(String::from_utf8_lossy(&buf)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// Empty required fields drop the row; unparseable ones fail the load.
fn parse_row<R: RowFields + ?Sized>(
    row: &R,
    cols: &ColumnIndex,
    line: u64,
    rules: &CleaningRules,
) -> Result<Option<TripRecord>, TripError> {
    let field = |col: Column| row.field(cols.position(col)).map(str::trim).unwrap_or("");
    let raw = Column::REQUIRED.map(field);
    if raw.iter().any(|s| s.is_empty()) {
        return Ok(None);
    }
    let [pickup_raw, dropoff_raw, distance_raw, pu_raw, do_raw] = raw;

    let pickup_at = parse_timestamp(pickup_raw)
        .ok_or_else(|| invalid_field(line, Column::PickupTime, pickup_raw))?;
    let dropoff_at = parse_timestamp(dropoff_raw)
        .ok_or_else(|| invalid_field(line, Column::DropoffTime, dropoff_raw))?;
    let distance: f64 = distance_raw
        .parse()
        .map_err(|_| invalid_field(line, Column::Distance, distance_raw))?;
    let pickup_zone = parse_zone(pu_raw).ok_or_else(|| invalid_field(line, Column::PickupZone, pu_raw))?;
    let dropoff_zone = parse_zone(do_raw).ok_or_else(|| invalid_field(line, Column::DropoffZone, do_raw))?;

    let trip = TripRecord::new(pickup_zone, dropoff_zone, pickup_at, dropoff_at, distance);
    Ok(rules.keeps(&trip).then_some(trip))
}

// some exports write integral ids as floats ("161.0")
fn parse_zone(raw: &str) -> Option<ZoneId> {
    if let Ok(id) = raw.parse::<ZoneId>() {
        return Some(id);
    }
    let f: f64 = raw.parse().ok()?;
    (f.fract() == 0.0 && f >= 0.0 && f <= ZoneId::MAX as f64).then_some(f as ZoneId)
}

fn invalid_field(line: u64, col: Column, value: &str) -> TripError {
    TripError::InvalidField {
        line,
        column: col.canonical_name(),
        value: value.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    pub(crate) const HEADER: [&str; 7] = [
        "VendorID",
        "tpep_pickup_datetime",
        "tpep_dropoff_datetime",
        "passenger_count",
        "trip_distance",
        "PULocationID",
        "DOLocationID",
    ];

    pub(crate) fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    /// A record picked up at `pickup` lasting `secs` seconds.
    pub(crate) fn trip(pu: ZoneId, dz: ZoneId, pickup: &str, secs: i64) -> TripRecord {
        let at = ts(pickup);
        TripRecord::new(pu, dz, at, at + chrono::Duration::seconds(secs), 2.5)
    }

    pub(crate) fn write_trip_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER.join(",")).unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_file_cleans_rows() {
        let file = write_trip_csv(&[
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,1.2,10,20",
            // 30 second trip
            "2,2019-01-07 08:10:00,2019-01-07 08:10:30,1,1.2,10,20",
            // too short a distance
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,0.05,10,20",
            // exactly two hours is kept
            "2,2019-01-07 08:10:00,2019-01-07 10:10:00,1,15.0,10,20",
            // missing zone drops the row
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,1.2,,20",
        ]);
        let ds = TripDataset::load(TripSource::FilePath(file.path().to_path_buf()), None).unwrap();
        assert_eq!(ds.len(), 2);
        let durations: Vec<f64> = ds.current_view().map(|t| t.duration_s).collect();
        assert_eq!(durations, vec![300.0, 7200.0]);
    }

    #[test]
    fn test_cleaning_bounds_at_their_edges() {
        let file = write_trip_csv(&[
            // 60 s: dropped, the lower duration bound is exclusive
            "2,2019-01-07 08:10:00,2019-01-07 08:11:00,1,1.2,10,20",
            // 61 s: kept
            "2,2019-01-07 08:10:00,2019-01-07 08:11:01,1,1.2,10,20",
            // 7201 s: dropped
            "2,2019-01-07 08:10:00,2019-01-07 10:10:01,1,1.2,10,20",
            // distance exactly 0.1: dropped
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,0.1,10,20",
            // distance exactly 20: dropped
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,20.0,10,20",
            // just inside both distance bounds: kept
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,0.11,10,20",
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,19.99,10,20",
        ]);
        let ds = TripDataset::load(TripSource::FilePath(file.path().to_path_buf()), None).unwrap();
        let kept: Vec<(f64, f64)> = ds.current_view().map(|t| (t.duration_s, t.distance)).collect();
        assert_eq!(kept, vec![(61.0, 1.2), (300.0, 0.11), (300.0, 19.99)]);
    }

    #[test]
    fn test_bad_record_carries_literal_line() {
        let file = write_trip_csv(&[
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1,1.2,10,20",
            "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1.2,10,20",
        ]);
        let err = TripDataset::load(TripSource::FilePath(file.path().to_path_buf()), None)
            .unwrap_err();
        match err {
            TripError::BadRecord {
                line_number,
                expected,
                saw,
                line,
            } => {
                assert_eq!(line_number, 3);
                assert_eq!((expected, saw), (7, 6));
                assert_eq!(line, "2,2019-01-07 08:10:00,2019-01-07 08:15:00,1.2,10,20");
            }
            other => panic!("expected BadRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let table = Table::new(["pickup_datetime", "dropoff_datetime", "trip_distance", "PULocationID"]);
        let err = TripDataset::load(TripSource::Table(table), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert!(err.to_string().contains("DOLocationID"));
    }

    #[test]
    fn test_table_source_with_legacy_header() {
        let table = Table::new([" pickup_datetime", " dropoff_datetime", " Trip_Distance", "PULocationID", "DOLocationID"])
            .with_row(["2012-03-03 09:00:00", "2012-03-03 09:20:00", "3.1", "161.0", "237"]);
        let ds = TripDataset::load(TripSource::Table(table), None).unwrap();
        let trip = ds.current_view().next().copied().unwrap();
        assert_eq!((trip.pickup_zone, trip.dropoff_zone), (161, 237));
        assert_eq!(trip.duration_s, 1200.0);
        assert!(trip.is_weekend());
    }

    #[test]
    fn test_unparseable_field_fails() {
        let table = Table::new(HEADER).with_row(["1", "not a time", "2019-01-07 08:15:00", "1", "1.0", "10", "20"]);
        let err = TripDataset::load(TripSource::Table(table), None).unwrap_err();
        assert!(matches!(
            err,
            TripError::InvalidField { line: 2, column: "tpep_pickup_datetime", .. }
        ));
    }

    #[test]
    fn test_reset_and_fork() {
        let records = vec![
            trip(10, 20, "2019-01-07 08:10:00", 300),
            trip(10, 20, "2019-01-07 09:10:00", 300),
        ];
        let mut ds = TripDataset::from_records(records, None);
        ds.apply(&TripFilter::by_pickup_hour(8, 9)).unwrap();
        assert_eq!(ds.len(), 1);

        let fork = ds.fork();
        assert_eq!(fork.len(), 2);
        assert_eq!(ds.snapshot().len(), 2);

        ds.reset();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_filtered_leaves_original() {
        let ds = TripDataset::from_records(vec![trip(10, 20, "2019-01-07 08:10:00", 300)], None);
        let out = ds.filtered(&TripFilter::by_pickup_hour(9, 10)).unwrap();
        assert!(out.is_empty());
        assert_eq!(ds.len(), 1);
    }
}
