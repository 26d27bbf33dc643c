use std::fs::File;
use std::path::Path;

use crate::error::TripError;

/// An already-parsed, header-keyed table of string cells. Used for in-memory
/// trip sources and zone lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(header: impl IntoIterator<Item = S>) -> Self {
        Table {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row<S: Into<String>>(mut self, row: impl IntoIterator<Item = S>) -> Self {
        self.push_row(row);
        self
    }

    pub fn push_row<S: Into<String>>(&mut self, row: impl IntoIterator<Item = S>) {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

/// Positional access to the cells of one row, whichever reader produced it.
pub trait RowFields {
    fn field(&self, idx: usize) -> Option<&str>;
    fn width(&self) -> usize;
}

impl RowFields for csv::StringRecord {
    #[inline]
    fn field(&self, idx: usize) -> Option<&str> {
        self.get(idx)
    }
    #[inline]
    fn width(&self) -> usize {
        self.len()
    }
}

impl RowFields for [String] {
    #[inline]
    fn field(&self, idx: usize) -> Option<&str> {
        self.get(idx).map(String::as_str)
    }
    #[inline]
    fn width(&self) -> usize {
        self.len()
    }
}

/// Opens a headed CSV file, keeping i/o failures tied to their path.
pub(crate) fn open_csv(path: &Path, flexible: bool) -> Result<csv::Reader<File>, TripError> {
    let file = File::open(path).map_err(|e| TripError::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .flexible(flexible)
        .from_reader(file))
}
