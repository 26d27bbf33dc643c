use std::fmt;
use std::path::PathBuf;

/// Errors raised while loading zone lookups and trip files or while filtering
/// them. Everything here is task-local: a slice task converts it into a
/// [`crate::aggregation::TaskFailure`] instead of propagating it.
#[derive(thiserror::Error, Debug)]
pub enum TripError {
    #[error("zone lookup is missing required column '{column}'")]
    Schema { column: String },
    #[error("zone lookup row {row} has invalid zone id '{value}'")]
    InvalidZoneId { row: u64, value: String },
    #[error("required column '{0}' not found after alias normalization")]
    ColumnNotFound(&'static str),
    #[error("line {line_number}: expected {expected} fields, saw {saw}: {line}")]
    BadRecord {
        line_number: u64,
        expected: usize,
        saw: usize,
        line: String,
    },
    #[error("line {line}: cannot parse {column} value '{value}'")]
    InvalidField {
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("unknown region '{region}', must be one of [{known}]")]
    UnknownRegion { region: String, known: String },
    #[error("invalid range start={start} end={end}, need 0 <= start < end <= 24")]
    InvalidRange { start: u32, end: u32 },
    #[error("region filter '{0}' needs a zone catalog but none is bound")]
    MissingCatalog(String),
    #[error("cannot derive an output name from '{0}'")]
    InvalidName(PathBuf),
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("npz error on '{path}': {message}")]
    Npz { path: PathBuf, message: String },
}

/// Closed tag set used when a failure is serialized to the task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    ColumnNotFound,
    BadRecord,
    InvalidField,
    UnknownRegion,
    InvalidRange,
    MissingCatalog,
    InvalidName,
    Io,
    Csv,
    Panic,
}

impl TripError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TripError::Schema { .. } | TripError::InvalidZoneId { .. } => ErrorKind::Schema,
            TripError::ColumnNotFound(_) => ErrorKind::ColumnNotFound,
            TripError::BadRecord { .. } => ErrorKind::BadRecord,
            TripError::InvalidField { .. } => ErrorKind::InvalidField,
            TripError::UnknownRegion { .. } => ErrorKind::UnknownRegion,
            TripError::InvalidRange { .. } => ErrorKind::InvalidRange,
            TripError::MissingCatalog(_) => ErrorKind::MissingCatalog,
            TripError::InvalidName(_) => ErrorKind::InvalidName,
            TripError::Io { .. } | TripError::Npz { .. } => ErrorKind::Io,
            TripError::Csv(_) => ErrorKind::Csv,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TripError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorKind::Schema => "SchemaError",
            ErrorKind::ColumnNotFound => "ColumnNotFoundError",
            ErrorKind::BadRecord => "BadRecordError",
            ErrorKind::InvalidField => "InvalidFieldError",
            ErrorKind::UnknownRegion => "UnknownRegionError",
            ErrorKind::InvalidRange => "InvalidRangeError",
            ErrorKind::MissingCatalog => "MissingCatalogError",
            ErrorKind::InvalidName => "InvalidNameError",
            ErrorKind::Io => "IoError",
            ErrorKind::Csv => "CsvError",
            ErrorKind::Panic => "Panic",
        };
        f.write_str(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let err = TripError::ColumnNotFound("PULocationID");
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert_eq!(err.kind().to_string(), "ColumnNotFoundError");
        assert!(err.to_string().contains("PULocationID"));
    }

    #[test]
    fn test_bad_record_message_carries_line() {
        let err = TripError::BadRecord {
            line_number: 3,
            expected: 7,
            saw: 6,
            line: "a,b,c,d,e,f".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::BadRecord);
        assert!(err.to_string().ends_with("a,b,c,d,e,f"));
    }
}
