use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::error::TripError;

static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<year>\d{4})-(?P<month>\d{2})").expect("valid regex"));

/// `yellow_tripdata_2019-12.csv` -> `(2019, 12)`
pub fn parse_year_month(name: &str) -> Option<(u16, u8)> {
    let caps = YEAR_MONTH.captures(name)?;
    let year = caps["year"].parse().ok()?;
    let month: u8 = caps["month"].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// One raw trip file and the token its outputs are named after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripFile {
    pub path: PathBuf,
    pub period: Option<(u16, u8)>,
    token: Option<String>,
}

impl TripFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.file_name().and_then(|n| n.to_str());
        let period = name.and_then(parse_year_month);
        let token = match period {
            Some((y, m)) => Some(format!("{y:04}-{m:02}")),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };
        TripFile {
            path,
            period,
            token,
        }
    }

    /// `YYYY-MM` when the name carries a date, else the file stem.
    pub fn token(&self) -> Result<&str, TripError> {
        self.token
            .as_deref()
            .ok_or_else(|| TripError::InvalidName(self.path.clone()))
    }

    /// Best-effort name for log lines.
    pub fn label(&self) -> String {
        match &self.token {
            Some(t) => t.clone(),
            None => self.path.to_string_lossy().into_owned(),
        }
    }
}

/// Optional year/month restriction over file names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodFilter {
    pub year: Option<u16>,
    pub month: Option<u8>,
}

impl PeriodFilter {
    pub fn is_unrestricted(&self) -> bool {
        self.year.is_none() && self.month.is_none()
    }

    /// Undated files only pass an unrestricted filter.
    pub fn matches(&self, file: &TripFile) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match file.period {
            Some((y, m)) => {
                self.year.is_none_or(|want| want == y) && self.month.is_none_or(|want| want == m)
            }
            None => false,
        }
    }
}

/// What the download step hands over: trip files plus the zone lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    pub trip_files: Vec<PathBuf>,
    pub zone_lookup: PathBuf,
}

/// Anything able to materialize the corpus under `destination`.
pub trait CorpusSource {
    fn fetch_corpus(&self, destination: &Path) -> Result<Corpus>;
}

/// A corpus that is already on disk: every `*.csv` in the directory except
/// the zone lookup itself.
pub struct LocalCorpus {
    zone_lookup: PathBuf,
}

impl LocalCorpus {
    pub fn new(zone_lookup: impl Into<PathBuf>) -> Self {
        LocalCorpus {
            zone_lookup: zone_lookup.into(),
        }
    }
}

impl CorpusSource for LocalCorpus {
    fn fetch_corpus(&self, destination: &Path) -> Result<Corpus> {
        let lookup = fs::canonicalize(&self.zone_lookup).ok();
        let mut trip_files = Vec::new();
        let entries =
            fs::read_dir(destination).with_context(|| format!("read dir {}", destination.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if !is_csv || !path.is_file() {
                continue;
            }
            if lookup.is_some() && fs::canonicalize(&path).ok() == lookup {
                continue;
            }
            trip_files.push(path);
        }
        trip_files.sort();
        Ok(Corpus {
            trip_files,
            zone_lookup: self.zone_lookup.clone(),
        })
    }
}
