use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};

use crate::aggregation::TaskOutcome;

/// Append-only record of every task outcome. Opened before the pool starts and
/// closed after the join; workers share it through `&TaskLog`.
pub struct TaskLog {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

/// One line per outcome, so embedded newlines are flattened.
fn one_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

pub fn format_outcome(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Completed { task, partial } => format!(
            "{}-{}...done! trips={} pairs={}",
            task.file.label(),
            task.slice,
            partial.total_trips(),
            partial.n_pairs()
        ),
        TaskOutcome::Failed(f) => format!(
            "{}-{}...failed [{}] {}: {}",
            f.label,
            f.slice,
            f.file.display(),
            f.kind,
            one_line(&f.detail)
        ),
    }
}

impl TaskLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open task log {}", path.display()))?;
        Ok(TaskLog {
            path: path.to_path_buf(),
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LineWriter<File>> {
        // a panicking writer leaves the file usable; keep logging
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never fails the caller: a write error is reported and dropped.
    pub fn record(&self, outcome: &TaskOutcome) {
        let line = format_outcome(outcome);
        if let Err(err) = writeln!(self.lock(), "{line}") {
            log::warn!("[tasklog] cannot append to {}: {err}", self.path.display());
        }
    }

    pub fn close(self) -> Result<()> {
        let path = self.path;
        let mut writer = self
            .writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .flush()
            .with_context(|| format!("flush task log {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregation::task::{Fault, SliceTask};
    use crate::aggregation::types::{DayClass, PairStats, PartialMatrix, Slice};
    use crate::corpus::TripFile;
    use crate::error::ErrorKind;

    #[test]
    fn test_lines_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.log");
        let file = Arc::new(TripFile::new("/raw/yellow_tripdata_2019-01.csv"));
        let slice = Slice::new(DayClass::Weekend, 5);

        let mut partial = PartialMatrix::new();
        partial.insert(10, 20, PairStats { days: 1, trips: 3, duration_sum: 900.0 });
        let done = TaskOutcome::Completed {
            task: SliceTask::new(Arc::clone(&file), slice),
            partial,
        };
        let failed = SliceTask::new(file, slice).fail(Fault {
            kind: ErrorKind::BadRecord,
            detail: "line 3\nbroken".to_string(),
        });

        let log = TaskLog::create(&path).unwrap();
        log.record(&done);
        log.close().unwrap();
        let log = TaskLog::create(&path).unwrap();
        log.record(&failed);
        log.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2019-01-wn-5...done! trips=3 pairs=1");
        assert_eq!(
            lines[1],
            "2019-01-wn-5...failed [/raw/yellow_tripdata_2019-01.csv] BadRecordError: line 3 broken"
        );
    }
}
