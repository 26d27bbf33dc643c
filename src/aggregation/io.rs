use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayBase, DataOwned, Dimension};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};

use super::types::{ResultMatrix, Slice};
use crate::error::TripError;
use crate::table::open_csv;
use crate::zones::ZoneId;

pub const MISSING: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MatrixFormat {
    /// `aam-*.csv` and `atm-*.csv`, undefined cells written as `NA`
    #[default]
    Csv,
    /// one `matrix-*.npz` holding pickups, dropoffs, aam and atm
    Npz,
}

/// Where finished matrices go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixSink {
    pub aam_dir: PathBuf,
    pub atm_dir: PathBuf,
    pub npz_dir: PathBuf,
    pub format: MatrixFormat,
}

impl MatrixSink {
    pub fn under(out_dir: &Path, format: MatrixFormat) -> Self {
        MatrixSink {
            aam_dir: out_dir.join("aam"),
            atm_dir: out_dir.join("atm"),
            npz_dir: out_dir.join("npz"),
            format,
        }
    }

    pub fn dirs(&self) -> Vec<&Path> {
        match self.format {
            MatrixFormat::Csv => vec![&self.aam_dir, &self.atm_dir],
            MatrixFormat::Npz => vec![&self.npz_dir],
        }
    }
}

/// `{kind}-{token}-{wd|wn}-{hour}.{ext}`
pub fn matrix_file_name(kind: &str, token: &str, slice: Slice, ext: &str) -> String {
    format!("{kind}-{token}-{slice}.{ext}")
}

pub fn write_result(
    sink: &MatrixSink,
    result: &ResultMatrix,
    token: &str,
    slice: Slice,
) -> Result<Vec<PathBuf>, TripError> {
    match sink.format {
        MatrixFormat::Csv => {
            let aam_path = sink.aam_dir.join(matrix_file_name("aam", token, slice, "csv"));
            let atm_path = sink.atm_dir.join(matrix_file_name("atm", token, slice, "csv"));
            write_matrix_csv(&aam_path, &result.pickups, &result.dropoffs, &result.aam)?;
            write_matrix_csv(&atm_path, &result.pickups, &result.dropoffs, &result.atm)?;
            Ok(vec![aam_path, atm_path])
        }
        MatrixFormat::Npz => {
            let path = sink.npz_dir.join(matrix_file_name("matrix", token, slice, "npz"));
            save_npz(&path, result)?;
            Ok(vec![path])
        }
    }
}

/// Header row is an empty corner cell followed by dropoff ids; each row starts
/// with its pickup id.
pub fn write_matrix_csv(
    path: &Path,
    rows: &[ZoneId],
    cols: &[ZoneId],
    values: &Array2<f64>,
) -> Result<(), TripError> {
    let file = File::create(path).map_err(|e| TripError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);

    let mut header = Vec::with_capacity(cols.len() + 1);
    header.push(String::new());
    header.extend(cols.iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for (r, pu) in rows.iter().enumerate() {
        let mut record = Vec::with_capacity(cols.len() + 1);
        record.push(pu.to_string());
        record.extend(values.row(r).iter().map(|v| format_cell(*v)));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| TripError::io(path, e))?;
    Ok(())
}

fn format_cell(v: f64) -> String {
    if v.is_nan() {
        MISSING.to_string()
    } else {
        v.to_string()
    }
}

/// A matrix read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub rows: Vec<ZoneId>,
    pub cols: Vec<ZoneId>,
    pub values: Array2<f64>,
}

pub fn read_matrix_csv(path: &Path) -> Result<LabeledMatrix, TripError> {
    let mut reader = open_csv(path, false)?;
    let header = reader.headers()?.clone();
    let cols = header
        .iter()
        .skip(1)
        .map(|c| parse_label(c, 1))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    let mut cells = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        rows.push(parse_label(record.get(0).unwrap_or_default(), line)?);
        for raw in record.iter().skip(1) {
            cells.push(parse_cell(raw, line)?);
        }
    }
    let mut values = Array2::from_elem((rows.len(), cols.len()), f64::NAN);
    for (dst, v) in values.iter_mut().zip(cells) {
        *dst = v;
    }
    Ok(LabeledMatrix { rows, cols, values })
}

fn parse_label(raw: &str, line: u64) -> Result<ZoneId, TripError> {
    raw.trim().parse().map_err(|_| TripError::InvalidField {
        line,
        column: "zone label",
        value: raw.to_string(),
    })
}

fn parse_cell(raw: &str, line: u64) -> Result<f64, TripError> {
    let raw = raw.trim();
    if raw == MISSING || raw.is_empty() {
        return Ok(f64::NAN);
    }
    raw.parse().map_err(|_| TripError::InvalidField {
        line,
        column: "matrix cell",
        value: raw.to_string(),
    })
}

pub fn save_npz(path: &Path, result: &ResultMatrix) -> Result<(), TripError> {
    let npz_err = |e: &dyn std::fmt::Display| TripError::Npz {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let f = File::create(path).map_err(|e| TripError::io(path, e))?;
    let mut npz = NpzWriter::new(f);
    npz.add_array("pickups.npy", &Array1::from_vec(result.pickups.clone()))
        .map_err(|e| npz_err(&e))?;
    npz.add_array("dropoffs.npy", &Array1::from_vec(result.dropoffs.clone()))
        .map_err(|e| npz_err(&e))?;
    npz.add_array("aam.npy", &result.aam).map_err(|e| npz_err(&e))?;
    npz.add_array("atm.npy", &result.atm).map_err(|e| npz_err(&e))?;
    npz.finish().map_err(|e| npz_err(&e))?;
    Ok(())
}

fn read_array<R, S, D>(
    npz: &mut NpzReader<R>,
    path: &Path,
    name: &str,
) -> Result<ArrayBase<S, D>, TripError>
where
    R: std::io::Read + std::io::Seek,
    S: DataOwned,
    S::Elem: ReadableElement,
    D: Dimension,
{
    npz.by_name(name).map_err(|e| TripError::Npz {
        path: path.to_path_buf(),
        message: format!("missing {name}: {e}"),
    })
}

pub fn load_npz(path: &Path) -> Result<ResultMatrix, TripError> {
    let f = File::open(path).map_err(|e| TripError::io(path, e))?;
    let mut npz = NpzReader::new(f).map_err(|e| TripError::Npz {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let pickups: Array1<ZoneId> = read_array(&mut npz, path, "pickups.npy")?;
    let dropoffs: Array1<ZoneId> = read_array(&mut npz, path, "dropoffs.npy")?;
    let aam: Array2<f64> = read_array(&mut npz, path, "aam.npy")?;
    let atm: Array2<f64> = read_array(&mut npz, path, "atm.npy")?;
    Ok(ResultMatrix {
        pickups: pickups.to_vec(),
        dropoffs: dropoffs.to_vec(),
        aam,
        atm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::types::{DayClass, MatrixAxes, PairStats, PartialMatrix};

    fn sample_result() -> ResultMatrix {
        let mut p = PartialMatrix::new();
        p.insert(10, 20, PairStats { days: 2, trips: 3, duration_sum: 1000.0 });
        p.insert(20, 10, PairStats { days: 1, trips: 1, duration_sum: 420.5 });
        let axes = MatrixAxes {
            pickups: crate::aggregation::types::Axis::Fixed(vec![4, 10, 20]),
            dropoffs: crate::aggregation::types::Axis::Fixed(vec![10, 20]),
        };
        ResultMatrix::from_partial(&p, &axes)
    }

    fn same_cells(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.is_nan(), y.is_nan());
            if !x.is_nan() {
                assert!((x - y).abs() < 1e-9, "{x} != {y}");
            }
        }
    }

    #[test]
    fn test_csv_round_trip_keeps_nan_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aam.csv");
        let r = sample_result();
        write_matrix_csv(&path, &r.pickups, &r.dropoffs, &r.aam).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), ",10,20");
        assert_eq!(text.lines().nth(1).unwrap(), "4,NA,NA");

        let back = read_matrix_csv(&path).unwrap();
        assert_eq!(back.rows, r.pickups);
        assert_eq!(back.cols, r.dropoffs);
        same_cells(&back.values, &r.aam);
    }

    #[test]
    fn test_npz_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.npz");
        let r = sample_result();
        save_npz(&path, &r).unwrap();
        let back = load_npz(&path).unwrap();
        assert_eq!(back.pickups, r.pickups);
        same_cells(&back.aam, &r.aam);
        same_cells(&back.atm, &r.atm);
    }

    #[test]
    fn test_write_result_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MatrixSink::under(dir.path(), MatrixFormat::Csv);
        for d in sink.dirs() {
            std::fs::create_dir_all(d).unwrap();
        }
        let written = write_result(&sink, &sample_result(), "2019-01", Slice::new(DayClass::Weekend, 7)).unwrap();
        assert_eq!(written[0], dir.path().join("aam").join("aam-2019-01-wn-7.csv"));
        assert_eq!(written[1], dir.path().join("atm").join("atm-2019-01-wn-7.csv"));
        assert!(written.iter().all(|p| p.is_file()));
    }
}
