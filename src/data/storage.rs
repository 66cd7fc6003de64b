//! Row-oriented text files of parallel numeric arrays.
//!
//! One line per array, values in `%.18e` separated by single spaces. Row
//! `k` of a procedure's file is one measurement record (or the stimulus), so
//! column `j` of every row belongs to the same sweep point.

use crate::error::{BenchError, BenchResult};
use crate::instrument::scpi::format_exponential;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Digits after the decimal point in persisted values.
pub const PRECISION: usize = 18;

/// Write `rows` to `path`, one row per line.
pub fn write_rows(path: &Path, rows: &[&[f64]]) -> BenchResult<()> {
    if let Some(first) = rows.first() {
        if let Some(bad) = rows.iter().find(|row| row.len() != first.len()) {
            return Err(BenchError::InvalidSweep(format!(
                "cannot save rows of different lengths ({} vs {})",
                first.len(),
                bad.len()
            )));
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        let line = row
            .iter()
            .map(|&v| format_exponential(v, PRECISION))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = rows.len(), "Saved data");
    Ok(())
}

/// Read a file written by [`write_rows`] (or any whitespace-delimited file).
pub fn read_rows(path: &Path) -> BenchResult<Vec<Vec<f64>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|field| {
                field.parse::<f64>().map_err(|_| BenchError::Parse {
                    command: path.display().to_string(),
                    response: field.to_string(),
                })
            })
            .collect::<BenchResult<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demod.txt");
        let freq = [6000.0, 6200.0];
        let lsb = [0.5, 0.25];

        write_rows(&path, &[&freq, &lsb]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "6.000000000000000000e+03 6.200000000000000000e+03"
        );
        assert_eq!(
            lines[1],
            "5.000000000000000000e-01 2.500000000000000000e-01"
        );

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows, vec![freq.to_vec(), lsb.to_vec()]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.txt");
        let err = write_rows(&path, &[&[1.0, 2.0], &[1.0]]).unwrap_err();
        assert!(matches!(err, BenchError::InvalidSweep(_)));
    }
}
