//! Buffered CSV output, one artifact per unit of work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Local;
use regex::Regex;
use tracing::{debug, error, info};

use crate::error::WriteError;
use crate::models::ListingRecord;

/// One flattened record: ordered column/value pairs.
pub type Row = Vec<(String, String)>;

/// Result of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer was empty; no artifact was created.
    NothingWritten,
    Written { path: PathBuf, rows: usize },
}

/// Buffers listing rows and writes them out as CSV.
///
/// The buffer sits behind a mutex so several tasks may add concurrently.
/// Rows leave the buffer only after their artifact has been written.
pub struct BatchWriter {
    dir: PathBuf,
    buffer: Mutex<Vec<Row>>,
    column_filter: Option<Vec<String>>,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            buffer: Mutex::new(Vec::new()),
            column_filter: None,
        }
    }

    /// Restrict every row to `columns`, in that order.
    pub fn with_column_filter(mut self, columns: Option<Vec<String>>) -> Self {
        self.column_filter = columns;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Row>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, record: &ListingRecord) {
        self.add_row(record.to_row());
    }

    pub fn add_row(&self, row: Row) {
        let row = match &self.column_filter {
            Some(columns) => row
                .into_iter()
                .filter(|(column, _)| columns.contains(column))
                .collect(),
            None => row,
        };
        let mut buffer = self.lock();
        buffer.push(row);
        debug!("Buffered row, {} pending", buffer.len());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Writes every buffered row under `label`.
    ///
    /// Columns follow `expected` (or the column filter, when set); expected
    /// columns a row lacks are left empty and columns outside the expected
    /// set are appended in first-seen order. On error the buffer is kept.
    pub fn flush(&self, label: &str, expected: &[String]) -> Result<FlushOutcome, WriteError> {
        let mut buffer = self.lock();
        if buffer.is_empty() {
            debug!("Nothing buffered for {}, skipping flush", label);
            return Ok(FlushOutcome::NothingWritten);
        }

        let columns = self.header(&buffer, expected);
        let path = self.artifact_path(label, buffer.len());

        if let Err(e) = write_csv(&path, &columns, &buffer) {
            error!(
                "Failed to write {} rows to {}: {}; rows kept for retry",
                buffer.len(),
                path.display(),
                e
            );
            return Err(e);
        }

        let rows = buffer.len();
        buffer.clear();
        info!("Wrote {} rows to {}", rows, path.display());
        Ok(FlushOutcome::Written { path, rows })
    }

    fn header(&self, rows: &[Row], expected: &[String]) -> Vec<String> {
        let mut columns: Vec<String> = match &self.column_filter {
            Some(filter) => filter.clone(),
            None => expected.to_vec(),
        };
        for row in rows {
            for (column, _) in row {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        columns
    }

    /// `{timestamp}_{label}_{count}properties.csv`, suffixed when taken.
    fn artifact_path(&self, label: &str, count: usize) -> PathBuf {
        let stem = format!(
            "{}_{}_{}properties",
            Local::now().format("%Y%m%d_%H%M%S"),
            sanitize_label(label),
            count
        );
        let mut path = self.dir.join(format!("{}.csv", stem));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.csv", stem, n));
            n += 1;
        }
        path
    }
}

fn write_csv(path: &Path, columns: &[String], rows: &[Row]) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| WriteError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(columns)?;
    for row in rows {
        let values: HashMap<&str, &str> = row
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_str()))
            .collect();
        wtr.write_record(
            columns
                .iter()
                .map(|column| values.get(column.as_str()).copied().unwrap_or("")),
        )?;
    }
    wtr.flush().map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Keeps word characters, whitespace and hyphens; whitespace runs become
/// underscores.
pub fn sanitize_label(label: &str) -> String {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    let disallowed = DISALLOWED.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static pattern"));
    let kept = disallowed.replace_all(label, "");
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        "Unknown".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), v.to_string()))
            .collect()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    fn read(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut rdr = csv::Reader::from_path(path).unwrap();
        let header = rdr.headers().unwrap().iter().map(str::to_string).collect();
        let rows = rdr
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    fn written_path(outcome: FlushOutcome) -> PathBuf {
        match outcome {
            FlushOutcome::Written { path, .. } => path,
            other => panic!("expected a written artifact, got {other:?}"),
        }
    }

    #[test]
    fn empty_flush_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BatchWriter::new(dir.path());

        let outcome = writer.flush("Sydney", &columns(&["a"])).unwrap();

        assert_eq!(outcome, FlushOutcome::NothingWritten);
        assert!(writer.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_columns_are_backfilled_and_extras_appended() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BatchWriter::new(dir.path());
        writer.add_row(row(&[("a", "1"), ("c", "3")]));
        writer.add_row(row(&[("b", "2"), ("extra", "x"), ("a", "4")]));

        let outcome = writer.flush("Sydney", &columns(&["a", "b", "c"])).unwrap();
        let path = written_path(outcome);
        let (header, rows) = read(&path);

        assert_eq!(header, columns(&["a", "b", "c", "extra"]));
        assert_eq!(rows[0], columns(&["1", "", "3", ""]));
        assert_eq!(rows[1], columns(&["4", "2", "", "x"]));
        assert!(writer.is_empty());
    }

    #[test]
    fn artifact_name_has_timestamp_label_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BatchWriter::new(dir.path());
        writer.add_row(row(&[("a", "1")]));
        writer.add_row(row(&[("a", "2")]));

        let path = written_path(writer.flush("Surry Hills (NSW)!", &columns(&["a"])).unwrap());
        let name = path.file_name().unwrap().to_str().unwrap();

        let pattern = Regex::new(r"^\d{8}_\d{6}_Surry_Hills_NSW_2properties\.csv$").unwrap();
        assert!(pattern.is_match(name), "unexpected name {name}");
    }

    #[test]
    fn same_second_flushes_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BatchWriter::new(dir.path());
        for _ in 0..2 {
            writer.add_row(row(&[("a", "1")]));
            writer.flush("Sydney", &columns(&["a"])).unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_flush_keeps_rows_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("out");
        std::fs::write(&blocked, "not a directory").unwrap();

        let writer = BatchWriter::new(&blocked);
        writer.add_row(row(&[("a", "1")]));
        assert!(writer.flush("Sydney", &columns(&["a"])).is_err());
        assert_eq!(writer.len(), 1);

        std::fs::remove_file(&blocked).unwrap();
        let outcome = writer.flush("Error_Recovery", &columns(&["a"])).unwrap();
        assert!(matches!(outcome, FlushOutcome::Written { rows: 1, .. }));
        assert!(writer.is_empty());
    }

    #[test]
    fn column_filter_restricts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            BatchWriter::new(dir.path()).with_column_filter(Some(columns(&["b", "a"])));
        writer.add_row(row(&[("a", "1"), ("b", "2"), ("c", "3")]));

        let path = written_path(writer.flush("x", &columns(&["a", "b", "c"])).unwrap());
        let (header, rows) = read(&path);
        assert_eq!(header, columns(&["b", "a"]));
        assert_eq!(rows[0], columns(&["2", "1"]));
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(BatchWriter::new(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let id = format!("{i}-{j}");
                        writer.add_row(row(&[("id", id.as_str())]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(writer.len(), 200);
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_label("Sydney"), "Sydney");
        assert_eq!(sanitize_label(" Bondi  Beach "), "Bondi_Beach");
        assert_eq!(sanitize_label("Parramatta_Multi"), "Parramatta_Multi");
        assert_eq!(sanitize_label("?!*"), "Unknown");
    }
}
