//! Snapshot artifact: the CSV file a fetch run produces and a build consumes.
//!
//! Each extraction run is a point-in-time snapshot: `SnapshotWriter::create`
//! truncates, and every appended batch is flushed before the cursor advances
//! upstream, so an interrupted run loses at most the batch in flight.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors while writing or reading a snapshot file.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Format(#[from] csv::Error),
}

/// One ingested job listing.
///
/// `id` is the unique keyset-pagination key; `engagement` is the
/// responses-per-day velocity computed upstream; `body` keeps the raw
/// (possibly HTML) description so downstream rewriting sees the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub specialization: Option<String>,
    pub skills: Option<String>,
    pub engagement: f64,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_champion: bool,
}

/// Appending CSV writer for one extraction run.
///
/// The header row is emitted once, before the first record.
pub struct SnapshotWriter {
    writer: csv::Writer<File>,
    rows: u64,
}

impl SnapshotWriter {
    /// Start a new snapshot at `path`, truncating any previous one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let writer = csv::Writer::from_path(path)?;
        Ok(Self { writer, rows: 0 })
    }

    /// Serialize a batch of listings and flush them to disk.
    pub fn append(&mut self, batch: &[Listing]) -> Result<(), SnapshotError> {
        for listing in batch {
            self.writer.serialize(listing)?;
        }
        self.writer.flush()?;
        self.rows += batch.len() as u64;
        Ok(())
    }

    /// Rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flush and close the snapshot, returning the total row count.
    pub fn finish(mut self) -> Result<u64, SnapshotError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Read a whole snapshot into memory.
///
/// A file missing one of the required columns fails here, before any
/// embedding work starts.
pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<Vec<Listing>, SnapshotError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut listings = Vec::new();
    for record in reader.deserialize() {
        listings.push(record?);
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(id: i64) -> Listing {
        Listing {
            id,
            title: format!("Listing {id}"),
            body: format!("<p>Description {id}</p>"),
            specialization: Some("Engineering".to_string()),
            skills: None,
            engagement: id as f64 * 0.5,
            published_at: Some(Utc::now()),
            updated_at: None,
            is_champion: id % 2 == 0,
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("listings.csv");

        let rows = vec![listing(1), listing(2), listing(3)];
        let mut writer = SnapshotWriter::create(&path).unwrap();
        writer.append(&rows).unwrap();
        let written = writer.finish().unwrap();
        assert_eq!(written, 3);

        let back = read_snapshot(&path).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0].id, 1);
        assert_eq!(back[1].specialization.as_deref(), Some("Engineering"));
        assert!(back[1].skills.is_none(), "empty field should read as None");
        assert!(back[2].updated_at.is_none());
        assert!(back[1].is_champion);
    }

    #[test]
    fn test_append_accumulates_batches() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("listings.csv");

        let mut writer = SnapshotWriter::create(&path).unwrap();
        writer.append(&[listing(1), listing(2)]).unwrap();
        writer.append(&[listing(3)]).unwrap();
        assert_eq!(writer.rows_written(), 3);
        writer.finish().unwrap();

        let back = read_snapshot(&path).unwrap();
        let ids: Vec<i64> = back.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2, 3], "batches should append in order");
    }

    #[test]
    fn test_create_truncates_previous_snapshot() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("listings.csv");

        let mut first = SnapshotWriter::create(&path).unwrap();
        first.append(&[listing(1), listing(2)]).unwrap();
        first.finish().unwrap();

        let mut second = SnapshotWriter::create(&path).unwrap();
        second.append(&[listing(9)]).unwrap();
        second.finish().unwrap();

        let back = read_snapshot(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, 9);
    }

    #[test]
    fn test_empty_snapshot_reads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("listings.csv");

        let writer = SnapshotWriter::create(&path).unwrap();
        writer.finish().unwrap();

        let back = read_snapshot(&path).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("broken.csv");
        // No engagement column
        std::fs::write(
            &path,
            "id,title,body,specialization,skills,published_at,updated_at,is_champion\n\
             1,Dev,text,,,,,true\n",
        )
        .unwrap();

        let result = read_snapshot(&path);
        assert!(result.is_err(), "missing required column must fail the read");
    }
}
