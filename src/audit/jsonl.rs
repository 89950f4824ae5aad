//! JSON Lines file sink.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{
    ambient_authority,
    fs_utf8::{Dir, OpenOptions},
};

use super::{AuditError, AuditRecord, AuditSink};

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesAuditSink {
    /// Creates a sink writing to `path`; the file and its parent directories
    /// are created on first write.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_error(&self, err: &std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.to_string(),
            message: err.to_string(),
        }
    }

    fn append_line(&self, line: &str) -> Result<(), AuditError> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self.path.file_name().ok_or_else(|| AuditError::Io {
            path: self.path.to_string(),
            message: String::from("audit log path is missing a file name"),
        })?;

        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| self.io_error(&err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| self.io_error(&err))?;
        let mut file = dir
            .open_with(file_name, OpenOptions::new().create(true).append(true))
            .map_err(|err| self.io_error(&err))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| self.io_error(&err))
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line =
            serde_json::to_string(record).map_err(|err| AuditError::Serialize(err.to_string()))?;
        line.push('\n');
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.append_line(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, BatchEntry, AuditStatus, BatchSummary};
    use tempfile::TempDir;

    fn batch_record(total: usize) -> AuditRecord {
        AuditRecord::new(
            "root@pam",
            AuditEvent::BatchCreate(BatchEntry {
                status: AuditStatus::Success,
                summary: BatchSummary::new(total, total, 0),
                operations: Vec::new(),
            }),
        )
    }

    fn read_lines(path: &Utf8Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap_or_else(|err| panic!("audit log should exist: {err}"))
            .lines()
            .map(|line| {
                serde_json::from_str(line).unwrap_or_else(|err| panic!("line should be JSON: {err}"))
            })
            .collect()
    }

    #[test]
    fn appends_one_line_per_record_and_creates_directories() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let path = root.join("logs").join("audit.log");
        let sink = JsonLinesAuditSink::new(path.clone());

        sink.record(&batch_record(1))
            .unwrap_or_else(|err| panic!("first write: {err}"));
        sink.record(&batch_record(2))
            .unwrap_or_else(|err| panic!("second write: {err}"));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.first().map(|v| v["summary"]["total_requested"].clone()), Some(1.into()));
        assert_eq!(lines.get(1).map(|v| v["operation"].clone()), Some("batch_create".into()));
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let blocker = root.join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap_or_else(|err| panic!("write blocker: {err}"));

        let sink = JsonLinesAuditSink::new(blocker.join("audit.log"));
        let error = sink.record(&batch_record(1)).expect_err("write should fail");
        assert!(matches!(error, AuditError::Io { .. }));
    }
}
