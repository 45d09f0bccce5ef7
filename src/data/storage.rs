//! Append-only CSV sample log.
use crate::{
    config::StorageConfig,
    core::{RecordAppender, Sample},
    error::DaqError,
};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Appends one `timestamp,value` line per accepted sample.
///
/// The file is opened in append mode and never truncated. There is no header row,
/// so logs from successive runs concatenate cleanly.
///
/// Each record is encoded into its own buffer and written with a single
/// `write_all`. A failed write is rolled back to the previous file length, so
/// the log never holds a partial line and nothing from a failed call is left
/// pending for the next one.
pub struct CsvAppender {
    path: PathBuf,
    file: Mutex<File>,
    sync_each_record: bool,
}

impl std::fmt::Debug for CsvAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvAppender")
            .field("path", &self.path)
            .field("sync_each_record", &self.sync_each_record)
            .finish()
    }
}

impl CsvAppender {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>, sync_each_record: bool) -> Result<Self, DaqError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DaqError::Persistence(e.to_string()))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                DaqError::Persistence(format!("Failed to open {}: {}", path.display(), e))
            })?;

        tracing::info!(path = %path.display(), "sample log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            sync_each_record,
        })
    }

    /// Open the log described by the `[storage]` section.
    pub fn from_config(config: &StorageConfig) -> Result<Self, DaqError> {
        Self::open(&config.log_path, config.sync_each_record)
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One CSV line for `sample`, newline included.
fn encode_record(sample: &Sample) -> Result<Vec<u8>, DaqError> {
    let time = sample.formatted_time();
    let value = sample.value.to_string();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(time.len() + value.len() + 2));
    writer.write_record([time.as_str(), value.as_str()])?;
    writer
        .into_inner()
        .map_err(|e| DaqError::Persistence(e.to_string()))
}

/// A byte sink that can be cut back to an earlier length.
trait Truncate: Write {
    fn current_len(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn current_len(&mut self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `record` completely or not at all.
fn write_whole<S: Truncate>(sink: &mut S, record: &[u8]) -> io::Result<()> {
    let start = sink.current_len()?;
    if let Err(e) = sink.write_all(record).and_then(|()| sink.flush()) {
        if let Err(rollback) = sink.truncate_to(start) {
            tracing::warn!(error = %rollback, "failed to roll back partial record");
        }
        return Err(e);
    }
    Ok(())
}

impl RecordAppender for CsvAppender {
    fn append(&self, sample: &Sample) -> Result<(), DaqError> {
        let record = encode_record(sample)?;

        let mut file = self.file.lock();
        write_whole(&mut *file, &record).map_err(|e| DaqError::Persistence(e.to_string()))?;
        if self.sync_each_record {
            file.sync_data()
                .map_err(|e| DaqError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), DaqError> {
        self.file
            .lock()
            .sync_all()
            .map_err(|e| DaqError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// In-memory sink that accepts at most `budget` more bytes, then fails.
    struct ShortDisk {
        bytes: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "file too large"));
            }
            let n = buf.len().min(self.budget);
            self.bytes.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for ShortDisk {
        fn current_len(&mut self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_write_leaves_no_partial_or_pending_record() {
        let first = encode_record(&Sample::new(0.0, 1.0)).unwrap();
        let second = encode_record(&Sample::new(1.0, 2.0)).unwrap();
        let third = encode_record(&Sample::new(2.0, 3.0)).unwrap();

        let mut sink = ShortDisk {
            bytes: Vec::new(),
            budget: first.len() + 10,
        };
        write_whole(&mut sink, &first).unwrap();
        assert!(write_whole(&mut sink, &second).is_err());
        assert_eq!(sink.bytes, first);

        sink.budget = usize::MAX;
        write_whole(&mut sink, &third).unwrap();
        assert_eq!(
            String::from_utf8(sink.bytes).unwrap(),
            "1970-01-01 00:00:00.000,1\n1970-01-01 00:00:02.000,3\n"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_is_persistence_error() {
        // Every write to /dev/full fails with ENOSPC.
        let appender = CsvAppender::open("/dev/full", false).unwrap();
        let err = appender.append(&Sample::new(0.0, 1.0)).unwrap_err();
        assert!(err.is_persistence());
        assert!(appender.append(&Sample::new(1.0, 2.0)).unwrap_err().is_persistence());
    }

    #[test]
    fn writes_one_line_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let appender = CsvAppender::open(&path, false).unwrap();

        appender.append(&Sample::new(0.0, 1.5)).unwrap();
        appender.append(&Sample::new(1.25, -3.0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "1970-01-01 00:00:00.000,1.5\n1970-01-01 00:00:01.250,-3\n"
        );
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.csv");

        CsvAppender::open(&path, true)
            .unwrap()
            .append(&Sample::new(0.0, 1.0))
            .unwrap();
        let appender = CsvAppender::open(&path, true).unwrap();
        appender.append(&Sample::new(1.0, 2.0)).unwrap();
        appender.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn concurrent_appends_keep_record_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let appender = Arc::new(CsvAppender::open(&path, false).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let appender = appender.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        appender
                            .append(&Sample::new(i as f64, (t * 1000 + i) as f64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1000);
        for line in lines {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 2, "torn record: {line}");
            fields[1].parse::<f64>().unwrap();
        }
    }

    #[test]
    fn open_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let err = CsvAppender::open(dir.path(), false).unwrap_err();
        assert!(err.is_persistence());
    }
}
