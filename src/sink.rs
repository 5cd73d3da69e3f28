use crate::buffer::Batch;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Default export file name inside the save directory.
pub const DEFAULT_FILE_NAME: &str = "sensor_record.csv";

/// Durable destination for flushed batches.
pub trait BatchSink: Send {
    /// Append `batch` to the destination. An empty batch is a no-op.
    fn export(&mut self, batch: &Batch) -> Result<()>;

    /// Flush anything buffered. Called once when the session ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: BatchSink + ?Sized> BatchSink for Box<S> {
    fn export(&mut self, batch: &Batch) -> Result<()> {
        (**self).export(batch)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Row-oriented CSV export.
///
/// The first non-empty export truncates the file and writes the header; all
/// later exports append rows only. The directory is created on demand.
pub struct CsvSink {
    path: PathBuf,
    header_written: bool,
    rows_written: usize,
}

impl CsvSink {
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
            header_written: false,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written during this session (header excluded).
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn open(&self) -> Result<File> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = if self.header_written {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            File::create(&self.path)?
        };
        Ok(file)
    }
}

impl BatchSink for CsvSink {
    fn export(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut writer = csv::Writer::from_writer(self.open()?);
        if !self.header_written {
            writer.write_record(batch.columns())?;
        }
        for row in batch.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;

        self.header_written = true;
        self.rows_written += batch.len();
        log::debug!(
            "Exported {} rows to '{}'",
            batch.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Keeps exported batches in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: std::sync::Arc<std::sync::Mutex<Vec<Batch>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the exported batches; stays valid after the sink moves
    /// into a session.
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            batches: self.batches.clone(),
        }
    }
}

impl BatchSink for MemorySink {
    fn export(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(batch.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    batches: std::sync::Arc<std::sync::Mutex<Vec<Batch>>>,
}

impl MemorySinkHandle {
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::types::{AcquisitionMode, Reading};
    use crate::watchlist::WatchSpec;
    use serde_json::json;

    fn buffer_with(temps: &[i64]) -> SampleBuffer {
        let spec = WatchSpec::from_json_str(
            r#"[
                {"endpoint": "state", "items": [{"name": "state", "key": null}]},
                {"endpoint": "hotend", "items": [{"name": "temp", "key": "current"}]}
            ]"#,
        )
        .unwrap();
        let mut buffer = SampleBuffer::new(&spec).unwrap();
        for (i, temp) in temps.iter().enumerate() {
            buffer.write_tick(
                Reading::Text(format!("12:00:0{}.000000", i)),
                &[Some(json!("printing")), Some(json!({"current": temp}))],
                AcquisitionMode::Append,
            );
        }
        buffer
    }

    fn read_back(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn test_header_written_once_across_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("nested/record"), DEFAULT_FILE_NAME);
        let mut buffer = buffer_with(&[200, 205, 210]);

        sink.export(&buffer.pop_batch(2)).unwrap();
        sink.export(&buffer.pop_batch(2)).unwrap();
        assert_eq!(sink.rows_written(), 3);

        let (header, rows) = read_back(sink.path());
        assert_eq!(header, vec!["time", "state", "temp"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["12:00:00.000000", "printing", "200"]);
        assert_eq!(rows[2], vec!["12:00:02.000000", "printing", "210"]);

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.matches("time,state,temp").count(), 1);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path(), DEFAULT_FILE_NAME);
        let mut buffer = buffer_with(&[]);

        sink.export(&buffer.pop_batch(9)).unwrap();
        assert!(!sink.path().exists());

        let mut buffer2 = buffer_with(&[200]);
        sink.export(&buffer2.pop_batch(9)).unwrap();
        sink.export(&buffer.pop_batch(9)).unwrap();
        let (header, rows) = read_back(sink.path());
        assert_eq!(header.len(), 3);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_new_session_truncates_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = CsvSink::new(dir.path(), DEFAULT_FILE_NAME);
        first.export(&buffer_with(&[200, 201]).pop_batch(2)).unwrap();

        let mut second = CsvSink::new(dir.path(), DEFAULT_FILE_NAME);
        second.export(&buffer_with(&[190]).pop_batch(1)).unwrap();

        let (_, rows) = read_back(second.path());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], "190");
    }

    #[test]
    fn test_null_readings_written_as_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path(), DEFAULT_FILE_NAME);
        let spec = WatchSpec::from_json_str(
            r#"[{"endpoint": "hotend", "items": [{"name": "temp", "key": "current"}]}]"#,
        )
        .unwrap();
        let mut buffer = SampleBuffer::new(&spec).unwrap();
        buffer.write_tick(Reading::from("t0"), &[None], AcquisitionMode::Append);
        sink.export(&buffer.pop_batch(1)).unwrap();

        let (_, rows) = read_back(sink.path());
        assert_eq!(rows, vec![vec!["t0".to_string(), String::new()]]);
    }
}
