use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::error::Result;

/// Owns the output directory and creates run artifacts inside it.
pub struct OutputManager {
    output_dir: PathBuf,
}

impl OutputManager {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Creates (or truncates) `filename` in the output directory, creating
    /// the directory if needed, and wraps it in an [`ArraySink`].
    pub fn create_array(&self, filename: &str) -> Result<(PathBuf, ArraySink<BufWriter<File>>)> {
        fs::create_dir_all(&self.output_dir)?;
        let file_path = self.output_dir.join(filename);
        let file = File::create(&file_path)?;
        debug!("Writing JSON array to {}", file_path.display());
        Ok((file_path, ArraySink::new(BufWriter::new(file))))
    }
}

/// Incremental JSON array writer.
///
/// Elements are serialized compactly, one per line, as they arrive; only the
/// element being written is ever held in memory. The document is valid JSON
/// only after [`ArraySink::finish`].
pub struct ArraySink<W: Write> {
    writer: W,
    opened: bool,
    closed: bool,
    count: u64,
}

impl<W: Write> ArraySink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            opened: false,
            closed: false,
            count: 0,
        }
    }

    /// Writes the opening bracket. Idempotent.
    pub fn begin(&mut self) -> Result<()> {
        if !self.opened {
            self.writer.write_all(b"[\n")?;
            self.opened = true;
        }
        Ok(())
    }

    /// Appends one element, preceded by a separator unless it is the first.
    pub fn write_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.begin()?;
        if self.count > 0 {
            self.writer.write_all(b",\n")?;
        }
        serde_json::to_writer(&mut self.writer, value)?;
        self.count += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of elements written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes the closing bracket and flushes. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.begin()?;
        if self.count > 0 {
            self.writer.write_all(b"\n")?;
        }
        self.writer.write_all(b"]\n")?;
        self.writer.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_array() {
        let mut sink = ArraySink::new(Vec::new());
        sink.finish().unwrap();
        sink.finish().unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "[\n]\n");
    }

    #[test]
    fn test_two_elements_no_trailing_comma() {
        let mut sink = ArraySink::new(Vec::new());
        sink.write_element(&json!({"a": 1})).unwrap();
        sink.write_element(&json!({"b": 2})).unwrap();
        assert_eq!(sink.count(), 2);

        sink.finish().unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "[\n{\"a\":1},\n{\"b\":2}\n]\n");

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unfinished_array_is_left_open() {
        let mut sink = ArraySink::new(Vec::new());
        sink.write_element(&json!(1)).unwrap();
        sink.flush().unwrap();
        let partial = String::from_utf8(sink.into_inner()).unwrap();

        assert_eq!(partial, "[\n1");
        assert!(serde_json::from_str::<Vec<u32>>(&partial).is_err());
    }

    #[test]
    fn test_output_manager_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OutputManager::new(dir.path().join("nested").join("out"));

        let (path, mut sink) = manager.create_array("events.json").unwrap();
        sink.write_element(&json!({"event_id": 4624})).unwrap();
        sink.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.starts_with('\u{feff}'));
        assert_eq!(text, "[\n{\"event_id\":4624}\n]\n");
    }
}
