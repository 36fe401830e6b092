//! Rotating newline-delimited JSON output.
//!
//! Events are appended one per line to `{base}_{index}{extension}`. After
//! each write the running byte count of the current file is compared with
//! the threshold; once it is exceeded the next event starts a new file with
//! the next index. A single record is never split, so a file can overshoot
//! the threshold by at most one record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CollectorError, Result};

/// Default rotation threshold (500 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Name of the output file with the given index.
pub fn file_name(base: &str, extension: &str, index: u32) -> String {
    format!("{}_{}{}", base, index, extension)
}

/// Writer that spreads events over size-capped files.
///
/// Files are opened in append mode on the first event written to them, so a
/// rotation that happens after the last event never leaves an empty file
/// behind and re-running with the same base name never truncates earlier
/// output. The byte counter only covers bytes written by this writer.
#[derive(Debug)]
pub struct RotatingOutput {
    base: String,
    extension: String,
    max_file_size: u64,
    index: u32,
    current_size: u64,
    writer: Option<BufWriter<File>>,
    files: Vec<PathBuf>,
}

impl RotatingOutput {
    pub fn new(base: impl Into<String>, extension: impl Into<String>, max_file_size: u64) -> Self {
        Self {
            base: base.into(),
            extension: extension.into(),
            max_file_size,
            index: 0,
            current_size: 0,
            writer: None,
            files: Vec::new(),
        }
    }

    /// Path of the file the next event goes to.
    pub fn current_path(&self) -> PathBuf {
        PathBuf::from(file_name(&self.base, &self.extension, self.index))
    }

    /// Append one event as a single JSON line, rotating afterwards if the
    /// current file went over the threshold.
    pub fn write_event<T: Serialize + ?Sized>(&mut self, event: &T) -> Result<()> {
        let line = serde_json::to_string(event).map_err(|e| self.output_error(e.into()))?;

        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => BufWriter::new(self.open_current()?),
        };
        let writer = self.writer.insert(writer);

        let written = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"));
        written.map_err(|e| self.output_error(e))?;

        self.current_size += line.len() as u64 + 1;

        if self.current_size > self.max_file_size {
            self.rotate()?;
        }

        Ok(())
    }

    /// Flush buffered output of the current file to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| self.output_error(e))?;
        }
        Ok(())
    }

    /// Flush and close the current file, returning every file written.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.flush()?;
        self.writer = None;
        Ok(std::mem::take(&mut self.files))
    }

    /// Index of the file the next event goes to.
    pub fn file_index(&self) -> u32 {
        self.index
    }

    /// Bytes written to the current file so far.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;

        info!(
            file = %self.current_path().display(),
            size_bytes = self.current_size,
            max_file_size = self.max_file_size,
            "Output file reached size limit, rotating"
        );

        self.index += 1;
        self.current_size = 0;
        Ok(())
    }

    fn open_current(&mut self) -> Result<File> {
        let path = self.current_path();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| output_error(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| output_error(&path, e))?;

        debug!(file = %path.display(), index = self.index, "Opened output file");
        self.files.push(path);
        Ok(file)
    }

    fn output_error(&self, source: io::Error) -> CollectorError {
        output_error(&self.current_path(), source)
    }
}

fn output_error(path: &Path, source: io::Error) -> CollectorError {
    CollectorError::Output {
        path: path.to_path_buf(),
        source,
    }
}
