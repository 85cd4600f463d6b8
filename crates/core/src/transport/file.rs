use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Sink;
use crate::error::{Result, StreamError};

/// Append-only elementary stream file.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StreamError::OpenOutput {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "output file opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.writer.write_all(data).map_err(StreamError::Write)?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush().map_err(StreamError::Write)?;
        tracing::debug!(path = %self.path.display(), "output file flushed");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
