//! Transcript file: every discover response and published record, as
//! pretty JSON, grouped by case.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tabula_protocol::{DiscoverResponse, PublishRecord};

const SEPARATOR_WIDTH: usize = 50;

pub struct Transcript {
    path: PathBuf,
    out: BufWriter<File>,
}

impl Transcript {
    /// Create (or truncate) the transcript at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin_case(&mut self, name: &str) -> io::Result<()> {
        let rule = "-".repeat(SEPARATOR_WIDTH);
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out, "{}", name)?;
        writeln!(self.out, "{}", rule)
    }

    pub fn discover_response(&mut self, response: &DiscoverResponse) -> io::Result<()> {
        writeln!(self.out, "discover response:")?;
        self.write_json(response)?;
        writeln!(self.out)
    }

    pub fn record(&mut self, record: &PublishRecord) -> io::Result<()> {
        self.write_json(record)
    }

    pub fn note(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut self.out, value)?;
        writeln!(self.out)
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
