//! Source files: pattern resolution and delimited-text reading.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;

use crate::config::SourceConfig;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {} at line {line}: {source}", path.display())]
    Csv {
        path: PathBuf,
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no header row", path.display())]
    MissingHeader { path: PathBuf },
}

impl SourceError {
    /// True when the caller asked for something malformed, as opposed to a
    /// file that could not be read.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, SourceError::InvalidPattern { .. })
    }
}

/// Expand `pattern` to regular files, canonicalized, sorted and deduplicated.
///
/// No matches is not an error.
pub fn resolve_pattern(pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let entries = glob::glob(pattern).map_err(|source| SourceError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            SourceError::Io {
                path,
                source: io::Error::from(e),
            }
        })?;
        if !path.is_file() {
            continue;
        }
        let canonical = path
            .canonicalize()
            .map_err(|source| SourceError::Io { path, source })?;
        files.push(canonical);
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// The string recorded in a schema's `settings` for `path`.
pub fn location(path: &Path) -> String {
    path.display().to_string()
}

/// Schema name for a file: its base name without the final extension.
pub fn schema_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| location(path))
}

/// Header-first reader over one delimited file.
pub struct SourceReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    headers: Vec<String>,
}

impl SourceReader {
    pub fn open(path: &Path, config: SourceConfig) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Rows of the wrong width are handled by callers, not rejected here
        let mut reader = ReaderBuilder::new()
            .delimiter(config.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| SourceError::Csv {
                path: path.to_path_buf(),
                line: 1,
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.is_empty() {
            return Err(SourceError::MissingHeader {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Read the next data row into `record`. Returns `false` at end of file.
    pub fn read_record(&mut self, record: &mut StringRecord) -> Result<bool, SourceError> {
        self.reader.read_record(record).map_err(|source| {
            let line = source.position().map(|p| p.line()).unwrap_or(0);
            SourceError::Csv {
                path: self.path.clone(),
                line,
                source,
            }
        })
    }
}
