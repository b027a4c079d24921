//! Streaming publish: re-read a schema's files and emit one typed record
//! per well-formed row.
//!
//! Rows are read on the blocking pool and handed to the async side through
//! a bounded channel, so a slow consumer applies back-pressure to the reader.
//! Order is fixed: files in `settings` order, then rows in file order.

use std::path::PathBuf;
use std::time::Instant;

use csv::StringRecord;
use serde_json::Value;
use tabula_protocol::defaults::PUBLISH_CHANNEL_CAPACITY;
use tabula_protocol::{
    CancellationToken, ErrorKind, PublishRecord, PublishRequest, PublishSummary, Schema,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{InferenceConfig, SourceConfig};
use crate::discovery::files_with_signature;
use crate::source::{SourceError, SourceReader};
use crate::type_inference::{classify, convert};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Deadline exceeded after {records} record(s)")]
    DeadlineExceeded { records: u64 },

    #[error("Cancelled by signal")]
    Cancelled,

    #[error("Record receiver closed")]
    Disconnected,
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Source(e) if e.is_bad_request() => ErrorKind::BadRequest,
            PublishError::Source(_) => ErrorKind::FileRead,
            PublishError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            PublishError::Cancelled => ErrorKind::Cancelled,
            PublishError::Disconnected => ErrorKind::Internal,
        }
    }
}

/// A row whose cell count differs from the schema's property count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowShapeMismatch {
    pub expected: usize,
    pub got: usize,
}

/// Items produced by [`Publisher::stream`]. Exactly one `End` or `Failed`
/// closes every stream.
#[derive(Debug)]
pub enum PublishEvent {
    Record(PublishRecord),
    End(PublishSummary),
    Failed(PublishError),
}

/// Validate one row against the schema and convert it.
///
/// Cells are classified on their own and compared to the declared column
/// types left to right. The first cell the column does not accept becomes
/// null and marks the record invalid; every other cell is converted to its
/// declared type.
pub fn validate_row(
    schema: &Schema,
    cells: &[&str],
    config: &InferenceConfig,
) -> Result<PublishRecord, RowShapeMismatch> {
    if cells.len() != schema.properties.len() {
        return Err(RowShapeMismatch {
            expected: schema.properties.len(),
            got: cells.len(),
        });
    }

    let mismatch = schema
        .properties
        .iter()
        .zip(cells)
        .enumerate()
        .find_map(|(idx, (prop, cell))| {
            let observed = classify(cell, config.boolean_tokens);
            (!prop.property_type.accepts(observed)).then_some((idx, observed))
        });

    let mut data = Vec::with_capacity(cells.len());
    let mut conversion_error = None;
    for (idx, (prop, cell)) in schema.properties.iter().zip(cells).enumerate() {
        if matches!(mismatch, Some((bad, _)) if bad == idx) {
            data.push(Value::Null);
            continue;
        }
        match convert(prop.property_type, cell, config) {
            Ok(value) => data.push(value),
            Err(e) => {
                data.push(Value::Null);
                conversion_error.get_or_insert_with(|| {
                    format!("column {} ({}): {}", idx, prop.name, e)
                });
            }
        }
    }

    Ok(match mismatch {
        Some((idx, observed)) => {
            let prop = &schema.properties[idx];
            PublishRecord::invalid(
                data,
                format!(
                    "column {} ({}): expected {}, got {} '{}'",
                    idx, prop.name, prop.property_type, observed, cells[idx]
                ),
            )
        }
        None => match conversion_error {
            Some(error) => PublishRecord::invalid(data, error),
            None => PublishRecord::valid(data),
        },
    })
}

/// Files a publish request reads, in order.
///
/// A schema carrying `settings` is read from exactly those files. Otherwise
/// the request's pattern is resolved and filtered to files whose header
/// matches the schema's signature.
pub fn resolve_files(
    request: &PublishRequest,
    source: SourceConfig,
) -> Result<Vec<PathBuf>, SourceError> {
    if !request.schema.settings.is_empty() {
        return Ok(request.schema.settings.iter().map(PathBuf::from).collect());
    }
    files_with_signature(&request.pattern, &request.schema.signature(), source)
}

/// Read `files` row by row and hand each record to `emit`.
///
/// `emit` returns `false` when the consumer has gone away. Cancellation
/// and the deadline are checked before every row.
pub fn publish_rows<F>(
    files: &[PathBuf],
    schema: &Schema,
    inference: &InferenceConfig,
    source: SourceConfig,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    mut emit: F,
) -> Result<PublishSummary, PublishError>
where
    F: FnMut(PublishRecord) -> bool,
{
    let mut summary = PublishSummary::default();
    let mut record = StringRecord::new();

    for path in files {
        let mut reader = SourceReader::open(path, source)?;
        let mut line = 1u64;

        loop {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(PublishError::DeadlineExceeded {
                    records: summary.records,
                });
            }
            if !reader.read_record(&mut record)? {
                break;
            }
            line += 1;

            let cells: Vec<&str> = record.iter().collect();
            match validate_row(schema, &cells, inference) {
                Ok(published) => {
                    if !emit(published) {
                        return Err(PublishError::Disconnected);
                    }
                    summary.records += 1;
                }
                Err(shape) => {
                    debug!(
                        "{}:{}: skipping row with {} cell(s), expected {}",
                        path.display(),
                        line,
                        shape.got,
                        shape.expected
                    );
                    summary.skipped_rows += 1;
                }
            }
        }
    }

    if summary.skipped_rows > 0 {
        warn!(
            "Schema '{}': skipped {} row(s) with wrong cell count",
            schema.name, summary.skipped_rows
        );
    }
    Ok(summary)
}

/// Spawns publish streams.
#[derive(Debug, Clone)]
pub struct Publisher {
    inference: InferenceConfig,
    source: SourceConfig,
}

impl Publisher {
    pub fn new(inference: InferenceConfig, source: SourceConfig) -> Self {
        Self { inference, source }
    }

    /// Start streaming `request` on the blocking pool.
    ///
    /// Dropping the receiver stops the reader at the next row.
    pub fn stream(
        &self,
        request: PublishRequest,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> mpsc::Receiver<PublishEvent> {
        let (tx, rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);
        let inference = self.inference.clone();
        let source = self.source;

        tokio::task::spawn_blocking(move || {
            let result = resolve_files(&request, source)
                .map_err(PublishError::from)
                .and_then(|files| {
                    debug!(
                        "Publishing '{}' from {} file(s)",
                        request.schema.name,
                        files.len()
                    );
                    publish_rows(
                        &files,
                        &request.schema,
                        &inference,
                        source,
                        &cancel,
                        deadline,
                        |record| tx.blocking_send(PublishEvent::Record(record)).is_ok(),
                    )
                });

            let last = match result {
                Ok(summary) => PublishEvent::End(summary),
                Err(PublishError::Disconnected) => return,
                Err(e) => PublishEvent::Failed(e),
            };
            // The receiver may already be gone
            let _ = tx.blocking_send(last);
        });

        rx
    }
}
