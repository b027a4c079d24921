//! Schema discovery and the process-wide schema registry.
//!
//! A Discover call resolves its pattern, infers one schema per file on the
//! blocking pool, then merges the results into the registry in pattern
//! order. Files whose header matches an existing signature only extend that
//! entry's `settings`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use csv::StringRecord;
use tabula_protocol::{ErrorKind, Property, Schema, Signature};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};

use crate::config::{InferenceConfig, SourceConfig};
use crate::source::{self, SourceError, SourceReader};
use crate::type_inference::ColumnTallies;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Discovery task failed: {0}")]
    Join(#[from] JoinError),
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::Source(e) if e.is_bad_request() => ErrorKind::BadRequest,
            DiscoveryError::Source(_) => ErrorKind::FileRead,
            DiscoveryError::Join(_) => ErrorKind::Internal,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<Schema>,
    index: HashMap<Signature, usize>,
}

/// Signature-keyed schema store shared by every Discover call.
///
/// Entries are only ever added or extended. The first schema seen for a
/// signature keeps its name and property types for the life of the process.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    state: Mutex<RegistryState>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // State is append-only, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge per-file schemas in order and return each touched entry once,
    /// in order of first touch.
    ///
    /// The whole batch is merged under one lock.
    pub fn merge_all(&self, candidates: Vec<Schema>) -> Vec<Schema> {
        let mut state = self.lock();
        let mut touched: Vec<usize> = Vec::new();

        for candidate in candidates {
            let signature = candidate.signature();
            let existing = state.index.get(&signature).copied();
            let idx = match existing {
                Some(idx) => {
                    let entry = &mut state.entries[idx];
                    for location in candidate.settings {
                        if !entry.settings.contains(&location) {
                            debug!("Schema '{}' gains {}", entry.name, location);
                            entry.settings.push(location);
                        }
                    }
                    idx
                }
                None => {
                    let idx = state.entries.len();
                    info!("Registered schema {}", candidate);
                    state.index.insert(signature, idx);
                    state.entries.push(candidate);
                    idx
                }
            };
            if !touched.contains(&idx) {
                touched.push(idx);
            }
        }

        touched
            .into_iter()
            .map(|idx| state.entries[idx].clone())
            .collect()
    }

    pub fn get(&self, signature: &[String]) -> Option<Schema> {
        let state = self.lock();
        state
            .index
            .get(signature)
            .map(|&idx| state.entries[idx].clone())
    }

    /// Every entry, in registration order.
    pub fn snapshot(&self) -> Vec<Schema> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs Discover calls against one registry.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    registry: Arc<SchemaRegistry>,
    inference: InferenceConfig,
    source: SourceConfig,
}

impl DiscoveryEngine {
    pub fn new(inference: InferenceConfig, source: SourceConfig) -> Self {
        Self {
            registry: Arc::new(SchemaRegistry::new()),
            inference,
            source,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn inference(&self) -> &InferenceConfig {
        &self.inference
    }

    pub fn source(&self) -> SourceConfig {
        self.source
    }

    /// Resolve `pattern`, infer every matching file, merge, and return the
    /// touched registry entries.
    pub async fn discover(&self, pattern: &str) -> Result<Vec<Schema>, DiscoveryError> {
        let owned = pattern.to_string();
        let files = tokio::task::spawn_blocking(move || source::resolve_pattern(&owned)).await??;
        debug!("Pattern '{}' matched {} file(s)", pattern, files.len());

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for (position, path) in files.iter().cloned().enumerate() {
            let inference = self.inference.clone();
            let source = self.source;
            tasks.spawn_blocking(move || (position, infer_file(&path, &inference, source)));
        }

        // Re-sequence to pattern order before merging
        let mut slots: Vec<Option<Result<Schema, SourceError>>> = Vec::new();
        slots.resize_with(files.len(), || None);
        while let Some(joined) = tasks.join_next().await {
            let (position, result) = joined?;
            slots[position] = Some(result);
        }

        let mut inferred = Vec::with_capacity(slots.len());
        for result in slots.into_iter().flatten() {
            inferred.push(result?);
        }

        Ok(self.registry.merge_all(inferred))
    }
}

/// Infer the schema of one file from its header and sampled rows.
///
/// Rows whose width differs from the header do not vote.
pub fn infer_file(
    path: &Path,
    inference: &InferenceConfig,
    source: SourceConfig,
) -> Result<Schema, SourceError> {
    let mut reader = SourceReader::open(path, source)?;
    let mut tallies = ColumnTallies::new(
        reader.headers().len(),
        inference.boolean_tokens,
        inference.sample_rows,
    );

    let mut record = StringRecord::new();
    let mut skipped = 0usize;
    while !tallies.is_full() && reader.read_record(&mut record)? {
        let cells: Vec<&str> = record.iter().collect();
        if !tallies.observe_row(&cells) {
            skipped += 1;
        }
    }
    if skipped > 0 {
        debug!(
            "{}: {} row(s) with wrong cell count ignored during inference",
            path.display(),
            skipped
        );
    }

    let properties = reader
        .headers()
        .iter()
        .zip(tallies.finish())
        .map(|(name, ty)| Property::new(name.clone(), ty))
        .collect();

    let mut schema = Schema::new(source::schema_name(path), properties);
    schema.settings.push(source::location(path));
    debug!(
        "Inferred {} from {} row(s) of {}",
        schema,
        tallies.rows_sampled(),
        path.display()
    );
    Ok(schema)
}

/// Files behind `pattern` whose header signature equals `signature`.
pub fn files_with_signature(
    pattern: &str,
    signature: &[String],
    source: SourceConfig,
) -> Result<Vec<PathBuf>, SourceError> {
    let mut matching = Vec::new();
    for path in source::resolve_pattern(pattern)? {
        let reader = SourceReader::open(&path, source)?;
        if reader.headers() == signature {
            matching.push(path);
        }
    }
    Ok(matching)
}
