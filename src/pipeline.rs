//! Pipeline controller: load → (schedule → translate → commit)* per input.
//!
//! Batches of one input commit strictly in ascending order. A batch is
//! committed by flushing the cache, writing the output document, and only
//! then recording progress, so a crash at any point leaves a state from
//! which the batch is simply redone.

use crate::cache::CacheStore;
use crate::client::TranslationClient;
use crate::config::{Config, OutputShape};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::{MetricsReport, PipelineMetrics};
use crate::persist;
use crate::pool::{BatchOutcome, WorkerPool};
use crate::progress::ProgressTracker;
use crate::provider::TranslationProvider;
use crate::retry::RetryPolicy;
use crate::walker::{Dialect, TreeWalker};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Coarse cancellation flag, honored between batches.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub total_batches: usize,
    /// Batch index processing started from
    pub resumed_from: usize,
    pub processed_batches: usize,
    pub outcome: BatchOutcome,
}

impl FileReport {
    pub fn is_complete(&self) -> bool {
        self.processed_batches >= self.total_batches
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// Inputs abandoned with the reason
    pub failed: Vec<(PathBuf, String)>,
    pub interrupted: bool,
    pub metrics: MetricsReport,
}

pub struct Pipeline {
    client: Arc<TranslationClient>,
    cache: Arc<CacheStore>,
    pool: WorkerPool,
    walker: TreeWalker,
    batch_size: usize,
    output_dir: PathBuf,
    output_shape: OutputShape,
    shutdown: ShutdownSignal,
}

impl Pipeline {
    pub fn new(
        client: TranslationClient,
        pool: WorkerPool,
        walker: TreeWalker,
        batch_size: usize,
        output_dir: impl Into<PathBuf>,
    ) -> PipelineResult<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch size must be a positive number".to_string(),
            ));
        }

        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(|e| PipelineError::persistence(&output_dir, e))?;
        let cache = CacheStore::in_output_dir(&output_dir);

        Ok(Self {
            client: Arc::new(client),
            cache: Arc::new(cache),
            pool,
            walker,
            batch_size,
            output_dir,
            output_shape: OutputShape::Full,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Wire up a pipeline from configuration around an existing provider.
    pub fn from_config(config: &Config, provider: Arc<dyn TranslationProvider>) -> PipelineResult<Self> {
        config.validate()?;

        let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_initial_delay)
            .with_max_delay(config.retry_max_delay);
        let client = TranslationClient::new(provider, &config.source_lang, &config.target_lang)
            .with_retry_policy(retry)
            .with_failure_policy(config.failure_policy)
            .with_metrics(Arc::new(PipelineMetrics::new()));
        let pool = WorkerPool::new(config.topology, config.worker_count)?
            .with_queue_settings(config.sub_batch_size, config.queue_read_timeout)?;
        let walker = TreeWalker::new(config.dialect, &config.gloss_lang);

        Ok(Self::new(client, pool, walker, config.batch_size, &config.output_location)?
            .with_output_shape(config.output_shape))
    }

    pub fn with_output_shape(mut self, output_shape: OutputShape) -> Self {
        self.output_shape = output_shape;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsReport {
        self.client.metrics().report()
    }

    pub fn output_path(&self, input: &Path) -> PathBuf {
        let name = input.file_name().unwrap_or(input.as_os_str());
        self.output_dir.join(name)
    }

    /// Process every input in order.
    ///
    /// A malformed input or a failed batch abandons that input only. A
    /// provider outage ends the run. The cache is flushed on every exit path.
    pub async fn run(&self, inputs: &[PathBuf]) -> PipelineResult<RunReport> {
        self.client.ensure_available().await?;

        let mut report = RunReport {
            files: Vec::new(),
            failed: Vec::new(),
            interrupted: false,
            metrics: self.metrics(),
        };

        for input in inputs {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            info!("Processing {}", input.display());
            match self.process_file(input).await {
                Ok(file_report) => {
                    if !file_report.is_complete() {
                        report.interrupted = true;
                    }
                    report.files.push(file_report);
                }
                Err(e) if e.is_fatal_for_run() => {
                    self.cache.flush()?;
                    return Err(e);
                }
                Err(e) => {
                    error!("Skipping {}: {}", input.display(), e);
                    report.failed.push((input.clone(), e.to_string()));
                }
            }
        }

        self.cache.flush()?;
        report.metrics = self.metrics();
        info!(
            "Run finished: {} files, {} failed, {} provider calls, {:.1}% cache hit rate",
            report.files.len(),
            report.failed.len(),
            report.metrics.provider_calls,
            report.metrics.cache_hit_rate
        );
        Ok(report)
    }

    /// Translate one input document, resuming from its progress record.
    pub async fn process_file(&self, input: &Path) -> PipelineResult<FileReport> {
        let output = self.output_path(input);
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::malformed(input, "input has no file name"))?;

        // Loading
        let mut document = load_document(input)?;
        let entry_count = self.walker.entries(&document, input)?.len();
        let total_batches = entry_count.div_ceil(self.batch_size);

        let tracker = ProgressTracker::for_input(&self.output_dir, &file_name);
        let record = tracker.reconcile(total_batches)?;
        let committed = record.processed_batches.min(total_batches);

        let start = if committed > 0 {
            let restored = self.restore_committed(&mut document, &output, committed, entry_count);
            self.cache.flush()?;
            if restored < committed {
                warn!(
                    "{}: translations of committed batch {} are missing, redoing from there",
                    file_name,
                    restored + 1
                );
            } else if restored < total_batches {
                info!("Resuming {} at batch {}/{}", file_name, restored + 1, total_batches);
            }
            restored
        } else {
            0
        };

        let mut file_report = FileReport {
            input: input.to_path_buf(),
            output: output.clone(),
            total_batches,
            resumed_from: start,
            processed_batches: start,
            outcome: BatchOutcome::default(),
        };

        if start == total_batches {
            if !output.exists() {
                self.write_output(&document, &output, entry_count)?;
            }
            info!("{} already complete ({} batches)", file_name, total_batches);
            return Ok(file_report);
        }

        for batch in start..total_batches {
            if self.shutdown.is_triggered() {
                warn!(
                    "Shutdown requested, stopping {} after {}/{} batches",
                    file_name, batch, total_batches
                );
                break;
            }

            let range = self.batch_range(batch, entry_count);

            // Scheduling
            let units = self.walker.collect_leaves(&document, range.clone());

            // Translating
            let outcome = match self
                .pool
                .run(units, Arc::clone(&self.client), Arc::clone(&self.cache))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.cache.flush()?;
                    return Err(e);
                }
            };

            // Committing
            self.apply_cached(&mut document, range.clone());
            self.cache.flush()?;
            self.write_output(&document, &output, range.end)?;
            tracker.save(batch + 1, total_batches)?;

            info!(
                "Committed batch {}/{} of {}: {} translated, {} cached, {} kept",
                batch + 1,
                total_batches,
                file_name,
                outcome.translated,
                outcome.cached,
                outcome.unresolved
            );
            file_report.processed_batches = batch + 1;
            file_report.outcome.merge(&outcome);
        }

        Ok(file_report)
    }

    fn batch_range(&self, batch: usize, entry_count: usize) -> Range<usize> {
        let start = batch * self.batch_size;
        start..(start + self.batch_size).min(entry_count)
    }

    /// Put the translations of batches `[0, committed)` back into a freshly
    /// loaded document and return how many leading batches are whole again.
    ///
    /// A leaf is taken from the previous output when it differs from the
    /// source text there, otherwise from the cache. Translations recovered
    /// from the output are written back into the cache. The first batch with
    /// a translatable leaf found in neither place, and every batch after it,
    /// is left untranslated to be redone.
    fn restore_committed(
        &self,
        document: &mut Value,
        output: &Path,
        committed: usize,
        entry_count: usize,
    ) -> usize {
        let previous = self.previous_output(output, entry_count);
        let mut restored: HashMap<String, String> = HashMap::new();
        let mut whole = 0;

        'batches: for batch in 0..committed {
            let mut leaves = Vec::new();
            for unit in self.walker.collect_leaves(document, self.batch_range(batch, entry_count)) {
                let from_output = previous
                    .as_ref()
                    .and_then(|doc| doc.pointer(&unit.pointer))
                    .and_then(Value::as_str)
                    .filter(|text| *text != unit.text)
                    .map(str::to_string);

                let translated = match from_output {
                    Some(text) => {
                        self.cache.put(unit.fingerprint.clone(), text.clone());
                        Some(text)
                    }
                    None => self.cache.get(&unit.fingerprint),
                };

                match translated {
                    Some(text) => leaves.push((unit.pointer, text)),
                    None if self.client.is_translatable(&unit.text) => break 'batches,
                    None => {}
                }
            }
            restored.extend(leaves);
            whole = batch + 1;
        }

        if whole > 0 {
            let end = self.batch_range(whole - 1, entry_count).end;
            self.walker
                .apply_translations(document, 0..end, |unit| restored.get(&unit.pointer).cloned());
        }
        whole
    }

    /// The previous full-shape output, if it still lines up with the input.
    fn previous_output(&self, output: &Path, entry_count: usize) -> Option<Value> {
        if self.writes_condensed() {
            return None;
        }

        let previous: Value = persist::read_json_lenient(output)?;
        match self.walker.entries(&previous, output) {
            Ok(entries) if entries.len() == entry_count => Some(previous),
            _ => {
                warn!("Ignoring {}: it no longer matches its input", output.display());
                None
            }
        }
    }

    fn writes_condensed(&self) -> bool {
        self.output_shape == OutputShape::Condensed && self.walker.dialect() == Dialect::WordList
    }

    fn apply_cached(&self, document: &mut Value, range: Range<usize>) -> usize {
        let cache = &self.cache;
        self.walker
            .apply_translations(document, range, |unit| cache.get(&unit.fingerprint))
    }

    /// `committed_entries` bounds the condensed view to entries already translated.
    fn write_output(&self, document: &Value, output: &Path, committed_entries: usize) -> PipelineResult<()> {
        if self.writes_condensed() {
            persist::write_json_atomic(output, &self.walker.condense(document, committed_entries))
        } else {
            persist::write_json_atomic(output, document)
        }
    }
}

fn load_document(input: &Path) -> PipelineResult<Value> {
    let raw = fs::read(input)
        .map_err(|e| PipelineError::malformed(input, format!("cannot read: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| PipelineError::malformed(input, format!("invalid JSON: {}", e)))
}

/// Resolve the input location into the ordered list of documents to process.
///
/// A file is taken as-is. In a directory, term banks are the
/// `term_bank_<n>.json` files and word lists are any `*.json` file.
pub fn discover_inputs(location: &Path, dialect: Dialect) -> PipelineResult<Vec<PathBuf>> {
    if location.is_file() {
        return Ok(vec![location.to_path_buf()]);
    }

    let pattern = match dialect {
        Dialect::TermBank => r"^term_bank_\d+\.json$",
        Dialect::WordList => r"^[^.].*\.json$",
    };
    let matcher = Regex::new(pattern)
        .map_err(|e| PipelineError::Configuration(format!("bad input pattern: {}", e)))?;

    let listing = fs::read_dir(location).map_err(|e| {
        PipelineError::Configuration(format!(
            "cannot read input location {}: {}",
            location.display(),
            e
        ))
    })?;

    let mut inputs: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| matcher.is_match(name))
        })
        .collect();
    inputs.sort_by_key(|path| term_bank_number(path));

    Ok(inputs)
}

/// Sort key that orders `term_bank_2.json` before `term_bank_10.json`.
fn term_bank_number(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let number = name
        .trim_start_matches("term_bank_")
        .trim_end_matches(".json")
        .parse()
        .unwrap_or(u64::MAX);
    (number, name)
}
