//! Bounded worker pool that resolves a batch of work units through the
//! cache, calling the translation client on misses.
//!
//! Workers never touch the document. Their only output is cache entries;
//! the controller reads those back when it applies the batch.
//!
//! Before dispatch the batch is deduplicated by fingerprint and stripped of
//! cache hits and non-translatable leaves, so each remaining fingerprint is
//! handed to exactly one worker. The partitioned topology additionally goes
//! through [`CacheStore::resolve_with`], whose per-fingerprint lock keeps a
//! shared cache safe even if several pools run against it.

use crate::cache::{CacheStore, Resolution};
use crate::client::TranslationClient;
use crate::error::{PipelineError, PipelineResult};
use crate::walker::WorkUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

/// Upper bound on queued units and on a consumer's preallocated sub-batch.
const MAX_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Split the batch across N workers up front.
    Partitioned,
    /// N consumers pull from a shared bounded queue in sub-batches.
    Queue,
}

impl FromStr for Topology {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partitioned" => Ok(Topology::Partitioned),
            "queue" => Ok(Topology::Queue),
            other => Err(PipelineError::Configuration(format!(
                "unknown topology '{}', expected partitioned or queue",
                other
            ))),
        }
    }
}

/// Per-batch tally of how units were resolved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Units translated by the provider during this batch
    pub translated: usize,
    /// Units already cached (including duplicates within the batch)
    pub cached: usize,
    /// Units kept untranslated after a degraded failure
    pub unresolved: usize,
    /// Blank or non-source-script units that were never sent
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: &BatchOutcome) {
        self.translated += other.translated;
        self.cached += other.cached;
        self.unresolved += other.unresolved;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    outcome: BatchOutcome,
    error: Option<PipelineError>,
}

impl WorkerTally {
    fn record_error(&mut self, error: PipelineError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    topology: Topology,
    worker_count: usize,
    sub_batch_size: usize,
    read_timeout: Duration,
}

impl WorkerPool {
    pub fn new(topology: Topology, worker_count: usize) -> PipelineResult<Self> {
        if worker_count == 0 {
            return Err(PipelineError::Configuration(
                "worker count must be a positive number".to_string(),
            ));
        }

        Ok(Self {
            topology,
            worker_count,
            sub_batch_size: 50,
            read_timeout: Duration::from_secs(1),
        })
    }

    /// Sub-batch size and queue read timeout for the queue topology.
    pub fn with_queue_settings(
        mut self,
        sub_batch_size: usize,
        read_timeout: Duration,
    ) -> PipelineResult<Self> {
        if sub_batch_size == 0 {
            return Err(PipelineError::Configuration(
                "sub-batch size must be a positive number".to_string(),
            ));
        }
        self.sub_batch_size = sub_batch_size;
        self.read_timeout = read_timeout;
        Ok(self)
    }

    /// Resolve every unit of a batch. Blocks until all workers finish.
    ///
    /// A propagated translation error is returned only after the remaining
    /// units were attempted, so everything that did succeed is cached.
    pub async fn run(
        &self,
        units: Vec<WorkUnit>,
        client: Arc<TranslationClient>,
        cache: Arc<CacheStore>,
    ) -> PipelineResult<BatchOutcome> {
        let (pending, mut outcome) = schedule(units, &client, &cache);
        if pending.is_empty() {
            return Ok(outcome);
        }

        debug!(
            "Dispatching {} uncached leaves to {} {:?} workers",
            pending.len(),
            self.worker_count,
            self.topology
        );

        let tallies = match self.topology {
            Topology::Partitioned => self.run_partitioned(pending, client, cache).await?,
            Topology::Queue => self.run_queue(pending, client, cache).await?,
        };

        let mut first_error = None;
        for tally in tallies {
            outcome.merge(&tally.outcome);
            if first_error.is_none() {
                first_error = tally.error;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    async fn run_partitioned(
        &self,
        pending: Vec<WorkUnit>,
        client: Arc<TranslationClient>,
        cache: Arc<CacheStore>,
    ) -> PipelineResult<Vec<WorkerTally>> {
        let workers = self.worker_count.min(pending.len());
        let mut partitions: Vec<Vec<WorkUnit>> = vec![Vec::new(); workers];
        for (index, unit) in pending.into_iter().enumerate() {
            partitions[index % workers].push(unit);
        }

        let handles: Vec<JoinHandle<WorkerTally>> = partitions
            .into_iter()
            .map(|partition| {
                let client = Arc::clone(&client);
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { resolve_partition(partition, &client, &cache).await })
            })
            .collect();

        join_workers(handles).await
    }

    async fn run_queue(
        &self,
        pending: Vec<WorkUnit>,
        client: Arc<TranslationClient>,
        cache: Arc<CacheStore>,
    ) -> PipelineResult<Vec<WorkerTally>> {
        let capacity = self
            .worker_count
            .saturating_mul(self.sub_batch_size)
            .min(MAX_QUEUE_CAPACITY);
        let (sender, receiver) = mpsc::channel::<WorkUnit>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles: Vec<JoinHandle<WorkerTally>> = (0..self.worker_count)
            .map(|worker_id| {
                let consumer = QueueConsumer {
                    worker_id,
                    receiver: Arc::clone(&receiver),
                    client: Arc::clone(&client),
                    cache: Arc::clone(&cache),
                    sub_batch_size: self.sub_batch_size,
                    read_timeout: self.read_timeout,
                };
                tokio::spawn(consumer.run())
            })
            .collect();
        drop(receiver);

        for unit in pending {
            if sender.send(unit).await.is_err() {
                // Every consumer is gone; join_workers reports why.
                break;
            }
        }
        // Closing the channel is the drain signal for the consumers.
        drop(sender);

        join_workers(handles).await
    }
}

/// Drop duplicates, cache hits, and non-translatable leaves.
fn schedule(
    units: Vec<WorkUnit>,
    client: &TranslationClient,
    cache: &CacheStore,
) -> (Vec<WorkUnit>, BatchOutcome) {
    let metrics = client.metrics();
    let mut outcome = BatchOutcome::default();
    let mut seen = HashSet::new();
    let mut pending = Vec::new();

    for unit in units {
        if !client.is_translatable(&unit.text) {
            metrics.record_pass_through();
            outcome.skipped += 1;
        } else if cache.contains(&unit.fingerprint) || !seen.insert(unit.fingerprint.clone()) {
            metrics.record_cache_hit();
            outcome.cached += 1;
        } else {
            metrics.record_cache_miss();
            pending.push(unit);
        }
    }

    (pending, outcome)
}

async fn resolve_partition(
    partition: Vec<WorkUnit>,
    client: &TranslationClient,
    cache: &CacheStore,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    for unit in partition {
        let resolution = cache
            .resolve_with(&unit.fingerprint, || client.try_translate(&unit.text))
            .await;

        match resolution {
            Ok(Resolution::Fresh(_)) => tally.outcome.translated += 1,
            Ok(Resolution::Cached(_)) => tally.outcome.cached += 1,
            Ok(Resolution::Unresolved) => tally.outcome.unresolved += 1,
            Err(e) => tally.record_error(e),
        }
    }

    tally
}

struct QueueConsumer {
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    client: Arc<TranslationClient>,
    cache: Arc<CacheStore>,
    sub_batch_size: usize,
    read_timeout: Duration,
}

impl QueueConsumer {
    async fn run(self) -> WorkerTally {
        let mut tally = WorkerTally::default();
        let mut sub_batch: Vec<WorkUnit> =
            Vec::with_capacity(self.sub_batch_size.min(MAX_QUEUE_CAPACITY));

        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                timeout(self.read_timeout, receiver.recv()).await
            };

            match next {
                Ok(Some(unit)) => {
                    sub_batch.push(unit);
                    if sub_batch.len() >= self.sub_batch_size {
                        self.flush(&mut sub_batch, &mut tally).await;
                    }
                }
                Ok(None) => {
                    self.flush(&mut sub_batch, &mut tally).await;
                    break;
                }
                Err(_) => {
                    // Producer is slow: do not sit on a partial sub-batch.
                    self.flush(&mut sub_batch, &mut tally).await;
                }
            }
        }

        debug!("Queue worker {} drained", self.worker_id);
        tally
    }

    /// Translate a sub-batch and write its results to the cache in one go.
    async fn flush(&self, sub_batch: &mut Vec<WorkUnit>, tally: &mut WorkerTally) {
        if sub_batch.is_empty() {
            return;
        }

        let mut resolved = Vec::with_capacity(sub_batch.len());
        for unit in sub_batch.drain(..) {
            if self.cache.contains(&unit.fingerprint) {
                tally.outcome.cached += 1;
                continue;
            }
            match self.client.try_translate(&unit.text).await {
                Ok(Some(translated)) => resolved.push((unit.fingerprint, translated)),
                Ok(None) => tally.outcome.unresolved += 1,
                Err(e) => tally.record_error(e),
            }
        }

        let written = resolved.len();
        tally.outcome.translated += self.cache.put_many(resolved);
        debug!("Queue worker {} cached {} translations", self.worker_id, written);
    }
}

async fn join_workers(handles: Vec<JoinHandle<WorkerTally>>) -> PipelineResult<Vec<WorkerTally>> {
    let results = futures::future::join_all(handles).await;

    let mut tallies = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(tally) => tallies.push(tally),
            Err(e) => return Err(PipelineError::WorkerFailed(e.to_string())),
        }
    }

    let translated: usize = tallies.iter().map(|t| t.outcome.translated).sum();
    info!("{} workers finished, {} new translations", tallies.len(), translated);
    Ok(tallies)
}
