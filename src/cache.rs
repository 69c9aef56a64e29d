//! Persistent fingerprint → translation cache.
//!
//! One `std::sync::Mutex` guards both the in-memory map and its
//! serialization, so a flush always writes a consistent snapshot. A second,
//! per-fingerprint async lock serializes the check-translate-write sequence
//! so two workers never ask the provider for the same text at once.

use crate::error::PipelineResult;
use crate::fingerprint::Fingerprint;
use crate::persist;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// File name of the cache sidecar inside the output location.
pub const CACHE_FILE_NAME: &str = ".translation_cache.json";

/// How a fingerprint was resolved by [`CacheStore::resolve_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already cached before this call.
    Cached(String),
    /// Produced by the supplied translator and now cached.
    Fresh(String),
    /// The translator declined (degraded pass-through); nothing was cached.
    Unresolved,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<Fingerprint, String>,
    dirty: bool,
}

#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    state: Mutex<CacheState>,
    in_flight: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    /// Load the cache at `path`. A missing or corrupt file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: BTreeMap<Fingerprint, String> =
            persist::read_json_lenient(&path).unwrap_or_default();

        info!("Loaded {} cached translations from {}", entries.len(), path.display());

        Self {
            path,
            state: Mutex::new(CacheState {
                entries,
                dirty: false,
            }),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cache stored in the conventional sidecar location under `output_dir`.
    pub fn in_output_dir(output_dir: &Path) -> Self {
        Self::load(output_dir.join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.lock_state().entries.get(fingerprint).cloned()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock_state().entries.contains_key(fingerprint)
    }

    /// Record a translation. The first value written for a fingerprint wins;
    /// a later, different value is ignored. Returns whether the map changed.
    pub fn put(&self, fingerprint: Fingerprint, text: String) -> bool {
        let mut state = self.lock_state();
        Self::insert_locked(&mut state, fingerprint, text)
    }

    /// Record several translations under a single lock acquisition.
    pub fn put_many(&self, items: impl IntoIterator<Item = (Fingerprint, String)>) -> usize {
        let mut state = self.lock_state();
        let mut added = 0;
        for (fingerprint, text) in items {
            if Self::insert_locked(&mut state, fingerprint, text) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole cache to disk if anything changed since the last flush.
    pub fn flush(&self) -> PipelineResult<()> {
        let mut state = self.lock_state();
        if !state.dirty {
            return Ok(());
        }

        persist::write_json_atomic(&self.path, &state.entries)?;
        state.dirty = false;
        debug!("Flushed {} cached translations to {}", state.entries.len(), self.path.display());
        Ok(())
    }

    /// Return the cached value for `fingerprint`, or run `translate` to
    /// produce one while holding that fingerprint's lock.
    ///
    /// Concurrent callers with the same fingerprint wait for the first one
    /// and then observe its cached result instead of translating again.
    /// `translate` returning `Ok(None)` leaves the fingerprint uncached.
    pub async fn resolve_with<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        translate: F,
    ) -> PipelineResult<Resolution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Option<String>>>,
    {
        if let Some(text) = self.get(fingerprint) {
            return Ok(Resolution::Cached(text));
        }

        let slot = self.slot_for(fingerprint);
        let result = {
            let _guard = slot.lock().await;

            if let Some(text) = self.get(fingerprint) {
                Ok(Resolution::Cached(text))
            } else {
                match translate().await {
                    Ok(Some(text)) => {
                        self.put(fingerprint.clone(), text.clone());
                        Ok(Resolution::Fresh(text))
                    }
                    Ok(None) => Ok(Resolution::Unresolved),
                    Err(e) => Err(e),
                }
            }
        };

        self.release_slot(fingerprint, slot);
        result
    }

    fn insert_locked(state: &mut CacheState, fingerprint: Fingerprint, text: String) -> bool {
        match state.entries.get(&fingerprint) {
            Some(existing) if *existing == text => false,
            Some(_) => {
                warn!(
                    "Ignoring divergent translation for cached fingerprint {}",
                    fingerprint
                );
                false
            }
            None => {
                state.entries.insert(fingerprint, text);
                state.dirty = true;
                true
            }
        }
    }

    fn slot_for(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.lock_slots();
        slots
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_slot(&self, fingerprint: &Fingerprint, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut slots = self.lock_slots();
        // The map holds one reference and we hold the other: nobody else waits.
        if Arc::strong_count(&slot) <= 2 {
            slots.remove(fingerprint);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
