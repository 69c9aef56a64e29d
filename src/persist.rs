//! Small helpers for the JSON sidecar and output files.

use crate::error::{PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Serialize `value` as pretty JSON and replace `path` with it.
///
/// The bytes land in a sibling temp file, are synced to disk, and only then
/// renamed over the target, so readers never observe a half-written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::persistence(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::persistence(parent, e))?;
        }
    }

    let tmp = temp_sibling(path);
    write_synced(&tmp, &body).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PipelineError::persistence(&tmp, e)
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PipelineError::persistence(path, e)
    })
}

fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(body)?;
    file.sync_all()
}

/// Read a JSON sidecar, treating a missing or unparsable file as absent.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring corrupt {}: {}", path.display(), e);
            None
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
