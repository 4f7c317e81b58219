use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// A small JSON file kept in memory and written back on every change.
///
/// All read-modify-write sequences go through `update`, which holds the
/// document lock across the mutation and the write to disk.
pub struct JsonDocument<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send,
{
    /// Load the document; a missing or unreadable file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding corrupt {}: {}", path.display(), e);
                    T::default()
                }
            },
            Ok(_) => T::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                T::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    /// Apply `f` to a copy of the document. The copy replaces the in-memory
    /// state only after it reached disk; nothing is written when `f` reports
    /// no change.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> (bool, R)) -> Result<R> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let (changed, result) = f(&mut next);
        if changed {
            let content = serde_json::to_vec(&next)?;
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            *state = next;
        }
        Ok(result)
    }
}
