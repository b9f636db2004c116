use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{StateStore, StoreError};
use crate::conversation::Conversation;

/// A store that keeps one JSON file per thread, `<dir>/<thread>.json`.
///
/// Writes go to a temporary file first and are then renamed over the
/// previous state, so a crash never leaves a half-written state behind.
#[derive(Clone, Debug)]
pub struct FsStateStore {
    dir: PathBuf,
}

impl FsStateStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first write.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the root directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, thread_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !thread_id.is_empty()
            && thread_id != "."
            && thread_id != ".."
            && thread_id.chars().all(|ch| {
                ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
            });
        if !valid {
            return Err(StoreError::InvalidThreadId(thread_id.to_owned()));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }
}

fn io_error(thread_id: &str) -> impl FnOnce(io::Error) -> StoreError {
    move |source| StoreError::Io {
        thread_id: thread_id.to_owned(),
        source,
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn get(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let path = self.state_path(thread_id)?;
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(io_error(thread_id)(err)),
        };
        let conversation =
            serde_json::from_slice(&content).map_err(|source| {
                StoreError::Malformed {
                    thread_id: thread_id.to_owned(),
                    source,
                }
            })?;
        Ok(Some(conversation))
    }

    async fn put(
        &self,
        thread_id: &str,
        conversation: &Conversation,
    ) -> Result<(), StoreError> {
        let path = self.state_path(thread_id)?;
        let content =
            serde_json::to_vec_pretty(conversation).map_err(|source| {
                StoreError::Malformed {
                    thread_id: thread_id.to_owned(),
                    source,
                }
            })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(thread_id))?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(io_error(thread_id))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(io_error(thread_id))?;
        debug!(thread_id, "wrote {}", path.display());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        let path = self.state_path(thread_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(thread_id, "deleted {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(thread_id)(err)),
        }
    }
}
