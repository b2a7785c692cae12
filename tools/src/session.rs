//! Provisional edit sessions.
//!
//! One session exists per file the agent has modified but the user has not yet
//! accepted or reverted. `original` is captured on first touch and never changes;
//! `current` tracks the latest agent content, which is also what is on disk.
//!
//! Sessions are keyed by [`session_key`]: absolute and lexically normalized,
//! lowercased on Windows. Symlinks are not resolved, so two links to the same
//! file are two sessions.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use steward_utils::{DiffStats, diff_stats, unified_diff};
use tokio::sync::Mutex as AsyncMutex;

/// The original/current content pair for one provisionally edited file.
#[derive(Debug, Clone)]
pub struct EditSession {
    path: PathBuf,
    original: String,
    current: String,
    edit_count: u32,
}

impl EditSession {
    fn new(path: PathBuf, original: String) -> Self {
        Self {
            path,
            current: original.clone(),
            original,
            edit_count: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    #[must_use]
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Number of agent edits applied since the session opened.
    #[must_use]
    pub fn edit_count(&self) -> u32 {
        self.edit_count
    }

    #[must_use]
    pub fn diff_stats(&self) -> DiffStats {
        diff_stats(&self.original, &self.current)
    }

    #[must_use]
    pub fn unified_diff(&self) -> String {
        unified_diff(&self.path.to_string_lossy(), &self.original, &self.current)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Creation order; `undo_all` walks sessions in this order.
    order: Vec<PathBuf>,
    sessions: HashMap<PathBuf, EditSession>,
    path_locks: HashMap<PathBuf, Arc<AsyncMutex<()>>>,
}

/// Process-wide store of open edit sessions.
///
/// All access is serialized under one lock. Content lives only in memory.
#[derive(Debug, Default)]
pub struct EditSessionStore {
    inner: Mutex<StoreInner>,
}

impl EditSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Async lock serializing edits to one path.
    ///
    /// Hold it across read-modify-write of a session so two in-flight edits to
    /// the same file apply in issue order instead of racing. Drop the returned
    /// handle and then call [`Self::release_path_lock`].
    #[must_use]
    pub fn path_lock(&self, key: &Path) -> Arc<AsyncMutex<()>> {
        let mut inner = self.lock();
        Arc::clone(inner.path_locks.entry(key.to_path_buf()).or_default())
    }

    /// Forget the lock for `key` once no caller holds or awaits it.
    ///
    /// A caller still holding a handle keeps the entry alive, so every caller
    /// for one path always shares one lock.
    pub fn release_path_lock(&self, key: &Path) {
        let mut inner = self.lock();
        if inner
            .path_locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            inner.path_locks.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn path_lock_count(&self) -> usize {
        self.lock().path_locks.len()
    }

    #[must_use]
    pub fn get(&self, key: &Path) -> Option<EditSession> {
        self.lock().sessions.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &Path) -> bool {
        self.lock().sessions.contains_key(key)
    }

    /// Open a session with `original` unless one already exists.
    ///
    /// Returns `true` if a new session was created.
    pub fn open(&self, key: &Path, original: String) -> bool {
        let mut inner = self.lock();
        if inner.sessions.contains_key(key) {
            return false;
        }
        inner.order.push(key.to_path_buf());
        inner
            .sessions
            .insert(key.to_path_buf(), EditSession::new(key.to_path_buf(), original));
        true
    }

    /// Record new agent content for an open session.
    ///
    /// Returns `false` if no session is open for `key`.
    pub fn record_edit(&self, key: &Path, current: String) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get_mut(key) {
            Some(session) => {
                session.current = current;
                session.edit_count = session.edit_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Replace `current` without counting it as an agent edit.
    pub fn resync_current(&self, key: &Path, current: String) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get_mut(key) {
            Some(session) => {
                session.current = current;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &Path) -> Option<EditSession> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(key)?;
        inner.order.retain(|p| p != key);
        Some(session)
    }

    /// Paths of all open sessions, in creation order.
    ///
    /// Callers that mutate the store while walking sessions must iterate this
    /// snapshot, never the live collection.
    #[must_use]
    pub fn snapshot_paths(&self) -> Vec<PathBuf> {
        self.lock().order.clone()
    }

    /// Clones of all open sessions, in creation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EditSession> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|path| inner.sessions.get(path).cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity key for a session: absolute, `.`/`..` removed, lowercased on Windows.
#[must_use]
pub fn session_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_case(&normalize_lexically(&absolute))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(windows)]
fn normalize_case(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

#[cfg(not(windows))]
fn normalize_case(path: &Path) -> PathBuf {
    path.to_path_buf()
}
