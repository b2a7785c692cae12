//! File read/patch service.
//!
//! Reads prefer the editor's live text over disk. Edits go to disk immediately
//! and are tracked in an [`EditSessionStore`] so they stay reversible until the
//! user accepts or undoes them.
//!
//! Line arguments arrive as the agent sent them (`i64`, possibly negative). Bad
//! ranges are reported as `None`/`false`, never as errors.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::host::EditorHost;
use crate::line_patch::apply_line_edit;
use crate::session::{EditSession, EditSessionStore, session_key};

/// A validated partial-edit range: 0-based start index and a line count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineWindow {
    start: usize,
    count: Option<usize>,
}

impl LineWindow {
    /// Validate read-range arguments. `Ok(None)` means "whole document".
    fn for_read(start_line: Option<i64>, line_count: Option<i64>) -> Result<Option<Self>, ()> {
        match (start_line, line_count) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(()),
            (Some(start), count) => {
                if start < 1 || count.is_some_and(|c| c < 0) {
                    return Err(());
                }
                Ok(Some(Self {
                    start: to_usize(start - 1),
                    count: count.map(to_usize),
                }))
            }
        }
    }

    /// Validate edit-range arguments: both or neither.
    fn for_edit(start_line: Option<i64>, line_count: Option<i64>) -> Result<Option<Self>, ()> {
        match (start_line, line_count) {
            (None, None) => Ok(None),
            (Some(start), Some(count)) if start >= 1 && count >= 0 => Ok(Some(Self {
                start: to_usize(start - 1),
                count: Some(to_usize(count)),
            })),
            _ => Err(()),
        }
    }

    fn end(self) -> Option<usize> {
        self.count.map(|count| self.start.saturating_add(count))
    }

    /// Lines of `text` inside the window, each with its own terminator.
    fn slice(self, text: &str) -> String {
        let take = self.count.unwrap_or(usize::MAX);
        text.split_inclusive('\n')
            .skip(self.start)
            .take(take)
            .collect()
    }
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Reads and reversible line edits against workspace files.
pub struct FileService {
    store: EditSessionStore,
    editors: Arc<dyn EditorHost>,
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl FileService {
    #[must_use]
    pub fn new(editors: Arc<dyn EditorHost>) -> Self {
        Self {
            store: EditSessionStore::new(),
            editors,
        }
    }

    #[must_use]
    pub fn store(&self) -> &EditSessionStore {
        &self.store
    }

    /// Read a whole file or a window of lines.
    ///
    /// `Ok(None)` means the file has no live text and does not exist on disk,
    /// or the range arguments are invalid. A window starting past the end of
    /// the document yields an empty string. Bytes that are not UTF-8 decode to
    /// U+FFFD; any other I/O failure is returned.
    pub async fn read_file(
        &self,
        path: &Path,
        start_line: Option<i64>,
        line_count: Option<i64>,
    ) -> io::Result<Option<String>> {
        let Ok(window) = LineWindow::for_read(start_line, line_count) else {
            return Ok(None);
        };
        let key = session_key(path);

        if let Some(live) = self.editors.live_text(&key) {
            return Ok(Some(match window {
                Some(window) => window.slice(&live),
                None => live,
            }));
        }

        let result = match window {
            Some(window) => read_disk_window(&key, window).await,
            None => read_lossy(&key).await,
        };
        match result {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = %key.display(), "Failed to read file: {e}");
                Err(e)
            }
        }
    }

    /// Overwrite a file, or replace `line_count` lines from `start_line`.
    ///
    /// Opens an edit session on first touch. Returns `false` on invalid range
    /// arguments or I/O failure.
    pub async fn edit_file(
        &self,
        path: &Path,
        new_content: &str,
        start_line: Option<i64>,
        line_count: Option<i64>,
    ) -> bool {
        let Ok(window) = LineWindow::for_edit(start_line, line_count) else {
            debug!(path = %path.display(), ?start_line, ?line_count, "rejected edit range");
            return false;
        };
        let key = session_key(path);
        self.with_path_lock(&key, self.edit_locked(&key, new_content, window))
            .await
    }

    async fn edit_locked(
        &self,
        key: &Path,
        new_content: &str,
        window: Option<LineWindow>,
    ) -> bool {
        let created = if self.store.contains(key) {
            false
        } else {
            let Some(original) = self.load_original(key).await else {
                return false;
            };
            self.store.open(key, original)
        };
        let Some(session) = self.store.get(key) else {
            return false;
        };

        let updated = match window {
            // Engine takes 1-based lines; the window holds a 0-based index.
            Some(window) => apply_line_edit(
                session.current(),
                window.start.saturating_add(1),
                window.count.unwrap_or(0),
                new_content,
            ),
            None => new_content.to_string(),
        };

        if let Err(e) = write_to_disk(key.to_path_buf(), updated.clone()).await {
            warn!(path = %key.display(), "Failed to write edit: {e}");
            if created {
                self.store.remove(key);
            }
            return false;
        }

        self.store.record_edit(key, updated.clone());
        self.editors
            .show_provisional_edit(key, session.original(), &updated);
        debug!(path = %key.display(), created, "applied edit");
        true
    }

    /// Restore the session's original content and discard the session.
    ///
    /// Returns `false` if no session is open or the restore write failed; in
    /// the latter case the session stays open.
    pub async fn undo(&self, path: &Path) -> bool {
        self.undo_key(&session_key(path)).await
    }

    /// Undo every session open at the time of the call, in creation order.
    ///
    /// Returns how many sessions were restored.
    pub async fn undo_all(&self) -> usize {
        let mut restored = 0;
        for key in self.store.snapshot_paths() {
            if self.undo_key(&key).await {
                restored += 1;
            }
        }
        info!(restored, "undid all edit sessions");
        restored
    }

    /// Keep the agent's content on disk and discard the session.
    pub async fn accept(&self, path: &Path) -> bool {
        self.accept_key(&session_key(path)).await
    }

    pub async fn accept_all(&self) -> usize {
        let mut accepted = 0;
        for key in self.store.snapshot_paths() {
            if self.accept_key(&key).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Open sessions in creation order.
    #[must_use]
    pub fn sessions(&self) -> Vec<EditSession> {
        self.store.snapshot()
    }

    /// Unified diff of original to current for an open session.
    #[must_use]
    pub fn session_diff(&self, path: &Path) -> Option<String> {
        self.store
            .get(&session_key(path))
            .map(|session| session.unified_diff())
    }

    /// The user saved the live editor while a session is open.
    ///
    /// Re-seeds `current` so later partial edits compose against the saved text.
    pub async fn note_external_save(&self, path: &Path, text: &str) -> bool {
        let key = session_key(path);
        self.with_path_lock(&key, async {
            self.store.resync_current(&key, text.to_string())
        })
        .await
    }

    /// Run `body` under the per-path lock, then drop the lock if it is idle.
    async fn with_path_lock<T>(&self, key: &Path, body: impl Future<Output = T>) -> T {
        let lock = self.store.path_lock(key);
        let out = {
            let _guard = lock.lock().await;
            body.await
        };
        drop(lock);
        self.store.release_path_lock(key);
        out
    }

    async fn undo_key(&self, key: &Path) -> bool {
        self.with_path_lock(key, self.restore_locked(key)).await
    }

    async fn restore_locked(&self, key: &Path) -> bool {
        let Some(session) = self.store.get(key) else {
            return false;
        };
        if let Err(e) = write_to_disk(key.to_path_buf(), session.original().to_string()).await {
            warn!(path = %key.display(), "Failed to restore original: {e}");
            return false;
        }
        self.store.remove(key);
        self.editors.close_provisional_edit(key);
        info!(path = %key.display(), "undid edit session");
        true
    }

    async fn accept_key(&self, key: &Path) -> bool {
        self.with_path_lock(key, async {
            if self.store.remove(key).is_none() {
                return false;
            }
            self.editors.close_provisional_edit(key);
            info!(path = %key.display(), "accepted edit session");
            true
        })
        .await
    }

    /// Session original: live text, else disk, else empty for a new file.
    async fn load_original(&self, key: &Path) -> Option<String> {
        if let Some(live) = self.editors.live_text(key) {
            return Some(live);
        }
        match read_lossy(key).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Some(String::new()),
            Err(e) => {
                warn!(path = %key.display(), "Failed to read original: {e}");
                None
            }
        }
    }
}

/// Stream lines from disk, stopping after the last requested one.
async fn read_disk_window(path: &Path, window: LineWindow) -> io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let end = window.end();
    let mut out = String::new();
    let mut line = Vec::new();
    let mut index = 0usize;

    while end.is_none_or(|end| index < end) {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if index >= window.start {
            out.push_str(&String::from_utf8_lossy(&line));
        }
        index += 1;
    }
    Ok(out)
}

async fn read_lossy(path: &Path) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

async fn write_to_disk(path: PathBuf, text: String) -> io::Result<()> {
    tokio::task::spawn_blocking(move || steward_utils::write_text(&path, &text))
        .await
        .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use super::{FileService, LineWindow};
    use crate::host::InMemoryEditors;
    use crate::session::session_key;

    fn service() -> (FileService, Arc<InMemoryEditors>) {
        let editors = Arc::new(InMemoryEditors::new());
        (FileService::new(editors.clone()), editors)
    }

    #[test]
    fn read_window_validation() {
        assert_eq!(LineWindow::for_read(None, None), Ok(None));
        assert!(LineWindow::for_read(None, Some(2)).is_err());
        assert!(LineWindow::for_read(Some(0), None).is_err());
        assert!(LineWindow::for_read(Some(1), Some(-1)).is_err());
        assert_eq!(
            LineWindow::for_read(Some(3), None),
            Ok(Some(LineWindow {
                start: 2,
                count: None
            }))
        );
    }

    #[test]
    fn edit_window_requires_both_arguments() {
        assert!(LineWindow::for_edit(Some(1), None).is_err());
        assert!(LineWindow::for_edit(None, Some(1)).is_err());
        assert!(LineWindow::for_edit(Some(1), Some(-1)).is_err());
        assert!(LineWindow::for_edit(Some(1), Some(0)).is_ok());
    }

    #[test]
    fn slice_keeps_terminators() {
        let window = LineWindow {
            start: 1,
            count: Some(2),
        };
        assert_eq!(window.slice("A\nX\nY\nC\n"), "X\nY\n");
        let past_end = LineWindow {
            start: 10,
            count: Some(1),
        };
        assert_eq!(past_end.slice("A\n"), "");
    }

    #[tokio::test]
    async fn partial_edit_then_windowed_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "A\nB\nC\n").unwrap();
        let (files, _) = service();

        assert!(files.edit_file(&path, "X\nY", Some(2), Some(1)).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "A\nX\nY\nC\n");

        assert_eq!(files.read_file(&path, Some(2), Some(1)).await.unwrap().as_deref(), Some("X\n"));
        assert_eq!(
            files.read_file(&path, Some(2), Some(2)).await.unwrap().as_deref(),
            Some("X\nY\n")
        );
        assert_eq!(files.read_file(&path, Some(3), None).await.unwrap().as_deref(), Some("Y\nC\n"));
        assert_eq!(files.read_file(&path, Some(99), Some(1)).await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn invalid_ranges_are_rejected_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "A\n").unwrap();
        let (files, _) = service();

        assert!(files.read_file(&path, Some(0), Some(1)).await.unwrap().is_none());
        assert!(files.read_file(&path, None, Some(1)).await.unwrap().is_none());
        assert!(!files.edit_file(&path, "x", Some(1), None).await);
        assert!(!files.edit_file(&path, "x", Some(0), Some(1)).await);
        assert!(files.sessions().is_empty());
    }

    #[tokio::test]
    async fn missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let (files, _) = service();
        assert!(files.read_file(&dir.path().join("nope"), None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_text_wins_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top.v");
        fs::write(&path, "disk\n").unwrap();
        let (files, editors) = service();
        editors.open(path.clone(), "live\nunsaved\n");

        assert_eq!(
            files.read_file(&path, None, None).await.unwrap().as_deref(),
            Some("live\nunsaved\n")
        );
        assert_eq!(
            files.read_file(&path, Some(2), Some(1)).await.unwrap().as_deref(),
            Some("unsaved\n")
        );
    }

    #[tokio::test]
    async fn undo_restores_original_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crlf.txt");
        let original = "one\r\ntwo\r\nthree";
        fs::write(&path, original).unwrap();
        let (files, editors) = service();

        assert!(files.edit_file(&path, "2", Some(2), Some(1)).await);
        assert!(files.edit_file(&path, "new first", Some(1), Some(0)).await);
        assert!(editors.provisional_view(&path).is_some());
        assert!(files.undo(&path).await);

        assert_eq!(fs::read(&path).unwrap(), original.as_bytes());
        assert!(editors.provisional_view(&path).is_none());
        assert!(!files.undo(&path).await);
    }

    #[tokio::test]
    async fn edit_creates_missing_file_and_undo_empties_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new").join("file.txt");
        let (files, _) = service();

        assert!(files.edit_file(&path, "hello", None, None).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert_eq!(files.sessions()[0].original(), "");
        assert!(files.undo(&path).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn accept_keeps_disk_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "old").unwrap();
        let (files, _) = service();

        assert!(files.edit_file(&path, "new", None, None).await);
        assert!(files.accept(&path).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(files.sessions().is_empty());
        assert!(!files.accept(&path).await);
    }

    #[tokio::test]
    async fn undo_all_restores_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let (files, _) = service();

        files.edit_file(&a, "A", None, None).await;
        files.edit_file(&b, "B", None, None).await;
        assert_eq!(files.undo_all().await, 2);
        assert_eq!(fs::read_to_string(&a).unwrap(), "a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");
        assert_eq!(files.undo_all().await, 0);
    }

    #[tokio::test]
    async fn accept_all_clears_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (files, _) = service();
        for name in ["x", "y", "z"] {
            files.edit_file(&dir.path().join(name), name, None, None).await;
        }
        assert_eq!(files.accept_all().await, 3);
        assert!(files.sessions().is_empty());
    }

    #[tokio::test]
    async fn sequential_ranged_edits_compose() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "1\n2\n3\n4\n").unwrap();
        let (files, _) = service();

        assert!(files.edit_file(&path, "two", Some(2), Some(1)).await);
        assert!(files.edit_file(&path, "", Some(3), Some(1)).await);
        assert!(files.edit_file(&path, "zero", Some(1), Some(0)).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "zero\n1\ntwo\n4\n");
        assert_eq!(files.sessions()[0].edit_count(), 3);
        assert_eq!(files.sessions()[0].original(), "1\n2\n3\n4\n");
    }

    #[tokio::test]
    async fn concurrent_edits_to_one_path_all_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "").unwrap();
        let (files, _) = service();
        let files = Arc::new(files);

        let mut handles = Vec::new();
        for i in 0..8 {
            let files = Arc::clone(&files);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                files.edit_file(&path, &format!("line{i}"), Some(1), Some(0)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 8);
    }

    #[tokio::test]
    async fn read_after_write_returns_written_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let (files, _) = service();
        assert!(files.edit_file(&path, "alpha\nbeta\n", None, None).await);
        assert_eq!(
            files.read_file(&path, None, None).await.unwrap().as_deref(),
            Some("alpha\nbeta\n")
        );
    }

    #[tokio::test]
    async fn external_save_reseeds_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\nb\n").unwrap();
        let (files, _) = service();

        assert!(files.edit_file(&path, "B", Some(2), Some(1)).await);
        fs::write(&path, "user\na\nB\n").unwrap();
        assert!(files.note_external_save(&path, "user\na\nB\n").await);
        assert!(files.edit_file(&path, "A", Some(2), Some(1)).await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "user\nA\nB\n");
        assert!(!files.note_external_save(Path::new("/no/session"), "").await);
        assert_eq!(files.store().path_lock_count(), 0);
    }

    #[tokio::test]
    async fn external_save_waits_for_in_flight_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\nb\n").unwrap();
        let (files, _) = service();
        let files = Arc::new(files);
        assert!(files.edit_file(&path, "B", Some(2), Some(1)).await);

        let key = session_key(&path);
        let lock = files.store().path_lock(&key);
        let guard = lock.lock().await;
        let save = tokio::spawn({
            let files = Arc::clone(&files);
            let path = path.clone();
            async move { files.note_external_save(&path, "saved\n").await }
        });
        while Arc::strong_count(&lock) < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(files.store().get(&key).unwrap().current(), "a\nB\n");

        drop(guard);
        drop(lock);
        assert!(save.await.unwrap());
        assert_eq!(files.store().get(&key).unwrap().current(), "saved\n");
    }

    #[tokio::test]
    async fn session_diff_shows_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\nb\n").unwrap();
        let (files, _) = service();
        files.edit_file(&path, "c", Some(2), Some(1)).await;

        let diff = files.session_diff(&path).unwrap();
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
    }

    #[tokio::test]
    async fn undecodable_bytes_read_as_replacement_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.vhd");
        fs::write(&path, b"-- caf\xe9\nentity top is\n").unwrap();
        let (files, _) = service();

        let whole = files.read_file(&path, None, None).await.unwrap().unwrap();
        assert_eq!(whole, "-- caf\u{FFFD}\nentity top is\n");
        assert_eq!(
            files.read_file(&path, Some(1), Some(1)).await.unwrap().as_deref(),
            Some("-- caf\u{FFFD}\n")
        );
        assert!(files.edit_file(&path, "entity core is", Some(2), Some(1)).await);
    }

    #[tokio::test]
    async fn unreadable_path_is_an_error_not_none() {
        let dir = tempfile::tempdir().unwrap();
        let (files, _) = service();
        assert!(files.read_file(dir.path(), None, None).await.is_err());
        assert!(files.read_file(dir.path(), Some(1), Some(1)).await.is_err());
    }

    #[tokio::test]
    async fn path_locks_are_dropped_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let (files, _) = service();
        let files = Arc::new(files);

        let mut handles = Vec::new();
        for i in 0..4 {
            let files = Arc::clone(&files);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                files.edit_file(&path, &format!("v{i}"), None, None).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(files.store().path_lock_count(), 0);

        assert!(files.undo(&path).await);
        assert!(!files.accept(&path).await);
        assert_eq!(files.store().path_lock_count(), 0);
    }

    #[tokio::test]
    async fn undo_all_skips_sessions_opened_after_it_started() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let late = dir.path().join("late.txt");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        fs::write(&late, "late").unwrap();
        let (files, _) = service();
        let files = Arc::new(files);
        assert!(files.edit_file(&a, "A", None, None).await);
        assert!(files.edit_file(&b, "B", None, None).await);

        // Park undo_all on the first path after it has taken its snapshot.
        let lock = files.store().path_lock(&session_key(&a));
        let guard = lock.lock().await;
        let undo = tokio::spawn({
            let files = Arc::clone(&files);
            async move { files.undo_all().await }
        });
        while Arc::strong_count(&lock) < 3 {
            tokio::task::yield_now().await;
        }

        assert!(files.edit_file(&late, "LATE", None, None).await);
        drop(guard);
        drop(lock);

        assert_eq!(undo.await.unwrap(), 2);
        assert_eq!(fs::read_to_string(&a).unwrap(), "a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b");
        assert_eq!(fs::read_to_string(&late).unwrap(), "LATE");
        let open = files.sessions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].path(), session_key(&late));
    }
}
