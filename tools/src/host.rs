//! Collaborator boundary: the IDE surfaces this core reads from and drives.
//!
//! Everything here is implemented by the embedding application. The in-memory
//! implementations back tests and the headless CLI.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use steward_types::Diagnostic;

use crate::terminal::TerminalRunner;

/// Registry of editor documents open in the IDE.
pub trait EditorHost: Send + Sync {
    /// Paths of all open editor documents.
    fn open_files(&self) -> Vec<PathBuf>;

    /// The document that currently has focus.
    fn focused_file(&self) -> Option<PathBuf>;

    /// Live (possibly unsaved) text of an open document.
    fn live_text(&self, path: &Path) -> Option<String>;

    /// Show or refresh the provisional-edit view for `path`.
    ///
    /// Called after every agent edit; `current` is what is now on disk.
    fn show_provisional_edit(&self, path: &Path, original: &str, current: &str);

    /// Close the provisional-edit view for `path` after accept or undo.
    fn close_provisional_edit(&self, path: &Path);
}

/// Project explorer state.
pub trait ProjectHost: Send + Sync {
    /// Root directory of the active project, if one is selected.
    fn active_project(&self) -> Option<PathBuf>;
}

/// Source of structured diagnostics (language servers, build tools).
pub trait DiagnosticsProvider: Send + Sync {
    fn diagnostics(&self) -> Vec<Diagnostic>;
}

/// Settings dialog surface.
pub trait SettingsSurface: Send + Sync {
    /// Open the settings dialog, optionally on a specific page.
    fn open_settings(&self, page: Option<&str>);
}

/// Bundle of collaborators handed to every tool call.
#[derive(Clone)]
pub struct HostServices {
    pub editors: Arc<dyn EditorHost>,
    pub project: Arc<dyn ProjectHost>,
    pub diagnostics: Arc<dyn DiagnosticsProvider>,
    pub terminal: Arc<dyn TerminalRunner>,
    pub settings: Arc<dyn SettingsSurface>,
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("active_project", &self.project.active_project())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Debug, Default)]
struct EditorState {
    documents: BTreeMap<PathBuf, String>,
    focused: Option<PathBuf>,
    provisional: HashMap<PathBuf, String>,
}

/// Editor registry backed by a map of open documents.
#[derive(Debug, Default)]
pub struct InMemoryEditors {
    state: Mutex<EditorState>,
}

impl InMemoryEditors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) a document with live text and focus it.
    pub fn open(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        let path = path.into();
        let mut state = self.lock();
        state.documents.insert(path.clone(), text.into());
        state.focused = Some(path);
    }

    pub fn close(&self, path: &Path) {
        let mut state = self.lock();
        state.documents.remove(path);
        if state.focused.as_deref() == Some(path) {
            state.focused = None;
        }
    }

    pub fn focus(&self, path: Option<PathBuf>) {
        self.lock().focused = path;
    }

    /// Content shown in the provisional-edit view for `path`, if open.
    #[must_use]
    pub fn provisional_view(&self, path: &Path) -> Option<String> {
        self.lock().provisional.get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EditorHost for InMemoryEditors {
    fn open_files(&self) -> Vec<PathBuf> {
        self.lock().documents.keys().cloned().collect()
    }

    fn focused_file(&self) -> Option<PathBuf> {
        self.lock().focused.clone()
    }

    fn live_text(&self, path: &Path) -> Option<String> {
        self.lock().documents.get(path).cloned()
    }

    fn show_provisional_edit(&self, path: &Path, _original: &str, current: &str) {
        let mut state = self.lock();
        state
            .provisional
            .insert(path.to_path_buf(), current.to_string());
        // An open document reloads from disk, which now holds `current`.
        if let Some(doc) = state.documents.get_mut(path) {
            current.clone_into(doc);
        }
    }

    fn close_provisional_edit(&self, path: &Path) {
        self.lock().provisional.remove(path);
    }
}

/// Project host with a fixed (or absent) active project.
#[derive(Debug, Clone, Default)]
pub struct StaticProject {
    root: Option<PathBuf>,
}

impl StaticProject {
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl ProjectHost for StaticProject {
    fn active_project(&self) -> Option<PathBuf> {
        self.root.clone()
    }
}

/// Diagnostics provider holding a replaceable list.
#[derive(Debug, Default)]
pub struct StaticDiagnostics {
    items: Mutex<Vec<Diagnostic>>,
}

impl StaticDiagnostics {
    #[must_use]
    pub fn new(items: Vec<Diagnostic>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn replace(&self, items: Vec<Diagnostic>) {
        *self.items.lock().unwrap_or_else(PoisonError::into_inner) = items;
    }
}

impl DiagnosticsProvider for StaticDiagnostics {
    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Settings surface that records which pages were requested.
#[derive(Debug, Default)]
pub struct RecordingSettings {
    opened: Mutex<Vec<Option<String>>>,
}

impl RecordingSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn opened(&self) -> Vec<Option<String>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsSurface for RecordingSettings {
    fn open_settings(&self, page: Option<&str>) {
        tracing::info!(page = page.unwrap_or("<root>"), "settings requested");
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.map(str::to_owned));
    }
}
