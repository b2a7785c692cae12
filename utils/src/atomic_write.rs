//! Atomic text persistence.
//!
//! Uses a temp file + rename pattern so an interrupted write never leaves a
//! half-written source file behind. On Windows, rename-over-existing fails, so we
//! fall back to backup-and-restore.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create missing parent directories before writing.
    pub create_parents: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
        }
    }
}

/// Replace `path` with `text`, creating parent directories as needed.
pub fn write_text(path: impl AsRef<Path>, text: &str) -> io::Result<()> {
    write_text_with_options(path, text, WriteOptions::default())
}

pub fn write_text_with_options(
    path: impl AsRef<Path>,
    text: &str,
    options: WriteOptions,
) -> io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    if options.create_parents {
        fs::create_dir_all(parent)?;
    }

    // Existing files keep their permissions; the temp file would otherwise
    // replace them with the process umask.
    let existing_permissions = fs::metadata(path).ok().map(|meta| meta.permissions());

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(text.as_bytes())?;
    if let Some(permissions) = existing_permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = path.with_extension("steward-bak");
        let _ = fs::remove_file(&backup);
        fs::rename(path, &backup)?;
        if let Err(rename_err) = err.file.persist(path) {
            let _ = fs::rename(&backup, path);
            return Err(rename_err.error);
        }
        if let Err(e) = fs::remove_file(&backup) {
            warn!(path = %backup.display(), "Failed to remove backup after write: {e}");
        }
    }

    debug!(path = %path.display(), bytes = text.len(), "wrote file");
    Ok(())
}
