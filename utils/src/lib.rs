//! Shared infrastructure utilities for Steward.
//!
//! - **`atomic_write`**: Crash-safe text persistence (temp + rename) used for
//!   every agent edit, undo, and restore
//! - **`diff`**: Diff stats and unified diffs between an edit session's
//!   original and current content

pub mod atomic_write;
pub mod diff;

pub use atomic_write::{WriteOptions, write_text, write_text_with_options};
pub use diff::{DiffStats, diff_stats, unified_diff};
