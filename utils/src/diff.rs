//! Diff stats and unified diffs for provisional edits.

use similar::{ChangeTag, TextDiff};

/// Lines added and removed between two versions of a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: u32,
    pub deletions: u32,
}

impl DiffStats {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

impl std::fmt::Display for DiffStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{}, -{}", self.additions, self.deletions)
    }
}

/// Count added and removed lines between `old` and `new`.
#[must_use]
pub fn diff_stats(old: &str, new: &str) -> DiffStats {
    let diff = TextDiff::from_lines(old, new);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions += 1,
            ChangeTag::Delete => stats.deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}

/// Render a unified diff (one line of context) labelled with `label`.
///
/// Returns an empty string when the texts are identical.
#[must_use]
pub fn unified_diff(label: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(1)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{DiffStats, diff_stats, unified_diff};

    #[test]
    fn stats_count_replaced_lines() {
        let stats = diff_stats("A\nB\nC\n", "A\nX\nY\nC\n");
        assert_eq!(
            stats,
            DiffStats {
                additions: 2,
                deletions: 1
            }
        );
        assert_eq!(stats.to_string(), "+2, -1");
    }

    #[test]
    fn identical_text_has_empty_stats_and_diff() {
        assert!(diff_stats("same\n", "same\n").is_empty());
        assert!(unified_diff("f.txt", "same\n", "same\n").is_empty());
    }

    #[test]
    fn unified_diff_has_headers_and_markers() {
        let out = unified_diff("src/top.v", "a\nb\n", "a\nc\n");
        assert!(out.contains("--- a/src/top.v"));
        assert!(out.contains("+++ b/src/top.v"));
        assert!(out.contains("-b"));
        assert!(out.contains("+c"));
    }
}
