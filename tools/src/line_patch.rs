//! Line-addressed text patching.
//!
//! Documents are treated as sequences of lines separated by `\n` after
//! `\r\n` normalization. The newline style of the original document is
//! detected once and used for the whole rewritten document, so mixed endings
//! are accepted on input but a single consistent ending is written back.

/// Newline convention of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Detect from the first `\n` in `text`; `None` if there is no newline.
    #[must_use]
    pub fn detect(text: &str) -> Option<Self> {
        let index = text.find('\n')?;
        if index > 0 && text.as_bytes()[index - 1] == b'\r' {
            Some(Self::CrLf)
        } else {
            Some(Self::Lf)
        }
    }

    #[must_use]
    pub const fn platform() -> Self {
        if cfg!(windows) { Self::CrLf } else { Self::Lf }
    }
}

/// Split into lines after normalizing `\r\n`. An empty document has no lines;
/// a trailing newline yields a final empty line.
#[must_use]
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    content
        .replace("\r\n", "\n")
        .split('\n')
        .map(str::to_owned)
        .collect()
}

/// Number of lines `content` has under [`split_lines`] rules.
#[must_use]
pub fn line_count(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.matches('\n').count() + 1
    }
}

/// Replace `line_count` lines starting at 1-based `start_line` with `new_content`.
///
/// Out-of-range arguments are clamped rather than rejected: a start past the
/// end appends, and the removal count never exceeds the remaining lines.
/// `line_count == 0` inserts before `start_line`; an empty `new_content`
/// deletes.
#[must_use]
pub fn apply_line_edit(
    original: &str,
    start_line: usize,
    line_count: usize,
    new_content: &str,
) -> String {
    let newline = LineEnding::detect(original).unwrap_or_else(LineEnding::platform);
    let mut lines = split_lines(original);

    let start = start_line.saturating_sub(1).min(lines.len());
    let remove = line_count.min(lines.len() - start);

    lines.splice(start..start + remove, split_lines(new_content));
    lines.join(newline.as_str())
}
