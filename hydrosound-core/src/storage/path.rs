use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::models::error::CaptureError;
use crate::models::request::RecordingTags;

/// Maximum length of a sanitized filename token.
pub const TOKEN_MAX_LEN: usize = 60;

/// Placeholder substituted for a token that sanitizes to nothing.
pub const EMPTY_TOKEN_PLACEHOLDER: &str = "NA";

/// What to do when the desired output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Reuse the path; prior content will be replaced by the writer.
    Overwrite,
    /// Derive `<stem> (N)<suffix>` for the smallest unused N ≥ 2.
    Increment,
    /// Abort before any hardware action.
    Cancel,
}

/// Strip characters that are illegal on common filesystems, collapse
/// internal whitespace, and truncate. An empty result becomes `NA`.
pub fn sanitize_token(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut last_was_space = false;
    for ch in raw.trim().chars() {
        if ch.is_control() || matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            continue;
        }
        if ch.is_whitespace() {
            if !last_was_space && !collapsed.is_empty() {
                collapsed.push(' ');
                last_was_space = true;
            }
            continue;
        }
        collapsed.push(ch);
        last_was_space = false;
    }
    let trimmed = collapsed.trim_end();
    if trimmed.is_empty() {
        return EMPTY_TOKEN_PLACEHOLDER.to_string();
    }
    trimmed.chars().take(TOKEN_MAX_LEN).collect()
}

/// Build the survey filename for a given date.
///
/// Template, bit-exact:
/// `YYYY-MM-DD - <project> - <unit> - <state> - <location>.<ext>`
pub fn build_filename(tags: &RecordingTags, date: NaiveDate, ext: &str) -> String {
    format!(
        "{} - {} - {} - {} - {}.{}",
        date.format("%Y-%m-%d"),
        sanitize_token(&tags.project),
        sanitize_token(&tags.unit),
        sanitize_token(&tags.unit_state),
        sanitize_token(&tags.location),
        ext,
    )
}

/// Filename for today's date (local time).
pub fn build_filename_today(tags: &RecordingTags, ext: &str) -> String {
    build_filename(tags, chrono::Local::now().date_naive(), ext)
}

/// Return `<stem> (N)<suffix>` for the smallest N ≥ 2 whose path does
/// not exist at call time. Returns the input unchanged if it is free.
pub fn incremented(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| format!(".{s}"))
        .unwrap_or_default();
    let mut n: u32 = 2;
    loop {
        let candidate = path.with_file_name(format!("{stem} ({n}){suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Resolve an existing-file conflict according to the caller's choice.
/// Never overwrites silently: an existing path under `Cancel` is a
/// collision error, and `Overwrite` is an explicit opt-in.
pub fn resolve_collision(path: &Path, policy: CollisionPolicy) -> Result<PathBuf, CaptureError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    match policy {
        CollisionPolicy::Overwrite => Ok(path.to_path_buf()),
        CollisionPolicy::Increment => Ok(incremented(path)),
        CollisionPolicy::Cancel => Err(CaptureError::Collision(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tags() -> RecordingTags {
        RecordingTags::new("PIT5", "U1", "Full Load", "G1")
    }

    #[test]
    fn filename_matches_template_exactly() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let name = build_filename(&tags(), date, "tdms");
        assert_eq!(name, "2025-01-15 - PIT5 - U1 - Full Load - G1.tdms");
        // Idempotent on identical inputs.
        assert_eq!(name, build_filename(&tags(), date, "tdms"));
    }

    #[test]
    fn sanitize_strips_illegal_characters() {
        assert_eq!(sanitize_token(r#"Full<>:"/\|?*Load"#), "FullLoad");
        assert_eq!(sanitize_token("a\x00b\x1fc"), "abc");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_token("  Full   Load \t "), "Full Load");
    }

    #[test]
    fn sanitize_empty_becomes_placeholder() {
        assert_eq!(sanitize_token(""), "NA");
        assert_eq!(sanitize_token("  ///  "), "NA");
    }

    #[test]
    fn sanitize_truncates_long_tokens() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_token(&long).chars().count(), TOKEN_MAX_LEN);
    }

    #[test]
    fn increment_picks_smallest_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.tdms");
        fs::write(&base, b"").unwrap();
        fs::write(dir.path().join("rec (2).tdms"), b"").unwrap();

        let next = incremented(&base);
        assert_eq!(next, dir.path().join("rec (3).tdms"));
        assert!(!next.exists());
    }

    #[test]
    fn increment_returns_input_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.tdms");
        assert_eq!(incremented(&base), base);
    }

    #[test]
    fn resolve_cancel_is_a_collision_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.tdms");
        fs::write(&base, b"").unwrap();

        assert_eq!(
            resolve_collision(&base, CollisionPolicy::Cancel),
            Err(CaptureError::Collision(base.clone()))
        );
        assert_eq!(
            resolve_collision(&base, CollisionPolicy::Overwrite).unwrap(),
            base
        );
    }
}
