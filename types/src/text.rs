//! Small pure text helpers for presenting tool output.

/// Maximum characters of raw output carried inside an error.
pub const PREVIEW_CHARS: usize = 200;

/// Truncate `s` and append `suffix` if it exceeds `threshold` characters.
///
/// - `threshold`: character count at which truncation kicks in.
/// - `take`: how many characters of content to keep when truncating.
fn truncate_core(s: &str, threshold: usize, take: usize, suffix: &str) -> String {
    if s.chars().count() <= threshold {
        return s.to_string();
    }
    let head: String = s.chars().take(take).collect();
    format!("{head}{suffix}")
}

/// Bounded preview of raw process output.
///
/// Keeps at most `max_chars` characters of the trimmed input and marks the
/// cut with `…`. Counts `char`s, never splits a scalar value.
#[must_use]
pub fn output_preview(raw: &str, max_chars: usize) -> String {
    truncate_core(raw.trim(), max_chars, max_chars, "…")
}

/// Human-readable failure text for a process that exited unsuccessfully.
///
/// Tools write diagnostics to stderr; some only print to stdout. Blank
/// stderr falls back to stdout, and the result is bounded.
#[must_use]
pub fn failure_message(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    let chosen = if stderr.is_empty() { stdout.trim() } else { stderr };
    output_preview(chosen, PREVIEW_CHARS * 4)
}
