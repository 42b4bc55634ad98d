//! Small helpers shared by the harvester, loader and outputs.
//!
//! - Whitespace normalisation for text read out of the DOM
//! - String truncation for log lines
//! - File system validation for output directories

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Collapse every run of whitespace into a single space and trim both ends.
///
/// Rendered text nodes carry indentation and line breaks from the markup;
/// titles and kickers are stored in their collapsed form.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(collapse_whitespace("  Casino \n\t Expansion "), "Casino Expansion");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}

/// Truncate a string for logging purposes.
///
/// Keeps at most `max` characters and appends the number of dropped bytes.
/// Cuts on a character boundary so multi-byte titles never split a code point.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
