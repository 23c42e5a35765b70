//! Evidence collection
//!
//! Turns a run's log download into a bounded block of text. Archives are
//! expanded entry by entry in listing order; the result keeps only the tail,
//! which is where build and test failures tend to surface.

use crate::locator::FailingRun;
use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use tracing::debug;

const ARCHIVE_CONTENT_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Raw log download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPayload {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl LogPayload {
    pub fn is_archive(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let ct = ct.trim().to_ascii_lowercase();
            ARCHIVE_CONTENT_TYPES.iter().any(|prefix| ct.starts_with(prefix))
        })
    }
}

/// Log transport. Non-success responses must surface as errors.
#[allow(async_fn_in_trait)]
pub trait LogSource {
    async fn fetch_logs(&self, run: &FailingRun) -> Result<LogPayload>;
}

/// Trailing window of decoded log text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceBundle {
    text: String,
    /// Characters in the decoded logs before truncation
    original_chars: usize,
}

impl EvidenceBundle {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn original_chars(&self) -> usize {
        self.original_chars
    }

    pub fn was_truncated(&self) -> bool {
        self.text.chars().count() < self.original_chars
    }
}

/// Fetch and decode the logs of `run`, keeping the last `window` characters.
pub async fn collect<L: LogSource>(
    source: &L,
    run: &FailingRun,
    window: usize,
) -> Result<EvidenceBundle> {
    let payload = source
        .fetch_logs(run)
        .await
        .with_context(|| format!("Failed to download logs for run {}", run.run_id))?;
    debug!(
        run_id = run.run_id,
        bytes = payload.bytes.len(),
        archive = payload.is_archive(),
        "logs downloaded"
    );
    bundle_from_payload(&payload, window)
}

pub fn bundle_from_payload(payload: &LogPayload, window: usize) -> Result<EvidenceBundle> {
    let text = decode_payload(payload)?;
    let original_chars = text.chars().count();
    Ok(EvidenceBundle {
        text: tail_chars(&text, window).to_string(),
        original_chars,
    })
}

/// Decode a payload to text; archive entries are concatenated with no separator.
///
/// Decoding is lossy on purpose: invalid UTF-8 becomes U+FFFD instead of
/// failing the run, since log output routinely carries stray bytes.
pub fn decode_payload(payload: &LogPayload) -> Result<String> {
    if payload.is_archive() {
        decode_archive(&payload.bytes)
    } else {
        Ok(String::from_utf8_lossy(&payload.bytes).into_owned())
    }
}

fn decode_archive(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Log archive is not a valid ZIP file")?;

    let mut text = String::new();
    let mut buf = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to open log archive entry {}", i))?;
        if entry.is_dir() {
            continue;
        }
        buf.clear();
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read log archive entry '{}'", entry.name()))?;
        text.push_str(&String::from_utf8_lossy(&buf));
    }
    Ok(text)
}

/// Last `max_chars` characters of `s` (Unicode-safe).
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let total = s.chars().count();
    if total <= max_chars {
        return s;
    }
    let skip = total - max_chars;
    let byte_idx = s
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[byte_idx..]
}
