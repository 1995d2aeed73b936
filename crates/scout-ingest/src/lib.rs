//! Chunk ingestion for Board Signal Scout
//!
//! Turns extracted meeting text into [`Chunk`]s and moves them through JSON
//! lines files:
//! - word-window chunking with overlap
//! - meeting date inference from the text
//! - stable artifact and chunk identifiers
//!
//! Fetching and PDF extraction happen upstream; this crate starts from text.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use scout_evaluator::Chunk;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 1200;
pub const DEFAULT_OVERLAP: usize = 100;

/// Documents with less non-whitespace text than this are treated as failed
/// extractions.
pub const MIN_TEXT_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

// ============================================================================
// Chunking
// ============================================================================

/// Window sizes, in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// A window of words and its starting word offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub text: String,
    pub offset: usize,
}

/// Split `text` into overlapping windows of `params.chunk_size` words.
///
/// Empty text yields no windows; text that fits in one window yields one.
/// Consecutive windows share `params.overlap` words.
pub fn chunk_text(text: &str, params: ChunkParams) -> Result<Vec<TextWindow>, IngestError> {
    params.validate()?;

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let stride = params.chunk_size - params.overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + params.chunk_size).min(words.len());
        windows.push(TextWindow {
            text: words[start..end].join(" "),
            offset: start,
        });
        if end == words.len() {
            break;
        }
        start += stride;
    }
    Ok(windows)
}

// ============================================================================
// Artifacts
// ============================================================================

/// Metadata for one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub artifact_id: String,
    pub district: String,
    pub source_url: String,
    pub board_page_url: String,
    pub meeting_date: Option<String>,
}

impl Artifact {
    pub fn new(district: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        Self {
            artifact_id: artifact_id_for(&source_url),
            district: district.into(),
            source_url,
            board_page_url: String::new(),
            meeting_date: None,
        }
    }

    pub fn with_board_page(mut self, url: impl Into<String>) -> Self {
        self.board_page_url = url.into();
        self
    }

    pub fn with_meeting_date(mut self, date: impl Into<String>) -> Self {
        self.meeting_date = Some(date.into());
        self
    }
}

/// First 16 hex digits of the SHA-256 of the source URL.
pub fn artifact_id_for(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

pub fn chunk_id_for(artifact_id: &str, index: usize) -> String {
    format!("{artifact_id}_chunk_{index:03}")
}

/// Chunk one document's text.
///
/// Returns no chunks when the text is too short to be a real extraction.
/// When the artifact carries no meeting date, one is inferred from the text.
pub fn build_chunks(artifact: &Artifact, text: &str, params: ChunkParams) -> Result<Vec<Chunk>, IngestError> {
    let content_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if content_chars < MIN_TEXT_CHARS {
        debug!(
            artifact_id = %artifact.artifact_id,
            chars = content_chars,
            "skipping artifact with too little text"
        );
        return Ok(Vec::new());
    }

    let meeting_date = artifact
        .meeting_date
        .clone()
        .or_else(|| parse_meeting_date(text).map(|d| d.format("%Y-%m-%d").to_string()));

    let chunks = chunk_text(text, params)?
        .into_iter()
        .enumerate()
        .map(|(index, window)| Chunk {
            chunk_id: chunk_id_for(&artifact.artifact_id, index),
            artifact_id: artifact.artifact_id.clone(),
            district: artifact.district.clone(),
            source_url: artifact.source_url.clone(),
            board_page_url: artifact.board_page_url.clone(),
            meeting_date: meeting_date.clone(),
            text: window.text,
            offset: window.offset,
        })
        .collect();
    Ok(chunks)
}

// ============================================================================
// Meeting dates
// ============================================================================

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn numeric_us_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").expect("date pattern compiles")
    })
}

fn iso_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("date pattern compiles"))
}

fn month_name_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2}),?\s+(\d{4})\b",
        )
        .expect("date pattern compiles")
    })
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_ascii_lowercase().chars().take(3).collect();
    MONTHS
        .iter()
        .position(|m| m.starts_with(&prefix))
        .map(|i| i as u32 + 1)
}

/// Infer a meeting date from free text.
///
/// Recognizes `MM/DD/YYYY`, `MM-DD-YYYY`, `YYYY-MM-DD`, `Month DD, YYYY` and
/// `Mon DD, YYYY`. When several dates appear, the valid date nearest the start
/// of the text wins, whichever format it is written in.
pub fn parse_meeting_date(text: &str) -> Option<NaiveDate> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    for caps in numeric_us_date().captures_iter(text) {
        let (Ok(m), Ok(d), Ok(y)) = (
            caps[1].parse::<u32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<i32>(),
        ) else {
            continue;
        };
        if let (Some(date), Some(pos)) = (NaiveDate::from_ymd_opt(y, m, d), caps.get(0)) {
            found.push((pos.start(), date));
        }
    }
    for caps in iso_date().captures_iter(text) {
        let (Ok(y), Ok(m), Ok(d)) = (
            caps[1].parse::<i32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
        ) else {
            continue;
        };
        if let (Some(date), Some(pos)) = (NaiveDate::from_ymd_opt(y, m, d), caps.get(0)) {
            found.push((pos.start(), date));
        }
    }
    for caps in month_name_date().captures_iter(text) {
        let Some(m) = month_number(&caps[1]) else {
            continue;
        };
        let (Ok(d), Ok(y)) = (caps[2].parse::<u32>(), caps[3].parse::<i32>()) else {
            continue;
        };
        if let (Some(date), Some(pos)) = (NaiveDate::from_ymd_opt(y, m, d), caps.get(0)) {
            found.push((pos.start(), date));
        }
    }

    found.into_iter().min_by_key(|(pos, _)| *pos).map(|(_, date)| date)
}

// ============================================================================
// Chunk files
// ============================================================================

/// Read a chunks JSON lines file. Blank lines are ignored; malformed lines
/// are logged and skipped.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let file = File::open(path).with_context(|| format!("opening chunks file {}", path.display()))?;
    let mut chunks = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Chunk>(&line) {
            Ok(chunk) => chunks.push(chunk),
            Err(err) => warn!(
                path = %path.display(),
                line = idx + 1,
                error = %err,
                "skipping malformed chunk line"
            ),
        }
    }
    Ok(chunks)
}

/// Append chunks to a JSON lines file, creating it if needed.
pub fn append_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    let mut writer = BufWriter::new(file);
    for chunk in chunks {
        serde_json::to_writer(&mut writer, chunk)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
