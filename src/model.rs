// src/model.rs

use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;

/// Width of the zero-padded sequence part of a post ID
pub const SEQUENCE_WIDTH: usize = 4;

/// Largest sequence number that still fits in `SEQUENCE_WIDTH` digits
pub const MAX_SEQUENCE: u32 = 9999;

/// Code used when no mapping entry matches a path
pub const FALLBACK_CODE: &str = "MISC";

/// Short uppercase namespace prefix for post IDs, e.g. `NEOW`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupCode(String);

impl GroupCode {
    /// Accepts exactly four ASCII uppercase letters.
    pub fn new(code: &str) -> Option<Self> {
        if code.len() == 4 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Some(Self(code.to_string()))
        } else {
            None
        }
    }

    pub fn fallback() -> Self {
        Self(FALLBACK_CODE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The externally visible ID of an indexed file, `<CODE>-<NNNN>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId {
    pub code: GroupCode,
    pub sequence: u32,
}

impl PostId {
    /// Strict parse of `^[A-Z]{4}-\d{4}$`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (code, digits) = raw.split_once('-')?;
        if digits.len() != SEQUENCE_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            code: GroupCode::new(code)?,
            sequence: digits.parse().ok()?,
        })
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:0width$}", self.code, self.sequence, width = SEQUENCE_WIDTH)
    }
}

/// One parsed model answer: field label -> value, in the order the model wrote them
pub type Record = IndexMap<String, String>;

/// A parsed record tagged with the image it describes
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionRecord {
    pub id: String,
    pub fields: Record,
}

/// A file the scan could not assign an ID to
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of one `build_index` run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanSummary {
    pub qualifying: usize,
    pub already_indexed: usize,
    pub assigned: usize,
    /// Files left out of the index, kept for operator follow-up
    pub skipped: Vec<SkippedFile>,
}

/// An image that produced no record
#[derive(Debug, Clone, PartialEq)]
pub struct FailedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one captioning run
#[derive(Debug, Default)]
pub struct AnalysisSummary {
    pub images: usize,
    pub records: usize,
    pub duplicates_dropped: usize,
    pub failures: Vec<FailedImage>,
    pub output: PathBuf,
}
