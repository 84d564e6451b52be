// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failures while assigning a post ID to a single file. Never fatal to a scan.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    #[error("could not resolve a group for '{0}'")]
    GroupResolution(String),

    #[error("group {code} has no sequence numbers left (max {max})")]
    SequenceExhausted { code: String, max: u32 },
}

/// Fatal failures of an index run.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to load index {}: {reason}", path.display())]
    IndexLoad { path: PathBuf, reason: String },

    #[error("failed to write index {}: {source}", path.display())]
    IndexWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("failed to read mapping file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mapping file {} is not a JSON object of strings: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid group code '{code}' for group '{name}' (expected 4 uppercase letters)")]
    InvalidCode { name: String, code: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJsonFound,

    #[error("invalid JSON after repair: {0}")]
    InvalidJson(String),
}

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model returned no text")]
    EmptyResponse,

    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal failures of a captioning run. Per-image failures are not errors here;
/// they are reported in the run summary.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("image folder not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Table(#[from] TableError),
}
