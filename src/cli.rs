// src/cli.rs

use crate::caption::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assign post IDs to new images and update the index file
    #[command(after_help = "Example:\n    post-indexer index -d mydir -m mymapping.json -i mynewindex.json")]
    Index(IndexArgs),

    /// Caption images with a multimodal model and write the answers to CSV
    Analyze(AnalyzeArgs),

    /// Replace whitespace with underscores in file and directory names
    CleanNames {
        /// Directory to process
        #[arg(default_value = ".")]
        directory: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct IndexArgs {
    /// The directory to process
    #[arg(short, long, default_value = "assets")]
    pub directory: PathBuf,

    /// File storing the path -> post ID index
    #[arg(short, long, default_value = "file_index.json")]
    pub index_file: PathBuf,

    /// JSON file mapping group names to 4-letter codes (built-in table if omitted)
    #[arg(short, long)]
    pub mapping: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Folder containing the images
    #[arg(long, default_value = "assets")]
    pub image_folder: PathBuf,

    /// Instructions text file
    #[arg(long, default_value = "instruction.txt")]
    pub instructions_file: PathBuf,

    /// Prompt text file
    #[arg(long, default_value = "prompt.txt")]
    pub prompt_file: PathBuf,

    /// Model identifier
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Output CSV path (defaults to a timestamped file in the working directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Index file whose post IDs are added as a column
    #[arg(short, long)]
    pub index_file: Option<PathBuf>,

    /// API key for the model endpoint
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of the generateContent API
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Concurrent model calls
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Extra attempts for a failed model call
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    pub temperature: f32,
}
