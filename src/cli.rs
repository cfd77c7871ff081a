use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::agents::config::StorageBackend;

/// Parley - streaming chat over your notes with OpenAI, Anthropic or Gemini models
#[derive(Parser, Debug, Clone)]
#[command(name = "parley", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PARLEY_CONFIG", default_value = "parley.toml")]
    pub config: PathBuf,

    /// Model to chat with (the provider follows from the name)
    #[arg(short, long, env = "PARLEY_MODEL")]
    pub model: Option<String>,

    /// Send one prompt, print the answer and exit
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Continue a stored conversation by id
    #[arg(long)]
    pub conversation: Option<String>,

    /// List stored conversations and exit
    #[arg(long)]
    pub list: bool,

    /// Conversation storage backend
    #[arg(long, value_enum)]
    pub storage: Option<StorageArg>,

    /// Directory for file storage
    #[arg(long)]
    pub storage_path: Option<String>,

    /// Notes directory the model may search and read
    #[arg(long, env = "PARLEY_VAULT_PATH")]
    pub vault: Option<String>,

    /// Maximum provider requests per prompt
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Do not generate conversation titles
    #[arg(long)]
    pub no_naming: bool,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, env = "PARLEY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageArg {
    InMemory,
    File,
}

impl From<StorageArg> for StorageBackend {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::InMemory => StorageBackend::InMemory,
            StorageArg::File => StorageBackend::File,
        }
    }
}
