//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragrail")]
#[command(
    author,
    version,
    about = "Ask questions over local documents with retrieval, guardrails and chat memory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(long, global = true, env = "RAGRAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "cli")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split, embed and store documents for retrieval
    Ingest(IngestArgs),

    /// Ask a question
    Ask(AskArgs),

    /// Inspect or clear chat memory
    Memory(MemoryArgs),

    /// Show or check the configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    /// Document directory (overrides rag.path)
    pub path: Option<PathBuf>,

    /// Glob pattern (overrides rag.pattern)
    #[arg(long)]
    pub pattern: Option<String>,
}

#[derive(Args)]
pub struct AskArgs {
    /// Question text
    #[arg(required = true)]
    pub question: Vec<String>,

    /// Conversation to continue
    #[arg(long, default_value = "default")]
    pub memory_id: String,

    /// Print tokens as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Skip retrieval augmentation
    #[arg(long)]
    pub no_rag: bool,

    /// Named model from the `models` section
    #[arg(long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Args)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub action: MemoryAction,
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Print the messages of a conversation
    Show { memory_id: String },
    /// Delete the messages of a conversation
    Clear { memory_id: String },
    /// List stored conversations
    #[command(alias = "ls")]
    List,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration
    Check,
    /// Print the configuration file path
    Path,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Cli,
    Json,
}
