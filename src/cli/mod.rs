//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragline",
    version,
    about = "Hybrid retrieval and ranking engine for citation-grounded answers",
    long_about = "ragline searches a pre-built document repository with a semantic and a keyword leg, \
                  fuses both with Reciprocal Rank Fusion, caps results per document, reranks by title \
                  overlap and maps the numbered citations of an answer back to their sources."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragline/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the configuration
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve passages for a question
    Query {
        /// Question text
        query: String,

        /// Number of passages to return (defaults to search.match_count)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,

        /// Skip LLM query expansion for this call
        #[arg(long)]
        no_expansion: bool,
    },

    /// Map the citations of an answer to their sources
    Cite {
        /// File containing the generated answer
        #[arg(long, value_name = "FILE")]
        answer: PathBuf,

        /// JSON outcome saved from `ragline query --json`
        #[arg(long, value_name = "FILE")]
        results: PathBuf,

        /// Group several passages under each document
        #[arg(long)]
        multi_chunk: bool,

        /// Maximum number of sources shown (defaults to display.max_sources)
        #[arg(long)]
        max_sources: Option<usize>,

        /// Print the source list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import documents and chunks from a corpus file
    Import {
        /// Corpus JSON file
        corpus: PathBuf,
    },

    /// Show repository statistics
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
