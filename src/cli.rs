use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    document::{ContentType, TenantId},
    engine::SearchMode,
};

#[derive(Debug, Parser)]
#[command(
    name = "ragstash",
    about = "Per-user hybrid search over saved web content and documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save a piece of content for a user
    Save(SaveArgs),
    /// Search a user's saved content
    Search(SearchArgs),
    /// Remove a saved document
    Remove(RemoveArgs),
    /// Show system status and per-user document counts
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
}

// -- Save --

#[derive(Debug, Parser)]
pub struct SaveArgs {
    /// The content to save (full text)
    pub content: String,

    /// User the content belongs to
    #[arg(short = 't', long)]
    pub tenant: TenantId,

    /// Document title
    #[arg(long, default_value = "Untitled")]
    pub title: String,

    /// Content type: webpage, pdf, docx, spreadsheet, image, or text
    #[arg(long = "type", default_value = "text")]
    pub content_type: ContentType,

    /// Source URL the content was saved from
    #[arg(long)]
    pub url: Option<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// User whose content is searched
    #[arg(short = 't', long)]
    pub tenant: TenantId,

    /// Retrieval mode: semantic, keyword, or hybrid
    #[arg(short = 'm', long, default_value = "hybrid")]
    pub mode: SearchMode,

    /// Restrict results to one content type
    #[arg(long = "type")]
    pub content_type: Option<ContentType>,

    /// Only match documents saved at or after this time (epoch seconds)
    #[arg(long)]
    pub from: Option<u64>,

    /// Only match documents saved at or before this time (epoch seconds)
    #[arg(long)]
    pub to: Option<u64>,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Remove --

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Document id to remove
    pub doc_id: u64,

    /// User the document belongs to
    #[arg(short = 't', long)]
    pub tenant: TenantId,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
