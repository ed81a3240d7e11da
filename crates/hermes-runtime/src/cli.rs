//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hermes", about = "workforce-management side panel runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check whether a URL is a linkable tenant session page
    Classify(UrlOpts),
    /// Print the canonical vanity origin for a tenant URL
    Canonicalize(UrlOpts),
    /// Run the full runtime against a simulated browser
    Demo,
}

#[derive(clap::Args)]
pub struct UrlOpts {
    /// URL to inspect
    pub url: String,
}
