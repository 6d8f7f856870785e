// src/cli.rs

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask how a repository evolved", long_about = None)]
pub struct Args {
    /// SQLite database to use instead of the configured one
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file to use instead of $HISTORIAN_CONFIG or the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a repository and extract its commit history
    Ingest {
        /// Path to the repository to ingest
        path: PathBuf,

        /// Display name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,

        /// Origin URL to record alongside the repository
        #[arg(long)]
        origin: Option<String>,

        /// Upper bound on commits to walk
        #[arg(long)]
        max_commits: Option<usize>,
    },

    /// List ingested repositories
    Repos,

    /// Ask a free-form question about how the codebase evolved
    Ask {
        repo_id: i64,

        question: String,

        /// Only consider commits touching this path (file or directory)
        #[arg(long)]
        file: Option<String>,

        /// Earliest commit date to consider (YYYY-MM-DD, inclusive)
        #[arg(long, value_parser = parse_date, requires = "until")]
        since: Option<NaiveDate>,

        /// Latest commit date to consider (YYYY-MM-DD, inclusive)
        #[arg(long, value_parser = parse_date, requires = "since")]
        until: Option<NaiveDate>,
    },

    /// Detect recurring design patterns
    Patterns {
        repo_id: i64,

        /// Only consider commits touching this path (file or directory)
        #[arg(long)]
        file: Option<String>,
    },

    /// Detect architectural decisions from major commits
    Architecture { repo_id: i64 },

    /// Show the stored analysis history of a repository
    Analyses { repo_id: i64 },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}
