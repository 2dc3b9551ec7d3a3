use clap::{Args, Parser, Subcommand};

use crate::config::CliOverrides;

/// sitemirror cli
#[derive(Debug, Parser)]
#[command(name = "sitemirror")]
#[command(about = "Mirror a website to disk for offline browsing")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download a website
    Download {
        /// The root URL to mirror
        url: String,

        #[command(flatten)]
        options: CrawlFlags,
    },

    /// Resume a previous download job from its state file
    Resume {
        /// 8-hex-digit job id (printed when the job started)
        job_id: String,

        #[command(flatten)]
        options: CrawlFlags,
    },
}

/// Crawl flags shared by `download` and `resume`. Unset flags fall back to
/// `config.yaml` in the working directory, then to built-in defaults.
#[derive(Debug, Args)]
pub struct CrawlFlags {
    /// Number of concurrent workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum recursion depth
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Retry attempts per URL
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between retry attempts, in milliseconds
    #[arg(long)]
    pub delay: Option<u64>,

    /// Maximum file size in bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Output directory
    #[arg(long)]
    pub output_dir: Option<String>,

    /// HTTP User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,
}

impl CrawlFlags {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            workers: self.workers,
            max_depth: self.max_depth,
            retries: self.retries,
            delay_ms: self.delay,
            max_file_size: self.max_file_size,
            output_dir: self.output_dir.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
