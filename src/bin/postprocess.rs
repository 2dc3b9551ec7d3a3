use clap::Parser;
use std::path::PathBuf;

use sitemirror::logging;
use sitemirror::postprocess::{PostConfig, PostProcessor};

/// Rewrite a downloaded mirror for fully offline browsing.
#[derive(Debug, Parser)]
#[command(name = "sitemirror-postprocess")]
#[command(version)]
struct Args {
    /// Directory containing the downloaded site
    #[arg(long)]
    input: PathBuf,

    /// Output directory (default: process in place)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Original host of the site (example.com)
    #[arg(long)]
    host: String,

    /// Root path of the site on the original host
    #[arg(long, default_value = "/")]
    root: String,

    /// Number of worker tasks (default: 2 x CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// Keep links to external hosts instead of blanking them
    #[arg(long)]
    keep_external: bool,

    /// Replace links to missing local targets with '#'
    #[arg(long)]
    remove_missing: bool,

    /// Convert HTML-bearing .php files to .html
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    convert_php: bool,

    /// Log every rewritten file
    #[arg(long)]
    verbose: bool,

    /// Remove <script> elements whose src contains any of these patterns
    /// ("inline" matches inline scripts)
    #[arg(long = "remove-script")]
    remove_scripts: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init()?;
    let args = Args::parse();

    let host = args
        .host
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string();

    let mut config = PostConfig::new(args.input, host);
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    config.site_root = args.root;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.keep_external = args.keep_external;
    config.remove_missing = args.remove_missing;
    config.convert_php = args.convert_php;
    config.verbose = args.verbose;
    config.scripts_to_remove = args.remove_scripts;

    let processor = PostProcessor::new(config)?;
    let report = processor.run().await?;
    println!("{report}");

    Ok(())
}
