use sitemirror::cli::{Cli, Commands};
use sitemirror::config;
use sitemirror::crawler::Job;
use sitemirror::events::EventSink;
use sitemirror::logging;
use sitemirror::models::StatsSnapshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init()?;
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Download { url, options } => {
            let config = config::load_config(&options.overrides());
            let (events, _events_rx) = EventSink::channel();

            let job = Job::new(&url, config, events)?;
            println!("🕷️  Mirroring {}", url);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("  Job ID:        {}", job.id);
            println!("  Output Dir:    {}", job.config.output_dir);
            println!("  Workers:       {}", job.config.workers);
            println!("  Max Depth:     {}", job.config.max_depth);
            println!("  Retries:       {}", job.config.retries);
            println!("  Max File Size: {} bytes", job.config.max_file_size);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

            setup_shutdown_handler(&job);
            let stats = job.run().await;
            print_summary(&stats);
        }

        Commands::Resume { job_id, options } => {
            let config = config::load_config(&options.overrides());
            let (events, _events_rx) = EventSink::channel();

            let job = Job::resume(&job_id, config, events)?;
            println!("🔁 Resuming job {} for {}", job.id, job.root_url);

            setup_shutdown_handler(&job);
            let stats = job.run().await;
            print_summary(&stats);
        }
    }

    Ok(())
}

/// The first SIGINT/SIGTERM cancels the job gracefully (workers quiesce,
/// state is saved). A second signal exits immediately.
fn setup_shutdown_handler(job: &std::sync::Arc<Job>) {
    let cancel = job.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        println!("\nReceived shutdown signal, initiating graceful shutdown...");
        println!("Send the signal again to force quit");
        cancel.cancel();

        shutdown_signal().await;
        eprintln!("\nForce quit requested, exiting immediately...");
        std::process::exit(1);
    });
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM, whichever arrives first.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate.recv() => {}
    }
}

fn print_summary(stats: &StatsSnapshot) {
    println!("\n✅ Download completed");
    println!("   Files saved:      {}", stats.total_files);
    println!("   Bytes downloaded: {}", stats.downloaded_bytes);
    println!("   Failed:           {}", stats.failed);
    println!("   Skipped:          {}", stats.skipped);
}
