use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for CLI use.
///
/// Log lines go to stderr so stdout stays clean for progress output.
/// `RUST_LOG` controls filtering (default: "info").
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| format!("initialize tracing subscriber: {e}"))?;

    Ok(())
}
