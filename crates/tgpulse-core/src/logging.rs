use crate::Result;

/// Initialize tracing for a bridge binary.
///
/// Logs always go to stderr: stdout is reserved for the JSON-RPC stream.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let target = service_name.replace('-', "_");
        EnvFilter::new(format!(
            "warn,tgpulse_core=info,tgpulse_telegram=info,{target}=info"
        ))
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .try_init();

    Ok(())
}
