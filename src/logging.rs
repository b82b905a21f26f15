// src/logging.rs
//
// Diagnostic logging. Goes to stderr so packet output on stdout stays clean.
// Timestamps use the same `HH:MM:SS.mmm` local clock format as packet headers.

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count when RUST_LOG is not set
pub fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,serialtap={level},serialtap_lib={level}")
}

/// Install the global subscriber. RUST_LOG wins over the verbosity count.
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(spec)?,
        _ => EnvFilter::try_new(default_directive(verbosity))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert!(default_directive(0).contains("serialtap_lib=info"));
        assert!(default_directive(1).contains("serialtap_lib=debug"));
        assert!(default_directive(5).contains("serialtap_lib=trace"));
        assert!(EnvFilter::try_new(default_directive(2)).is_ok());
    }
}
