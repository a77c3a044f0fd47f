//! Common utilities for the MSI dataset tools
//!
//! This crate holds what `msi` and `magi` share: the [`Settings`] read from the environment,
//! the [`run`] entry point that sets up logging and the async runtime, the [`Interaction`]
//! trait through which library code prompts the user, and a few formatting helpers.
//!
//! # Logging
//!
//! Logging goes through `tracing`. The level is chosen from the `-v` count of the binaries
//! (`-v` INFO, `-vv` DEBUG, `-vvv` TRACE, ERROR otherwise) unless `RUST_LOG` is set, and
//! everything is written to stderr so that stdout stays reserved for listings.

pub mod config;
pub mod interact;

pub use config::{ConfigError, OutputConfig, Settings};
pub use interact::{Interaction, Terminal};

fn log_level(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level(output)));
    // a subscriber may already be installed (e.g. by tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run `func` on a single-threaded runtime with logging configured
///
/// Returns `None` if the runtime could not be created or `func` failed; the error chain is
/// logged (unless quiet) before returning.
pub fn run<Fut, T>(output: OutputConfig, func: impl FnOnce() -> Fut) -> Option<T>
where
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    init_tracing(&output);
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to create runtime: {:#}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::error!("{:#}", &error);
            if !output.quiet {
                eprintln!("error: {error:#}");
            }
            None
        }
    }
}

/// Human readable size using SI units, e.g. "1.5 GB"
pub fn format_size(bytes: u64) -> String {
    bytesize::ByteSize::b(bytes).display().si().to_string()
}

/// Parse a size limit given as a number and a unit, e.g. (100.0, "GB")
pub fn parse_size(value: f64, units: &str) -> anyhow::Result<u64> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow::anyhow!("invalid size: {value}"));
    }
    let size = format!("{value} {}", units.trim())
        .parse::<bytesize::ByteSize>()
        .map_err(|error| anyhow::anyhow!("invalid size '{value} {units}': {error}"))?;
    Ok(size.as_u64())
}

/// Local time formatting used by listings
pub fn format_time(time: std::time::SystemTime) -> String {
    let time: chrono::DateTime<chrono::Local> = time.into();
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Expand a leading `~` to $HOME
pub fn expand_tilde(path: &str) -> std::path::PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let rest = path.trim_start_matches('~').trim_start_matches('/');
            return std::path::PathBuf::from(home).join(rest);
        }
    }
    std::path::PathBuf::from(path)
}
