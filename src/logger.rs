use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Priority: `--verbose` > `--quiet` > `--log-level`, all overridable via
/// `VOLLEY_LOG` / `RUST_LOG`.
pub fn init_logging(level: &str, log_file: Option<&str>, quiet: bool, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        level
    };

    let filter = std::env::var("VOLLEY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new(default_level),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    let result = if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let subscriber = FmtSubscriber::builder()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .finish();
                tracing::subscriber::set_global_default(subscriber)
            }
            Err(err) => {
                eprintln!("Failed to open log file '{}': {}", path, err);
                let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
                tracing::subscriber::set_global_default(subscriber)
            }
        }
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)
    };

    if let Err(err) = result {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}
