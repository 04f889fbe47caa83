use std::path::Path;

use clap::Parser;

use crate::config::{self, Config, DurationValue};
use crate::error::AppError;
use crate::protocol::Protocol;

/// Multi-protocol load generator with live SSE telemetry.
#[derive(Debug, Parser)]
#[command(name = "volley", version, about)]
pub struct CliArgs {
    /// Workload config file (.yaml, .yml or .json)
    #[arg(long)]
    pub config: Option<String>,

    /// File containing a curl command to replay
    #[arg(long)]
    pub curl: Option<String>,

    /// Wire protocol for flag-built workloads
    #[arg(long, value_enum, default_value_t = Protocol::Http)]
    pub protocol: Protocol,

    /// Concurrent virtual users
    #[arg(short = 'c', long)]
    pub concurrency: Option<u64>,

    /// Requests per worker (0 with --duration runs until it elapses)
    #[arg(short = 'n', long)]
    pub requests: Option<u64>,

    /// Run length, e.g. 30s or 2m; overrides the request budget when set
    #[arg(long)]
    pub duration: Option<String>,

    /// Target URL
    #[arg(long)]
    pub url: Option<String>,

    /// Request method
    #[arg(long)]
    pub method: Option<String>,

    /// Per-request timeout, e.g. 500ms or 30s
    #[arg(long)]
    pub timeout: Option<String>,

    /// Request body
    #[arg(long = "data")]
    pub data: Option<String>,

    /// Request header as 'Name: value'; repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Log level: debug, info, warn or error
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to this file (plain text)
    #[arg(long)]
    pub log_file: Option<String>,

    /// Errors only
    #[arg(long)]
    pub quiet: bool,

    /// Debug logging
    #[arg(long)]
    pub verbose: bool,

    /// Directory prefix for report artifacts
    #[arg(long, default_value = "volley-report")]
    pub report_prefix: String,

    /// Skip writing report artifacts
    #[arg(long)]
    pub no_report: bool,

    /// Port for the realtime dashboard (default 8088)
    #[arg(long)]
    pub realtime_port: Option<u16>,
}

impl CliArgs {
    /// Builds the effective config from the chosen source (config file, curl
    /// file, or bare flags), applies the command-line overrides and
    /// finalizes it (templates, API inheritance, validation).
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] for unreadable sources and invalid configs.
    pub fn build_config(&self) -> Result<Config, AppError> {
        let mut cfg = if let Some(path) = &self.curl {
            config::parse_curl_file(Path::new(path))?
        } else if let Some(path) = &self.config {
            config::load_file(Path::new(path))?
        } else {
            let mut cfg = Config::default();
            cfg.protocol = self.protocol;
            cfg.url = self.url.clone();
            if let Some(data) = &self.data {
                cfg.body = data.clone();
            }
            cfg
        };

        // Flag-mode basics apply everywhere; file values win unless the flag
        // was given explicitly.
        if let Some(url) = &self.url {
            if self.config.is_none() && self.curl.is_none() {
                cfg.url = Some(url.clone());
            }
        }
        if let Some(method) = &self.method {
            cfg.method = method.to_uppercase();
        }
        if let Some(concurrency) = self.concurrency {
            cfg.concurrency = concurrency;
        }
        if let Some(requests) = self.requests {
            cfg.requests = requests;
        }
        if let Some(duration) = &self.duration {
            cfg.duration = Some(DurationValue::Text(duration.clone()));
            if self.requests.is_none() {
                cfg.requests = 0;
            }
        }
        if let Some(timeout) = &self.timeout {
            cfg.timeout = DurationValue::Text(timeout.clone());
        }
        if let Some(port) = self.realtime_port {
            cfg.advanced.realtime_port = port;
        }
        for header in &self.headers {
            let (name, value) = config::parse_header_arg(header)?;
            cfg.headers.insert(name, value);
        }

        config::finalize(&mut cfg)?;
        Ok(cfg)
    }
}
