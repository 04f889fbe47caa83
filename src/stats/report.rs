use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::collector::RequestDetail;

/// Run directories retained per report prefix.
const KEEP_RUNS: usize = 10;

fn serialize_ms<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(value.as_millis())
}

/// Final statistics of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    #[serde(rename = "total_time_ms", serialize_with = "serialize_ms")]
    pub total_time: Duration,
    #[serde(rename = "min_duration_ms", serialize_with = "serialize_ms")]
    pub min_duration: Duration,
    #[serde(rename = "max_duration_ms", serialize_with = "serialize_ms")]
    pub max_duration: Duration,
    #[serde(rename = "avg_duration_ms", serialize_with = "serialize_ms")]
    pub avg_duration: Duration,
    #[serde(rename = "p50_ms", serialize_with = "serialize_ms")]
    pub p50: Duration,
    #[serde(rename = "p90_ms", serialize_with = "serialize_ms")]
    pub p90: Duration,
    #[serde(rename = "p95_ms", serialize_with = "serialize_ms")]
    pub p95: Duration,
    #[serde(rename = "p99_ms", serialize_with = "serialize_ms")]
    pub p99: Duration,
    pub qps: f64,
    pub total_bytes: u64,
    pub errors: HashMap<String, u64>,
    pub status_codes: HashMap<u16, u64>,
    pub request_details: Vec<RequestDetail>,
}

impl Report {
    /// Prints the console summary table.
    pub fn print_summary(&self) {
        println!();
        println!("Load test report");
        println!("----------------------------------------------");
        println!("  total requests    {:>12}", self.total_requests);
        println!("  success           {:>12}", self.success_requests);
        println!("  failed            {:>12}", self.failed_requests);
        println!("  success rate      {:>11.2}%", self.success_rate);
        println!("  total time        {:>12}", format_duration(self.total_time));
        println!("  throughput        {:>9.2} r/s", self.qps);
        println!("  data moved        {:>12}", format_bytes(self.total_bytes));
        println!("----------------------------------------------");
        println!("  min               {:>12}", format_duration(self.min_duration));
        println!("  avg               {:>12}", format_duration(self.avg_duration));
        println!("  max               {:>12}", format_duration(self.max_duration));
        println!("  p50               {:>12}", format_duration(self.p50));
        println!("  p90               {:>12}", format_duration(self.p90));
        println!("  p95               {:>12}", format_duration(self.p95));
        println!("  p99               {:>12}", format_duration(self.p99));

        if !self.status_codes.is_empty() {
            println!("----------------------------------------------");
            let mut codes: Vec<(&u16, &u64)> = self.status_codes.iter().collect();
            codes.sort_unstable();
            for (code, count) in codes {
                println!("  status {:<11} {:>12}", code, count);
            }
        }

        if !self.errors.is_empty() {
            println!("----------------------------------------------");
            let mut errors: Vec<(&String, &u64)> = self.errors.iter().collect();
            errors.sort_by(|a, b| b.1.cmp(a.1));
            for (message, count) in errors {
                let message = if message.len() > 70 {
                    format!("{}...", &message[..67])
                } else {
                    message.clone()
                };
                println!("  {:>6}x {}", count, message);
            }
        }
        println!();
    }

    /// Writes `index.html` + `report.json` under `<prefix>/<unix-ts>/` and
    /// prunes old runs, keeping the newest ten.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or files cannot be written.
    pub fn save_artifacts(&self, prefix: &str) -> Result<PathBuf, std::io::Error> {
        let run_dir = Path::new(prefix).join(chrono::Utc::now().timestamp().to_string());
        std::fs::create_dir_all(&run_dir)?;

        let json = serde_json::to_vec_pretty(self).unwrap_or_else(|_| b"{}".to_vec());
        std::fs::write(run_dir.join("report.json"), &json)?;

        let html = render_static_html(&json);
        std::fs::write(run_dir.join("index.html"), html)?;

        prune_old_runs(Path::new(prefix));
        Ok(run_dir)
    }
}

/// The dashboard template doubles as the static report: the placeholder is
/// replaced with the embedded report JSON, which switches the page out of
/// live mode.
fn render_static_html(report_json: &[u8]) -> String {
    let template = super::realtime::DASHBOARD_HTML;
    let embedded = String::from_utf8_lossy(report_json);
    template.replace("/*__REPORT_JSON__*/null", &embedded)
}

fn prune_old_runs(prefix: &Path) {
    let Ok(entries) = std::fs::read_dir(prefix) else {
        return;
    };

    let mut runs: Vec<(i64, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stamp: i64 = name.to_str()?.parse().ok()?;
            Some((stamp, entry.path()))
        })
        .collect();

    if runs.len() <= KEEP_RUNS {
        return;
    }

    runs.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in runs.split_off(KEEP_RUNS) {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!("removed old report {}", path.display()),
            Err(err) => warn!("failed to remove old report {}: {}", path.display(), err),
        }
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis >= 1_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if millis > 0 {
        format!("{}ms", millis)
    } else {
        format!("{}us", duration.as_micros())
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.2}{}", value, UNITS[unit])
    }
}
