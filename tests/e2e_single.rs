mod support;

use std::fs;

use tempfile::tempdir;

use support::{run_volley, spawn_http_server};

#[test]
fn smoke_run_records_every_request() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let prefix = dir.path().join("reports");

    let args: Vec<String> = vec![
        "--url".to_owned(),
        format!("{}/ok", url),
        "-c".to_owned(),
        "4".to_owned(),
        "-n".to_owned(),
        "10".to_owned(),
        "--timeout".to_owned(),
        "1s".to_owned(),
        "--realtime-port".to_owned(),
        "0".to_owned(),
        "--report-prefix".to_owned(),
        prefix.to_string_lossy().into_owned(),
    ];
    let output = run_volley(args)?;

    if !output.status.success() {
        return Err(format!(
            "volley failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.contains("total requests") {
        return Err(format!("missing summary: {}", stdout));
    }

    // One run directory with both artifacts.
    let runs: Vec<_> = fs::read_dir(&prefix)
        .map_err(|err| format!("read reports dir failed: {}", err))?
        .filter_map(Result::ok)
        .collect();
    if runs.len() != 1 {
        return Err(format!("expected 1 run dir, found {}", runs.len()));
    }
    let run_dir = runs[0].path();

    let report_json = fs::read_to_string(run_dir.join("report.json"))
        .map_err(|err| format!("report.json missing: {}", err))?;
    let report: serde_json::Value =
        serde_json::from_str(&report_json).map_err(|err| format!("bad report json: {}", err))?;

    if report["total_requests"] != serde_json::json!(40) {
        return Err(format!("total_requests: {}", report["total_requests"]));
    }
    if report["success_requests"] != serde_json::json!(40) {
        return Err(format!("success_requests: {}", report["success_requests"]));
    }
    if report["status_codes"]["200"] != serde_json::json!(40) {
        return Err(format!("status_codes: {}", report["status_codes"]));
    }
    let p50 = report["p50_ms"].as_u64().unwrap_or(u64::MAX);
    let p99 = report["p99_ms"].as_u64().unwrap_or(0);
    if p50 > p99 {
        return Err(format!("p50 {} > p99 {}", p50, p99));
    }

    let html = fs::read_to_string(run_dir.join("index.html"))
        .map_err(|err| format!("index.html missing: {}", err))?;
    if !html.contains("\"total_requests\"") {
        return Err("static report did not embed the data".to_owned());
    }
    Ok(())
}

#[test]
fn failures_are_reported_but_do_not_fail_the_process() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;

    let args: Vec<String> = vec![
        "--url".to_owned(),
        format!("{}/fail", url),
        "-c".to_owned(),
        "2".to_owned(),
        "-n".to_owned(),
        "3".to_owned(),
        "--realtime-port".to_owned(),
        "0".to_owned(),
        "--no-report".to_owned(),
        "--report-prefix".to_owned(),
        dir.path().to_string_lossy().into_owned(),
    ];
    let output = run_volley(args)?;

    if !output.status.success() {
        return Err("request-level failures must not fail the process".to_owned());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.contains("status 500") {
        return Err(format!("missing 500 histogram line: {}", stdout));
    }
    Ok(())
}

#[test]
fn missing_url_is_a_config_error_exit() -> Result<(), String> {
    let output = run_volley(["-c", "2", "-n", "3"])?;
    if output.status.success() {
        return Err("missing URL must exit non-zero".to_owned());
    }
    Ok(())
}

#[test]
fn config_file_drives_the_run() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;

    let config_path = dir.path().join("load.yaml");
    let config = format!(
        "url: {}/ok\nconcurrency: 2\nrequests: 5\ntimeout: 1s\nadvanced:\n  realtime_port: 0\n",
        url
    );
    fs::write(&config_path, config).map_err(|err| format!("write config failed: {}", err))?;

    let args: Vec<String> = vec![
        "--config".to_owned(),
        config_path.to_string_lossy().into_owned(),
        "--no-report".to_owned(),
        "--report-prefix".to_owned(),
        dir.path().to_string_lossy().into_owned(),
    ];
    let output = run_volley(args)?;

    if !output.status.success() {
        return Err(format!(
            "config run failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.contains("10") {
        return Err(format!("expected 10 requests in summary: {}", stdout));
    }
    Ok(())
}

#[test]
fn curl_file_drives_the_run() -> Result<(), String> {
    let (url, _server) = spawn_http_server()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;

    let curl_path = dir.path().join("request.curl.txt");
    fs::write(&curl_path, format!("curl '{}/ok' -H 'Accept: text/plain'", url))
        .map_err(|err| format!("write curl file failed: {}", err))?;

    let args: Vec<String> = vec![
        "--curl".to_owned(),
        curl_path.to_string_lossy().into_owned(),
        "-c".to_owned(),
        "1".to_owned(),
        "-n".to_owned(),
        "2".to_owned(),
        "--realtime-port".to_owned(),
        "0".to_owned(),
        "--no-report".to_owned(),
        "--report-prefix".to_owned(),
        dir.path().to_string_lossy().into_owned(),
    ];
    let output = run_volley(args)?;

    if !output.status.success() {
        return Err(format!(
            "curl run failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}
