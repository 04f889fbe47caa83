use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::Protocol;

use super::parse::parse_duration_value;

/// A duration field that accepts either bare seconds (`30`) or a suffixed
/// string (`"300ms"`, `"2m"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for empty, malformed or zero durations.
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    return Err(ConfigError::DurationZero);
                }
                Ok(Duration::from_secs(*secs))
            }
            DurationValue::Text(text) => parse_duration_value(text),
        }
    }
}

impl From<Duration> for DurationValue {
    fn from(duration: Duration) -> Self {
        DurationValue::Text(format!("{}ms", duration.as_millis()))
    }
}

/// Root workload definition, loaded from YAML/JSON or assembled from flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: Protocol,
    pub concurrency: u64,
    /// Requests per worker; 0 with a duration set means run until it elapses.
    pub requests: u64,
    pub duration: Option<DurationValue>,
    pub timeout: DurationValue,

    pub host: Option<String>,
    pub url: Option<String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,

    pub variables: BTreeMap<String, serde_json::Value>,
    pub apis: Vec<ApiConfig>,

    pub http: HttpOptions,
    pub websocket: WebsocketOptions,
    pub grpc: GrpcOptions,
    pub advanced: AdvancedOptions,
    pub verify: Option<VerifyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            protocol: Protocol::Http,
            concurrency: 1,
            requests: 1,
            duration: None,
            timeout: DurationValue::Text("30s".to_owned()),
            host: None,
            url: None,
            method: "GET".to_owned(),
            headers: BTreeMap::new(),
            body: String::new(),
            variables: BTreeMap::new(),
            apis: Vec::new(),
            http: HttpOptions::default(),
            websocket: WebsocketOptions::default(),
            grpc: GrpcOptions::default(),
            advanced: AdvancedOptions::default(),
            verify: None,
        }
    }
}

/// One endpoint definition; inherits unset fields from the root config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub name: String,
    pub host: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub weight: u32,
    pub verify: Vec<VerifyConfig>,
    pub depends_on: Vec<String>,
    pub extractors: Vec<ExtractorSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    #[serde(alias = "JSONPATH", alias = "json_path")]
    Jsonpath,
    #[serde(alias = "REGEX")]
    Regex,
    #[serde(alias = "HEADER")]
    Header,
}

/// Pulls one named value out of a response for later `{{.api.var}}` use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractorSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExtractorKind,
    pub jsonpath: Option<String>,
    pub regex: Option<String>,
    pub header: Option<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyKind {
    #[default]
    #[serde(alias = "status", alias = "STATUS_CODE")]
    StatusCode,
    #[serde(alias = "JSONPATH", alias = "json_path")]
    Jsonpath,
    #[serde(alias = "CONTAINS")]
    Contains,
    #[serde(alias = "REGEX")]
    Regex,
    #[serde(alias = "CUSTOM")]
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    HasPrefix,
    HasSuffix,
    Empty,
    NotEmpty,
}

/// One assertion over a response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    #[serde(rename = "type")]
    pub kind: VerifyKind,
    pub jsonpath: Option<String>,
    pub custom: Option<String>,
    pub operator: Option<Operator>,
    pub expect: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub http2: bool,
    pub keepalive: bool,
    pub follow_redirects: bool,
    pub max_conns_per_host: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        HttpOptions {
            http2: false,
            keepalive: false,
            follow_redirects: true,
            max_conns_per_host: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebsocketOptions {
    pub ping_interval: DurationValue,
    pub ping_timeout: DurationValue,
}

impl Default for WebsocketOptions {
    fn default() -> Self {
        WebsocketOptions {
            ping_interval: DurationValue::Text("30s".to_owned()),
            ping_timeout: DurationValue::Text("10s".to_owned()),
        }
    }
}

/// Accepted for forward compatibility; selecting the grpc protocol is a
/// fatal startup error until a wire client ships.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GrpcOptions {
    pub use_reflection: bool,
    pub service: Option<String>,
    pub method: Option<String>,
    pub proto_file: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    pub enable_breaker: bool,
    pub max_failures: u32,
    pub reset_timeout: DurationValue,
    pub enable_retry: bool,
    pub max_retries: u32,
    pub retry_interval: DurationValue,
    pub ramp_up: Option<DurationValue>,
    pub realtime_port: u16,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        AdvancedOptions {
            enable_breaker: false,
            max_failures: 5,
            reset_timeout: DurationValue::Text("30s".to_owned()),
            enable_retry: false,
            max_retries: 3,
            retry_interval: DurationValue::Text("1s".to_owned()),
            ramp_up: None,
            realtime_port: 8088,
        }
    }
}
