use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML config '{path}': {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .yaml, .yml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have a .yaml, .yml or .json extension.")]
    MissingExtension,
    #[error("Missing URL (set --url, or url/host in the config).")]
    MissingUrl,
    #[error("API '{api}' has no effective URL (needs url, or host + path).")]
    ApiMissingUrl { api: String },
    #[error("Concurrency must be >= 1.")]
    ZeroConcurrency,
    #[error("Either requests or duration must be set.")]
    MissingRequestBudget,
    #[error("Invalid header '{value}' (expected 'Name: value').")]
    InvalidHeader { value: String },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Invalid duration unit '{unit}'.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Duration must be > 0.")]
    DurationZero,
    #[error("Cyclic dependency detected at API '{api}'.")]
    CyclicDependency { api: String },
    #[error("API '{dependent}' depends on unknown API '{api}'.")]
    UnknownApi { api: String, dependent: String },
    #[error("Extractor '{name}' on API '{api}': {message}")]
    InvalidExtractor {
        api: String,
        name: String,
        message: String,
    },
    #[error("Extractor '{name}' on API '{api}': invalid regex: {source}")]
    InvalidExtractorRegex {
        api: String,
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("Verify rule on API '{api}': custom verifier '{name}' is not registered.")]
    UnknownCustomVerifier { api: String, name: String },
    #[error("Unknown template function '{name}'.")]
    UnknownTemplateFunction { name: String },
    #[error("Template function '{name}': {message}")]
    TemplateArgument { name: String, message: String },
    #[error("Unterminated template placeholder in '{input}'.")]
    UnterminatedPlaceholder { input: String },
    #[error("Failed to read curl file '{path}': {source}")]
    ReadCurlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Curl command has no URL.")]
    CurlMissingUrl,
    #[error("Unterminated quote in curl command.")]
    CurlUnterminatedQuote,
}
