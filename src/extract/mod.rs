
use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::{ExtractorKind, ExtractorSpec};
use crate::error::ConfigError;
use crate::protocol::Response;

/// One compiled extractor.
#[derive(Debug)]
enum Extractor {
    Jsonpath { path: String },
    Regex { pattern: Regex },
    Header { name: String },
}

impl Extractor {
    fn extract(&self, response: &Response) -> Result<String, String> {
        match self {
            Extractor::Jsonpath { path } => {
                if response.body.is_empty() {
                    return Err("response body is empty".to_owned());
                }
                let data: serde_json::Value = serde_json::from_slice(&response.body)
                    .map_err(|err| format!("response body is not valid JSON: {}", err))?;
                let matches = jsonpath_lib::select(&data, path)
                    .map_err(|err| format!("jsonpath '{}' failed: {:?}", path, err))?;
                matches
                    .first()
                    .map(|value| json_value_to_string(value))
                    .ok_or_else(|| format!("jsonpath '{}' matched nothing", path))
            }
            Extractor::Regex { pattern } => {
                let body = response.body_text();
                let captures = pattern
                    .captures(&body)
                    .ok_or_else(|| format!("regex '{}' matched nothing", pattern.as_str()))?;
                captures
                    .get(1)
                    .map(|group| group.as_str().to_owned())
                    .ok_or_else(|| format!("regex '{}' has no capture group", pattern.as_str()))
            }
            Extractor::Header { name } => response
                .headers
                .iter()
                .find(|(header, _)| header.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .ok_or_else(|| format!("response header '{}' is missing", name)),
        }
    }
}

#[derive(Debug)]
struct CompiledExtractor {
    name: String,
    default: Option<String>,
    extractor: Extractor,
}

/// The extractors of one API, compiled once at startup.
#[derive(Debug, Default)]
pub struct ExtractorSet {
    entries: Vec<CompiledExtractor>,
}

impl ExtractorSet {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for empty parameters or regexes that do not
    /// compile or lack a capture group; `api` names the offender.
    pub fn compile(api: &str, specs: &[ExtractorSpec]) -> Result<Self, ConfigError> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let extractor = match spec.kind {
                ExtractorKind::Jsonpath => {
                    let path = spec.jsonpath.clone().filter(|path| !path.is_empty());
                    Extractor::Jsonpath {
                        path: path.ok_or_else(|| ConfigError::InvalidExtractor {
                            api: api.to_owned(),
                            name: spec.name.clone(),
                            message: "jsonpath must not be empty".to_owned(),
                        })?,
                    }
                }
                ExtractorKind::Regex => {
                    let source = spec.regex.clone().filter(|pattern| !pattern.is_empty());
                    let source = source.ok_or_else(|| ConfigError::InvalidExtractor {
                        api: api.to_owned(),
                        name: spec.name.clone(),
                        message: "regex must not be empty".to_owned(),
                    })?;
                    let pattern = Regex::new(&source).map_err(|err| {
                        ConfigError::InvalidExtractorRegex {
                            api: api.to_owned(),
                            name: spec.name.clone(),
                            source: err,
                        }
                    })?;
                    if pattern.captures_len() < 2 {
                        return Err(ConfigError::InvalidExtractor {
                            api: api.to_owned(),
                            name: spec.name.clone(),
                            message: "regex needs at least one capture group".to_owned(),
                        });
                    }
                    Extractor::Regex { pattern }
                }
                ExtractorKind::Header => {
                    let name = spec.header.clone().filter(|header| !header.is_empty());
                    Extractor::Header {
                        name: name.ok_or_else(|| ConfigError::InvalidExtractor {
                            api: api.to_owned(),
                            name: spec.name.clone(),
                            message: "header name must not be empty".to_owned(),
                        })?,
                    }
                }
            };
            entries.push(CompiledExtractor {
                name: spec.name.clone(),
                default: spec.default.clone(),
                extractor,
            });
        }
        Ok(ExtractorSet { entries })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every extractor against the response. A failing extractor falls
    /// back to its default when one exists and never blocks the others.
    #[must_use]
    pub fn extract_all(&self, response: &Response) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for entry in &self.entries {
            match entry.extractor.extract(response) {
                Ok(value) => {
                    debug!(name = %entry.name, %value, "extracted variable");
                    values.insert(entry.name.clone(), value);
                }
                Err(message) => match &entry.default {
                    Some(default) => {
                        warn!(
                            name = %entry.name,
                            %default,
                            "extraction failed, using default: {}", message
                        );
                        values.insert(entry.name.clone(), default.clone());
                    }
                    None => {
                        warn!(name = %entry.name, "extraction failed: {}", message);
                    }
                },
            }
        }
        values
    }
}

/// First-match serialisation: strings pass through, integral numbers drop
/// the fraction, booleans print as `true`/`false`, composites as compact
/// JSON.
pub(crate) fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else if let Some(float) = number.as_f64() {
                if float.fract() == 0.0 {
                    format!("{}", float as i64)
                } else {
                    float.to_string()
                }
            } else {
                number.to_string()
            }
        }
        serde_json::Value::Bool(flag) => flag.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
