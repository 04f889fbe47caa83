use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ALPHABETIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMERIC: &[u8] = b"0123456789";

/// Config-time template expansion over `{{function args}}` placeholders.
///
/// Dispatch-time placeholders (`{{.api.var}}`) pass through verbatim; the
/// worker substitutes those against the dependency resolver's bindings.
pub struct TemplateEngine {
    sequence: AtomicU64,
    variables: BTreeMap<String, String>,
}

impl TemplateEngine {
    #[must_use]
    pub fn new(variables: &BTreeMap<String, serde_json::Value>) -> Self {
        let variables = variables
            .iter()
            .map(|(key, value)| (key.clone(), json_scalar_to_string(value)))
            .collect();
        TemplateEngine {
            sequence: AtomicU64::new(0),
            variables,
        }
    }

    /// Expands every `{{...}}` placeholder in `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unterminated placeholders, unknown
    /// functions, or bad arguments.
    pub fn resolve(&self, input: &str) -> Result<String, ConfigError> {
        if !input.contains("{{") {
            return Ok(input.to_owned());
        }

        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or_else(|| ConfigError::UnterminatedPlaceholder {
                    input: input.to_owned(),
                })?;
            let inner = &after_open[..end];
            if inner.trim_start().starts_with('.') {
                // Dependent-flow placeholder, expanded at dispatch time.
                output.push_str("{{");
                output.push_str(inner);
                output.push_str("}}");
            } else {
                output.push_str(&self.evaluate(inner.trim())?);
            }
            rest = &after_open[end + 2..];
        }
        output.push_str(rest);
        Ok(output)
    }

    fn evaluate(&self, expression: &str) -> Result<String, ConfigError> {
        let tokens = split_arguments(expression);
        let (name, args) = tokens
            .split_first()
            .map(|(head, tail)| (head.as_str(), tail))
            .ok_or_else(|| ConfigError::UnknownTemplateFunction {
                name: expression.to_owned(),
            })?;

        let value = match name {
            "seq" => (self.sequence.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
            "unix" => chrono::Utc::now().timestamp().to_string(),
            "unixNano" => chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_string(),
            "timestamp" => chrono::Utc::now().timestamp_millis().to_string(),
            "date" => {
                let format = required_arg(name, args, 0)?;
                chrono::Local::now().format(&format).to_string()
            }
            "randomInt" => {
                let low = int_arg(name, args, 0)?;
                let high = int_arg(name, args, 1)?;
                if low > high {
                    return Err(ConfigError::TemplateArgument {
                        name: name.to_owned(),
                        message: format!("empty range {}..{}", low, high),
                    });
                }
                rand::thread_rng().gen_range(low..=high).to_string()
            }
            "randomString" => random_chars(ALPHANUMERIC, length_arg(name, args)?),
            "randomAlpha" => random_chars(ALPHABETIC, length_arg(name, args)?),
            "randomNumber" => random_chars(NUMERIC, length_arg(name, args)?),
            "randomUUID" => uuid::Uuid::new_v4().to_string(),
            "md5" => {
                let mut hasher = Md5::new();
                hasher.update(required_arg(name, args, 0)?.as_bytes());
                hex::encode(hasher.finalize())
            }
            "sha1" => {
                let mut hasher = Sha1::new();
                hasher.update(required_arg(name, args, 0)?.as_bytes());
                hex::encode(hasher.finalize())
            }
            "sha256" => {
                let mut hasher = Sha256::new();
                hasher.update(required_arg(name, args, 0)?.as_bytes());
                hex::encode(hasher.finalize())
            }
            "base64" => BASE64.encode(required_arg(name, args, 0)?),
            "hex" => hex::encode(required_arg(name, args, 0)?),
            "upper" => required_arg(name, args, 0)?.to_uppercase(),
            "lower" => required_arg(name, args, 0)?.to_lowercase(),
            "env" => std::env::var(required_arg(name, args, 0)?).unwrap_or_default(),
            "var" => {
                let key = required_arg(name, args, 0)?;
                self.variables.get(&key).cloned().unwrap_or_default()
            }
            _ => {
                return Err(ConfigError::UnknownTemplateFunction {
                    name: name.to_owned(),
                })
            }
        };
        Ok(value)
    }
}

fn required_arg(name: &str, args: &[String], index: usize) -> Result<String, ConfigError> {
    args.get(index)
        .cloned()
        .ok_or_else(|| ConfigError::TemplateArgument {
            name: name.to_owned(),
            message: format!("missing argument {}", index + 1),
        })
}

fn int_arg(name: &str, args: &[String], index: usize) -> Result<i64, ConfigError> {
    let raw = required_arg(name, args, index)?;
    raw.parse().map_err(|_| ConfigError::TemplateArgument {
        name: name.to_owned(),
        message: format!("'{}' is not an integer", raw),
    })
}

fn length_arg(name: &str, args: &[String]) -> Result<usize, ConfigError> {
    let length = int_arg(name, args, 0)?;
    usize::try_from(length).map_err(|_| ConfigError::TemplateArgument {
        name: name.to_owned(),
        message: format!("invalid length {}", length),
    })
}

fn random_chars(charset: &[u8], length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(charset[rng.gen_range(0..charset.len())]))
        .collect()
}

/// Splits `name "quoted arg" bare` into tokens, honouring double quotes.
fn split_arguments(expression: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in expression.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ch if ch.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub(crate) fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
