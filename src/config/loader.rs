use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;

use super::template::TemplateEngine;
use super::types::{Config, VerifyConfig};

/// Reads and parses a config file; call [`finalize`] afterwards.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read or parsed.
pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|err| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source: err,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&content).map_err(|err| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                source: err,
            })
        }
        Some("json") => serde_json::from_str(&content).map_err(|err| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source: err,
        }),
        Some(ext) => Err(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        }),
        None => Err(ConfigError::MissingExtension),
    }
}

/// Resolves config-time templates, applies API inheritance and validates.
///
/// Runs once for every config source (file, curl import, bare flags) after
/// command-line overrides have been applied.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the offending field or API.
pub fn finalize(config: &mut Config) -> Result<(), ConfigError> {
    let templates = TemplateEngine::new(&config.variables);
    resolve_global_templates(config, &templates)?;
    merge_apis(config)?;
    // After the merge so composed host+path URLs are covered too.
    resolve_api_templates(config, &templates)?;
    validate(config)
}

fn resolve_global_templates(
    config: &mut Config,
    templates: &TemplateEngine,
) -> Result<(), ConfigError> {
    if let Some(url) = config.url.take() {
        config.url = Some(templates.resolve(&url)?);
    }
    config.body = templates.resolve(&config.body)?;
    for value in config.headers.values_mut() {
        *value = templates.resolve(value)?;
    }
    Ok(())
}

fn resolve_api_templates(
    config: &mut Config,
    templates: &TemplateEngine,
) -> Result<(), ConfigError> {
    for api in &mut config.apis {
        if let Some(url) = api.url.take() {
            api.url = Some(templates.resolve(&url)?);
        }
        if let Some(body) = api.body.take() {
            api.body = Some(templates.resolve(&body)?);
        }
        for value in api.headers.values_mut() {
            *value = templates.resolve(value)?;
        }
    }
    Ok(())
}

/// Folds the shared request fields into each API definition.
///
/// URL precedence: `api.url` > `api.host + api.path` > `config.host +
/// api.path` > `config.url`. Headers are a union with the API winning on
/// collision; verify rules fall back to the global rule; blank names are
/// assigned by position; weights default to 1.
fn merge_apis(config: &mut Config) -> Result<(), ConfigError> {
    if config.apis.is_empty() {
        return Ok(());
    }

    let global_verify: Vec<VerifyConfig> = config.verify.clone().into_iter().collect();

    for (index, api) in config.apis.iter_mut().enumerate() {
        if api.name.is_empty() {
            api.name = format!("api_{}", index + 1);
        }

        if api.url.is_none() {
            let host = api.host.clone().or_else(|| config.host.clone());
            api.url = match (host, api.path.as_deref()) {
                (Some(host), Some(path)) => Some(format!("{}{}", host, path)),
                (Some(host), None) => Some(host),
                (None, Some(path)) => Some(path.to_owned()),
                (None, None) => config.url.clone(),
            };
        }
        if api.url.is_none() {
            return Err(ConfigError::ApiMissingUrl {
                api: api.name.clone(),
            });
        }

        if api.method.is_none() {
            api.method = Some(config.method.clone());
        }

        for (name, value) in &config.headers {
            api.headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        if api.body.is_none() && !config.body.is_empty() {
            api.body = Some(config.body.clone());
        }

        if api.verify.is_empty() {
            api.verify = global_verify.clone();
        }

        if api.weight == 0 {
            api.weight = 1;
        }
    }

    debug!(apis = config.apis.len(), "merged API definitions");
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.apis.is_empty() && config.url.is_none() {
        return Err(ConfigError::MissingUrl);
    }
    if config.concurrency == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }
    if config.requests == 0 && config.duration.is_none() {
        return Err(ConfigError::MissingRequestBudget);
    }

    config.timeout.to_duration()?;
    if let Some(duration) = &config.duration {
        duration.to_duration()?;
    }
    if let Some(ramp_up) = &config.advanced.ramp_up {
        ramp_up.to_duration()?;
    }
    config.advanced.reset_timeout.to_duration()?;
    config.advanced.retry_interval.to_duration()?;

    Ok(())
}
