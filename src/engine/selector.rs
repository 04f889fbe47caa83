use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::config::{ApiConfig, Config, VerifyConfig};
use crate::error::ConfigError;
use crate::extract::ExtractorSet;
use crate::protocol::Request;

use super::dependency::DependencyResolver;

/// One endpoint as the worker sees it: merged, template-resolved, with the
/// extractors already compiled.
#[derive(Debug, Clone)]
pub struct ApiRequestConfig {
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub verify: Vec<VerifyConfig>,
    pub extractors: Arc<ExtractorSet>,
}

impl ApiRequestConfig {
    #[must_use]
    pub fn build_request(&self) -> Request {
        Request {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            metadata: BTreeMap::new(),
        }
    }
}

pub(super) fn build_request_config(api: &ApiConfig) -> Result<ApiRequestConfig, ConfigError> {
    let extractors = ExtractorSet::compile(&api.name, &api.extractors)?;
    Ok(ApiRequestConfig {
        name: api.name.clone(),
        url: api.url.clone().unwrap_or_default(),
        method: api.method.clone().unwrap_or_else(|| "GET".to_owned()),
        headers: api.headers.clone(),
        body: api.body.clone().unwrap_or_default(),
        verify: api.verify.clone(),
        extractors: Arc::new(extractors),
    })
}

/// Chooses which endpoint a request instance targets. Four fixed variants
/// behind one `next` entry point.
pub enum ApiSelector {
    Single(Box<ApiRequestConfig>),
    RoundRobin {
        apis: Vec<ApiRequestConfig>,
        counter: AtomicU64,
    },
    Weighted {
        apis: Vec<ApiRequestConfig>,
        weights: Vec<u32>,
        total: u32,
    },
    Dependency {
        resolver: Arc<DependencyResolver>,
        counter: AtomicU64,
    },
}

impl ApiSelector {
    /// Construction rule: one endpoint → Single; any `depends_on` or
    /// extractors → Dependency; any weight > 1 → Weighted; else RoundRobin.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for dependency cycles, unknown dependency
    /// names, or extractors that do not compile.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.apis.is_empty() {
            let synthetic = ApiConfig {
                name: "default".to_owned(),
                url: config.url.clone(),
                method: Some(config.method.clone()),
                headers: config.headers.clone(),
                body: Some(config.body.clone()),
                ..ApiConfig::default()
            };
            return Ok(ApiSelector::Single(Box::new(build_request_config(
                &synthetic,
            )?)));
        }

        let has_dependencies = config
            .apis
            .iter()
            .any(|api| !api.depends_on.is_empty() || !api.extractors.is_empty());
        if has_dependencies {
            let resolver = Arc::new(DependencyResolver::new(&config.apis)?);
            return Ok(ApiSelector::Dependency {
                resolver,
                counter: AtomicU64::new(0),
            });
        }

        let apis: Vec<ApiRequestConfig> = config
            .apis
            .iter()
            .map(build_request_config)
            .collect::<Result<_, _>>()?;

        let has_weight = config.apis.iter().any(|api| api.weight > 1);
        if has_weight {
            let weights: Vec<u32> = config.apis.iter().map(|api| api.weight.max(1)).collect();
            let total = weights.iter().sum();
            return Ok(ApiSelector::Weighted {
                apis,
                weights,
                total,
            });
        }

        Ok(ApiSelector::RoundRobin {
            apis,
            counter: AtomicU64::new(0),
        })
    }

    /// The next endpoint to hit. Thread-safe; round-robin and dependency
    /// walks use a monotonic counter, weighted draws walk the prefix sums of
    /// a uniform sample.
    #[must_use]
    pub fn next(&self) -> ApiRequestConfig {
        match self {
            ApiSelector::Single(api) => (**api).clone(),
            ApiSelector::RoundRobin { apis, counter } => {
                let index = counter.fetch_add(1, Ordering::Relaxed) as usize % apis.len();
                apis[index].clone()
            }
            ApiSelector::Weighted {
                apis,
                weights,
                total,
            } => {
                let draw = rand::thread_rng().gen_range(0..*total);
                let mut sum = 0u32;
                for (api, weight) in apis.iter().zip(weights) {
                    sum += weight;
                    if draw < sum {
                        return api.clone();
                    }
                }
                apis[0].clone()
            }
            ApiSelector::Dependency { resolver, counter } => {
                let order = resolver.execution_order();
                let index = counter.fetch_add(1, Ordering::Relaxed) as usize % order.len();
                resolver
                    .api(&order[index])
                    .cloned()
                    .unwrap_or_else(|| ApiRequestConfig {
                        name: order[index].clone(),
                        url: String::new(),
                        method: "GET".to_owned(),
                        headers: BTreeMap::new(),
                        body: String::new(),
                        verify: Vec::new(),
                        extractors: Arc::new(ExtractorSet::default()),
                    })
            }
        }
    }

    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        matches!(self, ApiSelector::Dependency { .. })
    }

    #[must_use]
    pub fn dependency_resolver(&self) -> Option<&Arc<DependencyResolver>> {
        match self {
            ApiSelector::Dependency { resolver, .. } => Some(resolver),
            _ => None,
        }
    }
}
