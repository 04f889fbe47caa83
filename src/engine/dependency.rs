use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::error::ConfigError;

use super::selector::{build_request_config, ApiRequestConfig};

/// Orders dependent APIs topologically and holds the variables their
/// extractors produce.
///
/// The variable store sees many concurrent readers (template substitution on
/// every dispatch) and rare writers (after an extraction), hence the
/// reader-writer lock.
pub struct DependencyResolver {
    apis: HashMap<String, ApiRequestConfig>,
    execution_order: Vec<String>,
    variables: RwLock<HashMap<String, String>>,
}

impl DependencyResolver {
    /// # Errors
    ///
    /// Returns [`ConfigError::CyclicDependency`] or
    /// [`ConfigError::UnknownApi`] naming the offending API, or an extractor
    /// compilation error.
    pub fn new(api_configs: &[ApiConfig]) -> Result<Self, ConfigError> {
        let mut apis = HashMap::with_capacity(api_configs.len());
        for api in api_configs {
            apis.insert(api.name.clone(), build_request_config(api)?);
        }

        let execution_order = resolve_order(api_configs)?;
        info!(order = ?execution_order, "API execution order");

        Ok(DependencyResolver {
            apis,
            execution_order,
            variables: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    #[must_use]
    pub fn api(&self, name: &str) -> Option<&ApiRequestConfig> {
        self.apis.get(name)
    }

    /// Commits extracted variables under the `"<api>.<var>"` namespace.
    /// Later stores overwrite earlier ones; readers always see the most
    /// recent value.
    pub fn store(&self, api_name: &str, values: BTreeMap<String, String>) {
        if values.is_empty() {
            return;
        }
        let count = values.len();
        if let Ok(mut variables) = self.variables.write() {
            for (name, value) in values {
                variables.insert(format!("{}.{}", api_name, name), value);
            }
        }
        debug!(api = api_name, count, "stored extracted variables");
    }

    #[must_use]
    pub fn get(&self, api_name: &str, var_name: &str) -> Option<String> {
        let variables = self.variables.read().ok()?;
        variables.get(&format!("{}.{}", api_name, var_name)).cloned()
    }

    /// Flat copy of every binding, for placeholder substitution.
    #[must_use]
    pub fn bindings(&self) -> HashMap<String, String> {
        self.variables
            .read()
            .map(|variables| variables.clone())
            .unwrap_or_default()
    }
}

/// Depth-first topological sort with three-colour marking: a node re-entered
/// while `visiting` is a cycle; an edge to a name outside the set is an
/// unknown API.
fn resolve_order(apis: &[ApiConfig]) -> Result<Vec<String>, ConfigError> {
    let by_name: HashMap<&str, &ApiConfig> =
        apis.iter().map(|api| (api.name.as_str(), api)).collect();

    let mut visited: HashSet<String> = HashSet::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(apis.len());

    fn visit(
        name: &str,
        dependent: &str,
        by_name: &HashMap<&str, &ApiConfig>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(ConfigError::CyclicDependency {
                api: name.to_owned(),
            });
        }

        let api = by_name.get(name).ok_or_else(|| ConfigError::UnknownApi {
            api: name.to_owned(),
            dependent: dependent.to_owned(),
        })?;

        visiting.insert(name.to_owned());
        for dependency in &api.depends_on {
            visit(dependency, name, by_name, visited, visiting, order)?;
        }
        visiting.remove(name);
        visited.insert(name.to_owned());
        order.push(name.to_owned());
        Ok(())
    }

    // Declaration order keeps the result deterministic.
    for api in apis {
        visit(
            &api.name,
            &api.name,
            &by_name,
            &mut visited,
            &mut visiting,
            &mut order,
        )?;
    }

    Ok(order)
}
