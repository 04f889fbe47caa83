mod registry;


use regex::Regex;

use crate::config::{Operator, VerifyConfig, VerifyKind};
use crate::extract::json_value_to_string;
use crate::protocol::{Response, VerificationResult};

pub use registry::{lookup_custom, register_custom, CustomVerifyFn};

/// Applies one verify rule to the response.
///
/// Exactly one [`VerificationResult`] is appended per invocation; a failed
/// assertion also comes back as `Err` so the middleware and the worker can
/// mark the outcome failed.
///
/// # Errors
///
/// Returns the human-readable failure message.
pub fn apply(config: &VerifyConfig, response: &mut Response) -> Result<(), String> {
    let outcome = match config.kind {
        VerifyKind::StatusCode => verify_status_code(config, response),
        VerifyKind::Jsonpath => verify_jsonpath(config, response),
        VerifyKind::Contains => verify_contains(config, response),
        VerifyKind::Regex => verify_regex(config, response),
        VerifyKind::Custom => verify_custom(config, response),
    };

    response.verifications.push(VerificationResult {
        kind: config.kind,
        success: outcome.success,
        message: outcome.message.clone(),
        expect: outcome.expect,
        actual: outcome.actual,
    });

    if outcome.success {
        Ok(())
    } else {
        Err(outcome.message)
    }
}

struct Outcome {
    success: bool,
    message: String,
    expect: String,
    actual: String,
}

impl Outcome {
    fn pass(message: &str, expect: String, actual: String) -> Self {
        Outcome {
            success: true,
            message: message.to_owned(),
            expect,
            actual,
        }
    }

    fn fail(message: String, expect: String, actual: String) -> Self {
        Outcome {
            success: false,
            message,
            expect,
            actual,
        }
    }
}

fn verify_status_code(config: &VerifyConfig, response: &Response) -> Outcome {
    let expect = match &config.expect {
        serde_json::Value::Null => "200".to_owned(),
        other => json_value_to_string(other),
    };
    let operator = config.operator.unwrap_or_default();
    let actual = response.status_code.to_string();

    if compare(operator, &actual, &expect) {
        Outcome::pass("status code verified", expect, actual)
    } else {
        let message = format!(
            "status code mismatch: expected {} {}, got {}",
            operator_name(operator),
            expect,
            actual
        );
        Outcome::fail(message, expect, actual)
    }
}

fn verify_jsonpath(config: &VerifyConfig, response: &Response) -> Outcome {
    let path = config.jsonpath.clone().unwrap_or_default();
    let expect = json_value_to_string(&config.expect);
    if path.is_empty() {
        return Outcome::fail(
            "jsonpath rule has no path".to_owned(),
            expect,
            String::new(),
        );
    }

    let data: serde_json::Value = match serde_json::from_slice(&response.body) {
        Ok(data) => data,
        Err(err) => {
            return Outcome::fail(
                format!("response body is not valid JSON: {}", err),
                expect,
                "<unparseable>".to_owned(),
            );
        }
    };

    let found = match jsonpath_lib::select(&data, &path) {
        Ok(matches) => matches.first().map(|value| json_value_to_string(value)),
        Err(err) => {
            return Outcome::fail(
                format!("jsonpath '{}' failed: {:?}", path, err),
                expect,
                "<no match>".to_owned(),
            );
        }
    };
    let Some(actual) = found else {
        return Outcome::fail(
            format!("jsonpath '{}' matched nothing", path),
            expect,
            "<no match>".to_owned(),
        );
    };

    let operator = config.operator.unwrap_or_default();
    if compare(operator, &actual, &expect) {
        Outcome::pass("jsonpath verified", expect, actual)
    } else {
        let message = format!(
            "jsonpath '{}' mismatch: expected {} {}, got {}",
            path,
            operator_name(operator),
            expect,
            actual
        );
        Outcome::fail(message, expect, actual)
    }
}

fn verify_contains(config: &VerifyConfig, response: &Response) -> Outcome {
    let serde_json::Value::String(needle) = &config.expect else {
        return Outcome::fail(
            "contains rule expects a string".to_owned(),
            json_value_to_string(&config.expect),
            "<type error>".to_owned(),
        );
    };
    let body = response.body_text();
    if body.contains(needle.as_str()) {
        Outcome::pass("contains verified", needle.clone(), body.into_owned())
    } else {
        Outcome::fail(
            format!("response does not contain '{}'", needle),
            needle.clone(),
            body.into_owned(),
        )
    }
}

fn verify_regex(config: &VerifyConfig, response: &Response) -> Outcome {
    let source = json_value_to_string(&config.expect);
    let pattern = match Regex::new(&source) {
        Ok(pattern) => pattern,
        Err(err) => {
            return Outcome::fail(
                format!("invalid regex '{}': {}", source, err),
                source,
                String::new(),
            );
        }
    };
    let body = response.body_text();
    if pattern.is_match(&body) {
        Outcome::pass("regex verified", source, body.into_owned())
    } else {
        Outcome::fail(
            format!("response does not match '{}'", source),
            source,
            body.into_owned(),
        )
    }
}

fn verify_custom(config: &VerifyConfig, response: &Response) -> Outcome {
    let name = config.custom.clone().unwrap_or_default();
    let Some(verifier) = lookup_custom(&name) else {
        return Outcome::fail(
            format!("custom verifier '{}' is not registered", name),
            name,
            String::new(),
        );
    };
    match verifier(response) {
        Ok(()) => Outcome::pass("custom verifier passed", name, "ok".to_owned()),
        Err(message) => Outcome::fail(message.clone(), name, message),
    }
}

/// The shared comparator behind every typed assertion; `eq` when unset.
/// Ordering operators compare numerically when both sides parse as numbers
/// and lexicographically otherwise.
#[must_use]
pub fn compare(operator: Operator, actual: &str, expect: &str) -> bool {
    match operator {
        Operator::Eq => compare_values(actual, expect) == std::cmp::Ordering::Equal,
        Operator::Ne => compare_values(actual, expect) != std::cmp::Ordering::Equal,
        Operator::Gt => compare_values(actual, expect) == std::cmp::Ordering::Greater,
        Operator::Gte => compare_values(actual, expect) != std::cmp::Ordering::Less,
        Operator::Lt => compare_values(actual, expect) == std::cmp::Ordering::Less,
        Operator::Lte => compare_values(actual, expect) != std::cmp::Ordering::Greater,
        Operator::Contains => actual.contains(expect),
        Operator::NotContains => !actual.contains(expect),
        Operator::HasPrefix => actual.starts_with(expect),
        Operator::HasSuffix => actual.ends_with(expect),
        Operator::Empty => actual.is_empty(),
        Operator::NotEmpty => !actual.is_empty(),
    }
}

fn compare_values(actual: &str, expect: &str) -> std::cmp::Ordering {
    if let (Ok(left), Ok(right)) = (actual.parse::<f64>(), expect.parse::<f64>()) {
        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
    } else {
        actual.cmp(expect)
    }
}

fn operator_name(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "eq",
        Operator::Ne => "ne",
        Operator::Gt => "gt",
        Operator::Gte => "gte",
        Operator::Lt => "lt",
        Operator::Lte => "lte",
        Operator::Contains => "contains",
        Operator::NotContains => "not_contains",
        Operator::HasPrefix => "has_prefix",
        Operator::HasSuffix => "has_suffix",
        Operator::Empty => "empty",
        Operator::NotEmpty => "not_empty",
    }
}
