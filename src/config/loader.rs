//! Configuration loading from disk and the process environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {var}: expected comma separated key=value pairs, got {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: defaults, then the optional TOML file, then the
/// process environment. The result is validated before it is returned.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ServiceConfig::default(),
    };

    let config = apply_env(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts the environment so the overlay can be exercised
/// without mutating the real process environment.
pub fn apply_env<F>(mut config: ServiceConfig, lookup: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(name) = non_empty("OTEL_SERVICE_NAME") {
        config.observability.service_name = name;
    }
    if let Some(endpoint) = non_empty("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.observability.otlp_endpoint = Some(endpoint);
    }
    if let Some(raw) = non_empty("OTEL_EXPORTER_OTLP_HEADERS") {
        let headers = parse_pairs("OTEL_EXPORTER_OTLP_HEADERS", &raw)?;
        config.observability.otlp_headers.extend(headers);
    }
    if let Some(raw) = non_empty("OTEL_RESOURCE_ATTRIBUTES") {
        let attrs = parse_pairs("OTEL_RESOURCE_ATTRIBUTES", &raw)?;
        config.observability.resource_attributes.extend(attrs);
    }
    if let Some(addr) = non_empty("BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }

    Ok(config)
}

/// Parse the `k=v,k=v` list format used by the OTEL_* variables.
fn parse_pairs(var: &'static str, raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut pairs = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                pairs.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => {
                return Err(ConfigError::Env {
                    var,
                    value: raw.to_string(),
                })
            }
        }
    }
    Ok(pairs)
}
