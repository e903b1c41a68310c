//! Declarative REST API sources
//!
//! A [`RestApiConfig`] describes a client, defaults shared by every
//! resource, and the resources themselves, either as a bare name or as a
//! detailed object. It deserializes from YAML or JSON:
//!
//! ```yaml
//! client:
//!   base_url: https://pokeapi.co/api/v2/
//! resource_defaults:
//!   endpoint:
//!     params:
//!       limit: 1000
//!   write_disposition: replace
//! resources:
//!   - name: pokemon
//!     primary_key: name
//!     write_disposition: merge
//!   - berry
//!   - location
//! ```

use super::http::{HttpSource, Paginator};
use super::RecordSource;
use crate::error::Result;
use crate::incremental::Incremental;
use crate::resource::{Resource, ResourceConfig};
use crate::source::Source;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_common::WriteDisposition;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path below the base URL; the resource name when unset
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub data_selector: Option<String>,
    #[serde(default)]
    pub paginator: Option<Paginator>,
}

/// A primary key given as one column or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    One(String),
    Many(Vec<String>),
}

impl KeySpec {
    pub fn columns(&self) -> Vec<String> {
        match self {
            KeySpec::One(column) => vec![column.clone()],
            KeySpec::Many(columns) => columns.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefaults {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub write_disposition: Option<WriteDisposition>,
    #[serde(default)]
    pub primary_key: Option<KeySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestResourceConfig {
    pub name: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<EndpointConfig>,
    #[serde(default)]
    pub primary_key: Option<KeySpec>,
    #[serde(default)]
    pub write_disposition: Option<WriteDisposition>,
    #[serde(default)]
    pub incremental: Option<Incremental>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceEntry {
    Name(String),
    Detailed(RestResourceConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestApiConfig {
    /// Name of the resulting source
    #[serde(default = "default_source_name")]
    pub name: String,
    pub client: ClientConfig,
    #[serde(default)]
    pub resource_defaults: ResourceDefaults,
    pub resources: Vec<ResourceEntry>,
}

fn default_source_name() -> String {
    "rest_api".to_string()
}

impl RestApiConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a source from a declarative REST API configuration.
///
/// Resource settings override the defaults; endpoint params are merged key
/// by key. The default write disposition becomes the source default.
pub fn rest_api_source(config: &RestApiConfig) -> Result<Source> {
    let defaults = &config.resource_defaults;

    let resources = config
        .resources
        .iter()
        .map(|entry| {
            let detailed = match entry {
                ResourceEntry::Name(name) => RestResourceConfig {
                    name: name.clone(),
                    table_name: None,
                    endpoint: None,
                    primary_key: None,
                    write_disposition: None,
                    incremental: None,
                },
                ResourceEntry::Detailed(detailed) => detailed.clone(),
            };
            build_resource(config, defaults, detailed)
        })
        .collect::<Vec<_>>();

    let mut source = Source::new(&config.name, resources)?;
    if let Some(disposition) = defaults.write_disposition {
        source = source.default_write_disposition(disposition);
    }
    Ok(source)
}

fn build_resource(
    config: &RestApiConfig,
    defaults: &ResourceDefaults,
    resource: RestResourceConfig,
) -> Resource {
    let endpoint = resource.endpoint.unwrap_or_default();

    let mut params = defaults.endpoint.params.clone();
    params.extend(endpoint.params);

    let path = endpoint
        .path
        .or_else(|| defaults.endpoint.path.clone())
        .unwrap_or_else(|| resource.name.clone());

    let mut http = HttpSource::endpoint(&config.client.base_url, path).paginator(
        endpoint
            .paginator
            .or_else(|| defaults.endpoint.paginator.clone())
            .unwrap_or_default(),
    );
    for (key, value) in &params {
        http = http.param(key, param_value(value));
    }
    if let Some(selector) = endpoint
        .data_selector
        .or_else(|| defaults.endpoint.data_selector.clone())
    {
        http = http.data_selector(selector);
    }
    if let Some(token) = &config.client.token {
        http = http.bearer_token(token);
    }

    let mut resource_config = ResourceConfig::new(&resource.name);
    if let Some(table) = resource.table_name {
        resource_config = resource_config.table_name(table);
    }
    if let Some(key) = resource.primary_key.or_else(|| defaults.primary_key.clone()) {
        resource_config = resource_config.primary_key(key.columns());
    }
    if let Some(disposition) = resource.write_disposition {
        resource_config = resource_config.write_disposition(disposition);
    }
    if let Some(incremental) = resource.incremental {
        resource_config = resource_config.incremental(incremental);
    }

    Resource::new(resource_config, RecordSource::Http(http))
}
