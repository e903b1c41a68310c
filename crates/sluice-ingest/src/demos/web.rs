//! Demos loading from public REST APIs

use crate::config::IngestConfig;
use crate::error::Result;
use crate::flow::{Flow, HttpPing, Notify, PipelineTask};
use crate::pipeline::{LoadReport, Pipeline, RunOptions};
use crate::resource::{dynamic_resources, Resource, ResourceConfig};
use crate::source::Source;
use crate::sources::{rest_api_source, HttpSource, Paginator, RecordSource, RestApiConfig};
use futures::FutureExt;
use sluice_common::WriteDisposition;

pub const JSONPLACEHOLDER_URL: &str = "https://jsonplaceholder.typicode.com";
pub const POKEAPI_URL: &str = "https://pokeapi.co/api/v2/";
pub const SPACEDEVS_URL: &str = "https://ll.thespacedevs.com/2.0.0";

const JSONPLACEHOLDER_ENDPOINTS: [&str; 3] = ["posts", "comments", "users"];

/// One resource per JSONPlaceholder endpoint, created at run time.
pub fn jsonplaceholder_source(base_url: &str) -> Result<Source> {
    let resources = dynamic_resources(JSONPLACEHOLDER_ENDPOINTS, |endpoint| {
        Resource::new(
            ResourceConfig::new(endpoint),
            RecordSource::Http(HttpSource::endpoint(base_url, endpoint)),
        )
    });
    Source::new("jsonplaceholder", resources)
}

pub async fn jsonplaceholder(config: &IngestConfig, base_url: &str) -> Result<LoadReport> {
    let pipeline =
        Pipeline::sqlite(config, "jsonplaceholder_pipeline", "jsonplaceholder_data").await?;
    pipeline
        .run(jsonplaceholder_source(base_url)?, RunOptions::new())
        .await
}

/// PokeAPI configuration: `pokemon` merged by name, `berry` and `location`
/// replaced on every run.
pub fn pokemon_config(base_url: &str) -> Result<RestApiConfig> {
    RestApiConfig::from_yaml(&format!(
        r#"
name: pokemon
client:
  base_url: "{base_url}"
resource_defaults:
  endpoint:
    params:
      limit: 1000
  write_disposition: replace
resources:
  - name: pokemon
    primary_key: name
    write_disposition: merge
  - berry
  - location
"#,
        base_url = base_url
    ))
}

pub async fn rest_api(config: &IngestConfig, api: &RestApiConfig) -> Result<LoadReport> {
    let pipeline = Pipeline::sqlite(config, "rest_api_pokemon", "rest_api_data").await?;
    pipeline.run(rest_api_source(api)?, RunOptions::new()).await
}

/// Upcoming launches and agencies, both replaced on every run.
pub fn spacedevs_source(base_url: &str) -> Result<Source> {
    let endpoint = |name: &str, path: &str| {
        Resource::new(
            ResourceConfig::new(name).write_disposition(WriteDisposition::Replace),
            RecordSource::Http(HttpSource::endpoint(base_url, path).paginator(Paginator::Single)),
        )
    };
    Source::new(
        "spacedevs",
        vec![endpoint("launches", "launch/upcoming"), endpoint("agencies", "agencies")],
    )
}

/// `ping_api >> run_pipeline >> notify`
pub fn spacedevs_flow(config: &IngestConfig, base_url: &str) -> Result<Flow> {
    let ping = HttpPing::new(
        "ping_api",
        format!("{}/launch/upcoming", base_url.trim_end_matches('/')),
        config.http_client()?,
    );

    let run_config = config.clone();
    let run_base_url = base_url.to_string();
    let run = PipelineTask::new("run_pipeline", move || {
        let config = run_config.clone();
        let base_url = run_base_url.clone();
        async move {
            let pipeline = Pipeline::sqlite(&config, "spacedevs_pipeline", "spacedevs_data").await?;
            pipeline
                .run(spacedevs_source(&base_url)?, RunOptions::new())
                .await
        }
        .boxed()
    });

    let notify = Notify::new(
        "notify",
        "Pipeline completed, check the launches and agencies tables",
    );

    Ok(Flow::new("spacedevs_flow").then(ping).then(run).then(notify))
}
