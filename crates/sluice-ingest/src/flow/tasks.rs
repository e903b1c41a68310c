//! Built-in flow tasks

use super::Task;
use crate::pipeline::LoadReport;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Sends a HEAD request and logs the status line.
///
/// Only transport errors fail the task; any HTTP status counts as a
/// reachable API.
pub struct HttpPing {
    id: String,
    url: String,
    client: reqwest::Client,
}

impl HttpPing {
    pub fn new(id: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Task for HttpPing {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let response = self.client.head(&self.url).send().await?;
        info!(
            url = %self.url,
            "{:?} {}",
            response.version(),
            response.status()
        );
        Ok(())
    }
}

type RunFn = Arc<dyn Fn() -> BoxFuture<'static, crate::Result<LoadReport>> + Send + Sync>;

/// Runs a pipeline; a load with failures fails the task.
///
/// The report of the latest run is logged and kept for the caller.
pub struct PipelineTask {
    id: String,
    run: RunFn,
    last_report: Mutex<Option<LoadReport>>,
}

impl PipelineTask {
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, crate::Result<LoadReport>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            run: Arc::new(run),
            last_report: Mutex::new(None),
        }
    }

    /// Report of the most recent completed run
    pub fn last_report(&self) -> Option<LoadReport> {
        self.last_report.lock().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl Task for PipelineTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let report = (self.run)().await?;
        info!(task = %self.id, "{}", report);
        let outcome = report.raise_on_failed();
        if let Ok(mut slot) = self.last_report.lock() {
            *slot = Some(report);
        }
        outcome?;
        Ok(())
    }
}

/// Logs a fixed message
pub struct Notify {
    id: String,
    message: String,
}

impl Notify {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Task for Notify {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self) -> anyhow::Result<()> {
        info!(task = %self.id, "{}", self.message);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ping_accepts_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/launch/upcoming"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let ping = HttpPing::new(
            "ping_api",
            format!("{}/launch/upcoming", server.uri()),
            reqwest::Client::new(),
        );
        assert!(ping.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_ping_fails_on_transport_error() {
        let ping = HttpPing::new("ping_api", "http://127.0.0.1:9/", reqwest::Client::new());
        assert!(ping.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_pipeline_task_propagates_run_error() {
        let task = PipelineTask::new("run_pipeline", || {
            Box::pin(async { Err(crate::IngestError::config("no destination")) })
        });
        let err = task.execute().await.unwrap_err();
        assert!(err.to_string().contains("no destination"));
    }

    #[tokio::test]
    async fn test_pipeline_task_keeps_report() {
        let task = PipelineTask::new("run_pipeline", || {
            Box::pin(async {
                let now = chrono::Utc::now();
                Ok(LoadReport {
                    load_id: "l1".to_string(),
                    pipeline_name: "spacedevs_pipeline".to_string(),
                    dataset_name: "spacedevs_data".to_string(),
                    destination: "sqlite (:memory:)".to_string(),
                    started_at: now,
                    finished_at: now,
                    tables: vec![],
                    schema_changes: vec![],
                    failures: vec![],
                    skipped: vec!["agencies".to_string()],
                })
            })
        });
        assert!(task.last_report().is_none());

        assert!(task.execute().await.is_err());
        let report = task.last_report().unwrap();
        assert_eq!(report.pipeline_name, "spacedevs_pipeline");
        assert_eq!(report.skipped, vec!["agencies".to_string()]);
    }
}
