//! Linear task flows
//!
//! A [`Flow`] runs tasks one after another, e.g.
//! `ping_api >> run_pipeline >> notify`. When a task fails, every task after
//! it is marked [`TaskStatus::UpstreamFailed`] and not executed.

pub mod tasks;

pub use tasks::{HttpPing, Notify, PipelineTask};

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

/// One step of a flow
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
    UpstreamFailed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::UpstreamFailed => "upstream_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task_id: String,
    pub status: TaskStatus,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Outcome of one flow run
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub flow_id: String,
    pub tasks: Vec<TaskRun>,
}

impl FlowReport {
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.task_id == task_id).map(|t| t.status)
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Flow {}", self.flow_id)?;
        for task in &self.tasks {
            write!(
                f,
                "  {:<20} {:<16} {}ms",
                task.task_id,
                task.status.as_str(),
                task.duration.as_millis()
            )?;
            if let Some(error) = &task.error {
                write!(f, " ({})", error)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct Flow {
    id: String,
    tasks: Vec<Arc<dyn Task>>,
}

impl Flow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a task downstream of the current last task.
    pub fn then(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    #[instrument(skip(self), fields(flow = %self.id))]
    pub async fn run(&self) -> FlowReport {
        let mut runs = Vec::with_capacity(self.tasks.len());
        let mut failed = false;

        for task in &self.tasks {
            if failed {
                runs.push(TaskRun {
                    task_id: task.id().to_string(),
                    status: TaskStatus::UpstreamFailed,
                    duration: Duration::ZERO,
                    error: None,
                });
                continue;
            }

            let started = Instant::now();
            let result = task.execute().await;
            let duration = started.elapsed();

            let (status, error) = match result {
                Ok(()) => {
                    info!(task = %task.id(), elapsed_ms = duration.as_millis() as u64, "Task succeeded");
                    (TaskStatus::Succeeded, None)
                },
                Err(e) => {
                    error!(task = %task.id(), error = %format!("{:#}", e), "Task failed");
                    failed = true;
                    (TaskStatus::Failed, Some(format!("{:#}", e)))
                },
            };

            runs.push(TaskRun {
                task_id: task.id().to_string(),
                status,
                duration,
                error,
            });
        }

        FlowReport {
            flow_id: self.id.clone(),
            tasks: runs,
        }
    }

    /// Trigger the flow every `interval`, `max_runs` times.
    ///
    /// The first run starts immediately. Runs never overlap: a run that
    /// outlasts the interval delays the next one.
    pub async fn run_every(&self, interval: Duration, max_runs: usize) -> Result<Vec<FlowReport>> {
        if interval.is_zero() {
            return Err(IngestError::flow("Flow interval must be greater than zero"));
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut reports = Vec::with_capacity(max_runs);
        for run in 1..=max_runs {
            ticker.tick().await;
            info!(flow = %self.id, run, max_runs, "Triggering flow");
            reports.push(self.run().await);
        }
        Ok(reports)
    }
}
