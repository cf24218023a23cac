//! Progress-percentage producer for long-running tasks.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::traits::{unix_millis, Pacer, Producer};
use crate::error::ProducerError;
use crate::streaming::{Event, EVENT_PROGRESS};

pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETE: &str = "complete";

/// Emits `steps` progress events in equal increments, the last at 100%.
pub struct ProgressEmitter {
    task: String,
    task_id: String,
    steps: u32,
    step: u32,
    pacer: Pacer,
}

#[derive(Serialize)]
struct ProgressUpdate<'a> {
    task_id: &'a str,
    task: &'a str,
    progress: u32,
    status: &'static str,
    message: String,
}

impl ProgressEmitter {
    /// `steps` of zero is clamped to one.
    pub fn new(task: impl Into<String>, steps: u32, interval: Duration) -> Self {
        Self {
            task: task.into(),
            task_id: format!("task_{}", unix_millis()),
            steps: steps.max(1),
            step: 0,
            pacer: Pacer::new(interval),
        }
    }

    /// Replace the generated `task_<millis>` id.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }
}

/// Percentage reached after `step` of `steps`; exactly 100 at the last step.
fn percent(step: u32, steps: u32) -> u32 {
    (u64::from(step) * 100 / u64::from(steps)) as u32
}

#[async_trait]
impl Producer for ProgressEmitter {
    fn name(&self) -> &'static str {
        "progress"
    }

    async fn next(&mut self) -> Option<Result<Event, ProducerError>> {
        if self.step >= self.steps {
            return None;
        }

        self.pacer.wait().await;

        let step = self.step + 1;
        let progress = percent(step, self.steps);
        if progress > 100 {
            return Some(Err(ProducerError::Internal(format!(
                "progress {} exceeds 100 at step {}/{}",
                progress, step, self.steps
            ))));
        }

        let status = if step == self.steps {
            STATUS_COMPLETE
        } else {
            STATUS_IN_PROGRESS
        };
        let update = ProgressUpdate {
            task_id: &self.task_id,
            task: &self.task,
            progress,
            status,
            message: format!("Processing {} - Step {}/{}", self.task, step, self.steps),
        };
        let event = match Event::json(EVENT_PROGRESS, &update) {
            Ok(event) => event.with_id(step.to_string()),
            Err(e) => return Some(Err(e.into())),
        };

        self.step = step;
        self.pacer.emitted();
        Some(Ok(event))
    }
}
