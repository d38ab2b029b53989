//! The per-task poll worker.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{Inner, WorkerKind};
use crate::client::RemoteStatus;
use crate::error::TaskError;
use crate::task::FailureReason;

enum Step {
    /// Still running remotely; poll again after the interval.
    Continue,
    /// Task settled (or vanished); the worker ends.
    Stop,
}

/// Poll `task_id` until it settles, then deregister.
pub(super) async fn run(inner: Arc<Inner>, task_id: String) {
    poll_until_settled(&inner, &task_id).await;
    inner.workers.finish(WorkerKind::Poll, &task_id);
}

async fn poll_until_settled(inner: &Inner, task_id: &str) {
    let max_failures = inner.config.max_consecutive_failures.max(1);
    let mut failures = 0u32;

    loop {
        let step = match inner.service.poll_status(task_id).await {
            Ok(status) => apply(inner, task_id, status).await,
            Err(e) if e.is_transient() => Err(TaskError::from(e)),
            Err(e) => settle_failed(inner, task_id, FailureReason::Server, e.to_string()).await,
        };

        match step {
            Ok(Step::Continue) => failures = 0,
            Ok(Step::Stop) => return,
            Err(TaskError::InvalidTransition { from, to, .. }) => {
                debug!(task_id, %from, %to, "task no longer pollable");
                return;
            }
            Err(e) => {
                failures += 1;
                warn!(task_id, failures, max_failures, error = %e, "poll attempt failed");
                if failures >= max_failures {
                    let message = format!("gave up after {failures} consecutive failures: {e}");
                    if let Err(write_err) =
                        settle_failed(inner, task_id, FailureReason::Network, message).await
                    {
                        error!(task_id, error = %write_err, "could not mark task failed; it will be retried on the next reconciliation");
                    }
                    return;
                }
            }
        }

        tokio::time::sleep(inner.config.poll_interval).await;
    }
}

async fn apply(inner: &Inner, task_id: &str, status: RemoteStatus) -> Result<Step, TaskError> {
    match status {
        RemoteStatus::Queued => Ok(Step::Continue),
        RemoteStatus::Processing => {
            let task = inner.transition(task_id, |t| t.mark_processing()).await?;
            Ok(if task.is_some() { Step::Continue } else { Step::Stop })
        }
        RemoteStatus::Completed {
            download_url: Some(url),
        } if !url.trim().is_empty() => {
            if inner.transition(task_id, |t| t.mark_ready(url)).await?.is_some() {
                info!(task_id, "generation ready");
            }
            Ok(Step::Stop)
        }
        RemoteStatus::Completed { .. } => {
            settle_failed(
                inner,
                task_id,
                FailureReason::Server,
                "service reported completion without a download url".to_owned(),
            )
            .await
        }
        RemoteStatus::Failed { error } => {
            let message = error.unwrap_or_else(|| "generation failed".to_owned());
            settle_failed(inner, task_id, FailureReason::Server, message).await
        }
        RemoteStatus::Unknown(other) => {
            settle_failed(
                inner,
                task_id,
                FailureReason::Server,
                format!("unexpected remote status {other:?}"),
            )
            .await
        }
    }
}

async fn settle_failed(
    inner: &Inner,
    task_id: &str,
    reason: FailureReason,
    message: String,
) -> Result<Step, TaskError> {
    warn!(task_id, %reason, error = %message, "generation failed");
    inner
        .transition(task_id, move |t| t.mark_failed(reason, message))
        .await?;
    Ok(Step::Stop)
}
