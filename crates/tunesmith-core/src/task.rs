//! The generation task model and its state machine.
//!
//! ```text
//! Queued ──► Processing ──► Ready ──► Downloading ──► Downloaded
//!    │            │                        │
//!    └────────────┴──────► Failed ◄────────┘
//! ```
//!
//! A task whose first poll already reports completion may go straight from
//! `Queued` to `Ready`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::TaskError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Ready,
    Downloading,
    Downloaded,
    Failed,
}

impl TaskStatus {
    /// States that need a poll worker.
    pub const IN_FLIGHT: [TaskStatus; 2] = [TaskStatus::Queued, TaskStatus::Processing];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Downloaded | TaskStatus::Failed)
    }

    /// `remote_url` is present exactly in these states.
    pub fn carries_remote_url(self) -> bool {
        matches!(
            self,
            TaskStatus::Ready | TaskStatus::Downloading | TaskStatus::Downloaded
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Ready)
                | (Queued, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Ready, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, Failed)
        )
    }
}

/// Why a task ended up `Failed`.  Persisted as `error_kind`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    Network,
    Server,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
}

/// One remote generation request and everything we know about it locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationTask {
    /// Server-assigned id; a task is never stored without one.
    pub task_id: String,
    pub prompt: String,
    /// Model name as the caller supplied it (before namespace expansion).
    pub model: String,
    pub requested_duration_ms: u64,
    pub status: TaskStatus,
    pub remote_url: Option<String>,
    pub local_path: Option<PathBuf>,
    /// Seed file for continuation tasks; `None` for plain prompts.
    pub source_audio: Option<PathBuf>,
    pub title: String,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationTask {
    /// A freshly acknowledged prompt task.
    pub fn queued(
        task_id: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
        requested_duration_ms: u64,
    ) -> Self {
        let prompt = prompt.into();
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            title: music_title(&prompt),
            prompt,
            model: model.into(),
            requested_duration_ms,
            status: TaskStatus::Queued,
            remote_url: None,
            local_path: None,
            source_audio: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A freshly acknowledged continuation task seeded from `seed_audio`.
    pub fn continuation(
        task_id: impl Into<String>,
        seed_audio: &Path,
        description: Option<&str>,
        model: impl Into<String>,
        requested_duration_ms: u64,
    ) -> Self {
        let mut task = Self::queued(
            task_id,
            description.unwrap_or_default(),
            model,
            requested_duration_ms,
        );
        task.title = continuation_title(seed_audio);
        task.source_audio = Some(seed_audio.to_path_buf());
        task
    }

    /// Equality ignoring the bookkeeping timestamps.
    pub fn same_content(&self, other: &GenerationTask) -> bool {
        let mut probe = self.clone();
        probe.created_at = other.created_at;
        probe.updated_at = other.updated_at;
        probe == *other
    }

    /// Merge `incoming` onto `self`: status always follows `incoming`, other
    /// fields only when `incoming` actually carries a value.
    pub fn merge_from(&mut self, incoming: &GenerationTask) {
        self.status = incoming.status;
        if !incoming.prompt.is_empty() {
            self.prompt.clone_from(&incoming.prompt);
        }
        if !incoming.model.is_empty() {
            self.model.clone_from(&incoming.model);
        }
        if !incoming.title.is_empty() {
            self.title.clone_from(&incoming.title);
        }
        self.requested_duration_ms = incoming.requested_duration_ms;
        if incoming.remote_url.is_some() {
            self.remote_url.clone_from(&incoming.remote_url);
        }
        if incoming.local_path.is_some() {
            self.local_path.clone_from(&incoming.local_path);
        }
        if incoming.source_audio.is_some() {
            self.source_audio.clone_from(&incoming.source_audio);
        }
        if incoming.failure.is_some() {
            self.failure.clone_from(&incoming.failure);
        }
    }

    /// Drop fields the current status must not carry.
    pub fn normalize(&mut self) {
        if !self.status.carries_remote_url() {
            self.remote_url = None;
        }
        if self.status != TaskStatus::Downloaded {
            self.local_path = None;
        }
        if self.status != TaskStatus::Failed {
            self.failure = None;
        }
    }

    /// `local_path` iff Downloaded, `remote_url` iff Ready/Downloading/Downloaded.
    pub fn holds_invariants(&self) -> bool {
        self.local_path.is_some() == (self.status == TaskStatus::Downloaded)
            && self.remote_url.is_some() == self.status.carries_remote_url()
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Remote reported "processing".  Repeated reports are a no-op.
    pub fn mark_processing(&mut self) -> Result<(), TaskError> {
        if self.status == TaskStatus::Processing {
            return Ok(());
        }
        self.transition(TaskStatus::Processing)
    }

    pub fn mark_ready(&mut self, remote_url: impl Into<String>) -> Result<(), TaskError> {
        let remote_url = remote_url.into();
        if remote_url.trim().is_empty() {
            return Err(TaskError::Validation("download url must not be empty".into()));
        }
        self.transition(TaskStatus::Ready)?;
        self.remote_url = Some(remote_url);
        Ok(())
    }

    pub fn mark_downloading(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Downloading)
    }

    pub fn mark_downloaded(&mut self, local_path: PathBuf) -> Result<(), TaskError> {
        self.transition(TaskStatus::Downloaded)?;
        self.local_path = Some(local_path);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.failure = Some(Failure {
            reason,
            message: message.into(),
        });
        self.normalize();
        Ok(())
    }
}

/// Display title for a prompt task.
pub fn music_title(prompt: &str) -> String {
    format!("Music for {}", prompt.trim())
}

/// Display title for a continuation seeded from `seed_audio`.
pub fn continuation_title(seed_audio: &Path) -> String {
    let stem = seed_audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_owned());
    format!("Continuation of {stem}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn task() -> GenerationTask {
        GenerationTask::queued("t-1", "ambient pad", "small", 20_000)
    }

    #[test]
    fn queued_task_has_title_and_no_optional_fields() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.title, "Music for ambient pad");
        assert!(t.holds_invariants());
    }

    #[test]
    fn full_happy_path_keeps_invariants() {
        let mut t = task();
        t.mark_processing().unwrap();
        assert!(t.holds_invariants());
        t.mark_ready("http://host/a.wav").unwrap();
        assert!(t.holds_invariants());
        t.mark_downloading().unwrap();
        assert!(t.holds_invariants());
        t.mark_downloaded(PathBuf::from("/music/a.wav")).unwrap();
        assert!(t.holds_invariants());
        assert_eq!(t.remote_url.as_deref(), Some("http://host/a.wav"));
    }

    #[test]
    fn failing_a_download_clears_remote_url() {
        let mut t = task();
        t.mark_ready("http://host/a.wav").unwrap();
        t.mark_downloading().unwrap();
        t.mark_failed(FailureReason::Storage, "no path").unwrap();
        assert!(t.remote_url.is_none());
        assert!(t.holds_invariants());
        assert_eq!(t.failure.as_ref().map(|f| f.reason), Some(FailureReason::Storage));
    }

    #[test]
    fn rejects_out_of_order_transitions() {
        let mut t = task();
        let err = t.mark_downloading().unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { from: TaskStatus::Queued, .. }));
        assert!(t.mark_ready("").is_err());
        assert_eq!(t.status, TaskStatus::Queued);
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for from in [TaskStatus::Downloaded, TaskStatus::Failed] {
            assert!(from.is_terminal());
            for to in [
                TaskStatus::Queued,
                TaskStatus::Processing,
                TaskStatus::Ready,
                TaskStatus::Downloading,
                TaskStatus::Downloaded,
                TaskStatus::Failed,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn merge_keeps_existing_values_for_absent_fields() {
        let mut existing = task();
        existing.mark_ready("http://host/a.wav").unwrap();
        existing.mark_downloading().unwrap();
        existing.mark_downloaded(PathBuf::from("/music/a.wav")).unwrap();

        let mut incoming = task();
        incoming.status = TaskStatus::Downloaded;
        existing.merge_from(&incoming);
        existing.normalize();

        assert_eq!(existing.local_path, Some(PathBuf::from("/music/a.wav")));
        assert_eq!(existing.remote_url.as_deref(), Some("http://host/a.wav"));
    }

    #[test]
    fn status_strings_round_trip() {
        assert_eq!(TaskStatus::Downloading.as_ref(), "downloading");
        assert_eq!(TaskStatus::from_str("processing").unwrap(), TaskStatus::Processing);
        assert_eq!(FailureReason::from_str("storage").unwrap(), FailureReason::Storage);
    }

    #[test]
    fn continuation_title_uses_file_stem() {
        let t = GenerationTask::continuation(
            "t-2",
            Path::new("/music/Music_for_rain.wav"),
            None,
            "melody",
            10_000,
        );
        assert_eq!(t.title, "Continuation of Music_for_rain");
        assert_eq!(t.prompt, "");
        assert!(t.source_audio.is_some());
    }
}
