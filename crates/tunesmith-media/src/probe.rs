//! Duration metadata.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use tunesmith_types::seconds_to_ms;

use crate::error::TransformError;

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration_ms(&self, path: &Path) -> Result<u64, TransformError>;
}

/// [`MediaProbe`] asking `ffprobe` for the container duration.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    path: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            path: ffmpeg_sidecar::ffprobe::ffprobe_path(),
        }
    }
}

impl FfprobeProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration_ms(&self, path: &Path) -> Result<u64, TransformError> {
        let probe_err = |message: String| TransformError::Probe {
            path: path.to_path_buf(),
            message,
        };

        let output = Command::new(&self.path)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| probe_err(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(probe_err(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = parse_duration(&stdout)
            .ok_or_else(|| probe_err(format!("unexpected ffprobe output {:?}", stdout.trim())))?;
        debug!(path = %path.display(), duration_ms = duration, "probed duration");
        Ok(duration)
    }
}

/// Parse ffprobe's bare `format=duration` value (seconds).
fn parse_duration(stdout: &str) -> Option<u64> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    seconds_to_ms(line.parse::<f64>().ok()?)
}
