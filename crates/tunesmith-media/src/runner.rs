//! Launching the external codec.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use ffmpeg_sidecar::command::{FfmpegCommand, ffmpeg_is_installed};
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use tokio::task;
use tracing::{debug, info, warn};

/// Exit status and diagnostics of one codec run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stderr: String,
}

impl CodecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs the codec with an argument vector.  `Err` means the process could
/// not be started at all.
#[async_trait]
pub trait CodecRunner: Send + Sync {
    async fn run(&self, args: &[OsString]) -> io::Result<CodecOutput>;
}

/// [`CodecRunner`] backed by an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    path: PathBuf,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self {
            path: ffmpeg_sidecar::paths::ffmpeg_path(),
        }
    }
}

impl FfmpegRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Make sure an ffmpeg binary is available next to the executable,
    /// fetching a static build when none is found.
    pub async fn ensure_installed() -> io::Result<()> {
        task::spawn_blocking(|| {
            if ffmpeg_is_installed() {
                debug!("ffmpeg already installed");
                return Ok(());
            }
            info!("ffmpeg not found, downloading a static build");
            ffmpeg_sidecar::download::auto_download().map_err(|e| io::Error::other(e.to_string()))
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[async_trait]
impl CodecRunner for FfmpegRunner {
    async fn run(&self, args: &[OsString]) -> io::Result<CodecOutput> {
        let path = self.path.clone();
        let args = args.to_vec();

        task::spawn_blocking(move || -> io::Result<CodecOutput> {
            let mut command = FfmpegCommand::new_with_path(&path);
            command.hide_banner().args(&args);
            debug!(ffmpeg = %path.display(), ?args, "spawning codec");

            let mut child = command.spawn()?;
            let mut stderr = String::new();
            let events = child.iter().map_err(|e| io::Error::other(e.to_string()))?;
            for event in events {
                match event {
                    FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => {
                        warn!("[ffmpeg] {msg}");
                        stderr.push_str(&msg);
                        stderr.push('\n');
                    }
                    FfmpegEvent::Log(level, msg) => debug!("[ffmpeg {level:?}] {msg}"),
                    FfmpegEvent::Error(msg) => {
                        stderr.push_str(&msg);
                        stderr.push('\n');
                    }
                    _ => {}
                }
            }

            let status = child.wait()?;
            Ok(CodecOutput {
                status: status.code(),
                stderr,
            })
        })
        .await
        .map_err(io::Error::other)?
    }
}
