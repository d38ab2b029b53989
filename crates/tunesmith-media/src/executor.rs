//! Serialized execution of [`TransformJob`]s.
//!
//! The codec is treated as a non-reentrant resource: every job goes through
//! one background loop, strictly one after another.  Each job gets its own
//! scratch directory under the configured root; everything written there
//! (normalised inputs, concat lists, staged outputs) is removed before the
//! caller sees the result.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Stage, TransformError};
use crate::job::{TransformJob, TransformOp, concat_args, concat_list};
use crate::runner::CodecRunner;

/// Last bytes of codec stderr kept in logs.
const STDERR_TAIL: usize = 2048;

struct Command {
    job: TransformJob,
    reply: oneshot::Sender<Result<PathBuf, TransformError>>,
}

/// Handle to the transform worker.  Cheap to clone; the worker stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct TransformExecutor {
    tx: mpsc::Sender<Command>,
}

impl TransformExecutor {
    /// Spawn the worker loop.  `capacity` bounds the number of queued jobs
    /// before `execute` starts waiting.
    pub fn start(
        runner: Arc<dyn CodecRunner>,
        scratch_root: impl Into<PathBuf>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));
        let worker = Worker {
            runner,
            scratch_root: scratch_root.into(),
        };

        tokio::spawn(async move {
            while let Some(Command { job, reply }) = rx.recv().await {
                let result = worker.process(&job).await;
                if reply.send(result).is_err() {
                    debug!(kind = %job.kind(), "transform caller went away before the result");
                }
            }
            debug!("transform executor stopped");
        });

        Self { tx }
    }

    /// Run `job` and return the final output path.  Jobs are validated
    /// again here so nothing invalid ever reaches the codec.
    pub async fn execute(&self, job: TransformJob) -> Result<PathBuf, TransformError> {
        job.validate()?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command { job, reply })
            .await
            .map_err(|_| TransformError::ExecutorClosed)?;
        rx.await.map_err(|_| TransformError::ExecutorClosed)?
    }
}

struct Worker {
    runner: Arc<dyn CodecRunner>,
    scratch_root: PathBuf,
}

impl Worker {
    async fn process(&self, job: &TransformJob) -> Result<PathBuf, TransformError> {
        info!(kind = %job.kind(), inputs = job.inputs().len(), output = %job.output().display(), "running transform");

        fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.scratch_root)?;

        let result = self.run_in(job, scratch.path()).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(scratch = %scratch_path.display(), "failed to remove scratch directory: {e}");
        }

        match &result {
            Ok(path) => info!(kind = %job.kind(), output = %path.display(), "transform finished"),
            Err(e) => warn!(kind = %job.kind(), "transform failed: {e}"),
        }
        result
    }

    async fn run_in(&self, job: &TransformJob, scratch: &Path) -> Result<PathBuf, TransformError> {
        let staged = scratch.join(format!("output.{}", job.output_extension()));

        match job.op() {
            TransformOp::Concatenate { format } => {
                let mut normalized = Vec::with_capacity(job.inputs().len());
                for (index, input) in job.inputs().iter().enumerate() {
                    let target = scratch.join(format!("input-{index}.{}", format.codec.extension()));
                    let step = TransformJob::format_convert(input, *format, &target)?;
                    self.invoke(Stage::Normalize { index }, step.codec_args(input, &target), &target)
                        .await?;
                    normalized.push(target);
                }

                let list = scratch.join("inputs.txt");
                fs::write(&list, concat_list(&normalized)).await?;
                self.invoke(Stage::Final, concat_args(&list, &staged), &staged)
                    .await?;
            }
            _ => {
                let input = job.inputs().first().ok_or_else(|| {
                    TransformError::Validation("transform has no input".into())
                })?;
                self.invoke(Stage::Final, job.codec_args(input, &staged), &staged)
                    .await?;
            }
        }

        promote(&staged, job.output()).await
    }

    /// One codec run.  Succeeds only on a zero exit status with a non-empty
    /// file at `expected`.
    async fn invoke(
        &self,
        stage: Stage,
        args: Vec<OsString>,
        expected: &Path,
    ) -> Result<(), TransformError> {
        let output = self
            .runner
            .run(&args)
            .await
            .map_err(|e| TransformError::Codec {
                stage,
                status: None,
                stderr: format!("failed to launch codec: {e}"),
            })?;

        if !output.success() {
            warn!(%stage, status = ?output.status, stderr = %tail(&output.stderr), "codec exited with an error");
            return Err(TransformError::Codec {
                stage,
                status: output.status,
                stderr: output.stderr,
            });
        }

        match fs::metadata(expected).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TransformError::Codec {
                stage,
                status: output.status,
                stderr: format!("codec produced no output at {}", expected.display()),
            }),
        }
    }
}

/// Move the staged output to `dest`, removing any previous file there
/// first.
async fn promote(staged: &Path, dest: &Path) -> Result<PathBuf, TransformError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::remove_file(dest).await {
        Ok(()) => debug!(dest = %dest.display(), "replaced previous output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = fs::rename(staged, dest).await {
        // Scratch and destination may live on different filesystems.
        debug!("rename failed ({e}), copying instead");
        fs::copy(staged, dest).await?;
    }
    Ok(dest.to_path_buf())
}

fn tail(s: &str) -> &str {
    if s.len() <= STDERR_TAIL {
        return s;
    }
    let mut start = s.len() - STDERR_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TargetFormat;
    use crate::testing::FakeRunner;

    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    fn setup() -> (tempfile::TempDir, PathBuf, Arc<FakeRunner>, TransformExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let runner = Arc::new(FakeRunner::default());
        let executor = TransformExecutor::start(runner.clone(), &scratch, 8);
        (dir, scratch, runner, executor)
    }

    #[tokio::test]
    async fn trim_promotes_output_and_cleans_scratch() {
        let (dir, scratch, runner, executor) = setup();
        let out = dir.path().join("out").join("cut.wav");

        let job = TransformJob::trim("in.mp3", 0, 1_000, Some(5_000), TargetFormat::wav(), &out)
            .unwrap();
        let path = executor.execute(job).await.unwrap();

        assert_eq!(path, out);
        assert!(out.exists());
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[tokio::test]
    async fn concat_normalizes_every_input_before_joining() {
        let (dir, scratch, runner, executor) = setup();
        let inputs = vec![
            PathBuf::from("a-44100.mp3"),
            PathBuf::from("b-22050.wav"),
            PathBuf::from("c-44100.mp3"),
        ];
        let out = dir.path().join("joined.mp3");

        let job = TransformJob::concatenate(inputs, TargetFormat::default(), &out).unwrap();
        executor.execute(job).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        for call in &calls[..3] {
            assert!(call.windows(2).any(|w| w == ["-ar", "44100"]));
            assert!(call.windows(2).any(|w| w == ["-ac", "2"]));
        }
        assert!(calls[3].windows(2).any(|w| w == ["-f", "concat"]));
        assert!(out.exists());
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[tokio::test]
    async fn failed_normalization_skips_concat() {
        let (dir, scratch, runner, executor) = setup();
        runner.fail_when("b-22050");
        let out = dir.path().join("joined.mp3");

        let inputs = vec![
            PathBuf::from("a-44100.mp3"),
            PathBuf::from("b-22050.wav"),
            PathBuf::from("c-44100.mp3"),
        ];
        let job = TransformJob::concatenate(inputs, TargetFormat::default(), &out).unwrap();
        let err = executor.execute(job).await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Normalize { index: 1 }));
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls.iter().any(|c| c.iter().any(|a| a == "concat")));
        assert!(!out.exists());
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_codec_error_and_keeps_previous_output() {
        let (dir, scratch, runner, executor) = setup();
        let out = dir.path().join("louder.mp3");
        std::fs::write(&out, b"previous").unwrap();
        runner.fail_when("volume=");

        let job = TransformJob::volume_adjust("in.mp3", 0, 1_000, 2.0, None, TargetFormat::default(), &out)
            .unwrap();
        let err = executor.execute(job).await.unwrap_err();

        assert!(matches!(err, TransformError::Codec { stage: Stage::Final, status: Some(1), .. }));
        assert_eq!(std::fs::read(&out).unwrap(), b"previous");
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[tokio::test]
    async fn success_replaces_previous_output() {
        let (dir, _scratch, _runner, executor) = setup();
        let out = dir.path().join("song.mp3");
        std::fs::write(&out, b"old").unwrap();

        let job = TransformJob::format_convert("in.wav", TargetFormat::default(), &out).unwrap();
        executor.execute(job).await.unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), FakeRunner::OUTPUT);
    }

    #[tokio::test]
    async fn empty_output_counts_as_failure() {
        let (dir, scratch, runner, executor) = setup();
        runner.write_nothing();

        let job = TransformJob::format_convert("in.wav", TargetFormat::wav(), dir.path().join("o.wav"))
            .unwrap();
        let err = executor.execute(job).await.unwrap_err();

        assert!(matches!(err, TransformError::Codec { status: Some(0), .. }));
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let long = "é".repeat(STDERR_TAIL);
        let t = tail(&long);
        assert!(t.len() <= STDERR_TAIL);
        assert!(t.chars().all(|c| c == 'é'));
    }
}
