//! Coarse amplitude envelopes for clip visualisation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Stage, TransformError};
use crate::job::TransformJob;
use crate::runner::CodecRunner;

/// Decode rate for waveform extraction.  Low, since only peaks matter.
pub const WAVEFORM_SAMPLE_RATE: u32 = 8_000;

/// Decodes sources to mono PCM and reduces them to roughly one amplitude
/// value per second.
///
/// Calls the runner directly rather than through the transform queue, so
/// several extractions can run at once.
#[derive(Clone)]
pub struct WaveformExtractor {
    runner: Arc<dyn CodecRunner>,
    scratch_root: PathBuf,
    sample_rate: u32,
}

impl WaveformExtractor {
    pub fn new(runner: Arc<dyn CodecRunner>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            scratch_root: scratch_root.into(),
            sample_rate: WAVEFORM_SAMPLE_RATE,
        }
    }

    /// Amplitudes in `[0, 1]`.  An empty vector means the source could not
    /// be decoded, not that it is silent.
    pub async fn extract(&self, source: &Path) -> Vec<f32> {
        match self.try_extract(source).await {
            Ok(points) => {
                debug!(source = %source.display(), points = points.len(), "waveform extracted");
                points
            }
            Err(e) => {
                warn!(source = %source.display(), "waveform extraction failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_extract(&self, source: &Path) -> Result<Vec<f32>, TransformError> {
        fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("waveform-")
            .tempdir_in(&self.scratch_root)?;
        let raw = scratch.path().join("samples.f32le");

        let job = TransformJob::extract_pcm(source, self.sample_rate, &raw)?;
        let output = self.runner.run(&job.codec_args(source, &raw)).await?;
        if !output.success() {
            return Err(TransformError::Codec {
                stage: Stage::Final,
                status: output.status,
                stderr: output.stderr,
            });
        }

        let bytes = fs::read(&raw).await?;
        // The scratch directory is removed when `scratch` drops.
        drop(scratch);

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(downsample(&samples, self.sample_rate as usize))
    }
}

/// Peak absolute amplitude of each `block`-sized run of samples, clamped to
/// `[0, 1]`.  A trailing partial block still yields a point.
pub fn downsample(samples: &[f32], block: usize) -> Vec<f32> {
    if block == 0 {
        return Vec::new();
    }
    samples
        .chunks(block)
        .map(|chunk| {
            chunk
                .iter()
                .filter(|s| s.is_finite())
                .fold(0.0_f32, |peak, s| peak.max(s.abs()))
                .clamp(0.0, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use tracing_test::traced_test;

    #[test]
    fn one_point_per_block() {
        let mut samples = vec![0.1_f32; 8];
        samples[2] = -0.6;
        samples[5] = 1.7;
        assert_eq!(downsample(&samples, 4), vec![0.6, 1.0]);
        assert_eq!(downsample(&samples, 3), vec![0.6, 1.0, 0.1]);
        assert!(downsample(&[], 4).is_empty());
        assert!(downsample(&samples, 0).is_empty());
    }

    #[tokio::test]
    async fn extracts_about_one_point_per_second() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::default());
        // 2.5 seconds at the decode rate.
        let samples: Vec<f32> = (0..WAVEFORM_SAMPLE_RATE * 5 / 2)
            .map(|i| if i % 1000 == 0 { 0.5 } else { 0.0 })
            .collect();
        runner.pcm(&samples);

        let extractor = WaveformExtractor::new(runner.clone(), dir.path().join("scratch"));
        let points = extractor.extract(Path::new("song.mp3")).await;

        assert_eq!(points, vec![0.5, 0.5, 0.5]);
        let call = &runner.calls()[0];
        assert!(call.windows(2).any(|w| w == ["-ar", "8000"]));
        assert_eq!(std::fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn undecodable_source_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::default());
        runner.fail_when("broken");

        let extractor = WaveformExtractor::new(runner, dir.path());
        assert!(extractor.extract(Path::new("broken.mp3")).await.is_empty());
        assert!(logs_contain("waveform extraction failed"));
    }
}
