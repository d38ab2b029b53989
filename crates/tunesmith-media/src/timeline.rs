//! Ordered clip timeline and the edits that can be made to its sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use tunesmith_types::sanitize_file_name;

use crate::error::TransformError;
use crate::executor::TransformExecutor;
use crate::job::{OpKind, TargetFormat, TransformJob};
use crate::probe::MediaProbe;
use crate::waveform::WaveformExtractor;

/// One audio file placed on the timeline.  Clips never overlap: each starts
/// where the previous one ends.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub source_ref: PathBuf,
    pub timeline_offset_ms: u64,
    pub duration_ms: u64,
    /// Empty until extraction finishes (or when the source can't be
    /// decoded).
    pub waveform: Vec<f32>,
}

impl AudioClip {
    pub fn end_ms(&self) -> u64 {
        self.timeline_offset_ms + self.duration_ms
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    ClipAdded(AudioClip),
    WaveformReady { source_ref: PathBuf, points: usize },
    ClipRemoved(AudioClip),
    Cleared,
}

#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Where edited files are written.
    pub output_dir: PathBuf,
    pub trim_format: TargetFormat,
    /// Format for volume edits and concatenations.
    pub edit_format: TargetFormat,
    pub event_capacity: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("edits"),
            trim_format: TargetFormat::wav(),
            edit_format: TargetFormat::default(),
            event_capacity: 64,
        }
    }
}

/// A finished edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutput {
    pub path: PathBuf,
    pub duration_ms: u64,
    pub operation: OpKind,
}

#[derive(Clone)]
pub struct TimelineEditor {
    inner: Arc<Inner>,
}

struct Inner {
    clips: Mutex<Vec<AudioClip>>,
    events: broadcast::Sender<TimelineEvent>,
    probe: Arc<dyn MediaProbe>,
    waveforms: WaveformExtractor,
    executor: TransformExecutor,
    config: EditorConfig,
}

impl TimelineEditor {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        waveforms: WaveformExtractor,
        executor: TransformExecutor,
        config: EditorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                clips: Mutex::new(Vec::new()),
                events,
                probe,
                waveforms,
                executor,
                config,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.inner.events.subscribe()
    }

    // ── clip list ───────────────────────────────────────────────────────────

    /// Append `refs` in order.  Durations are probed up front, so a source
    /// that can't be read leaves the timeline untouched.  Waveforms are
    /// filled in later.
    pub async fn add_clips<I, P>(&self, refs: I) -> Result<Vec<AudioClip>, TransformError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut probed = Vec::new();
        for source in refs {
            let source = source.into();
            let duration_ms = self.inner.probe.duration_ms(&source).await?;
            probed.push((source, duration_ms));
        }

        let added = {
            let mut clips = self.inner.clips.lock().await;
            let mut offset = clips.last().map_or(0, AudioClip::end_ms);
            let mut added = Vec::with_capacity(probed.len());
            for (source_ref, duration_ms) in probed {
                let clip = AudioClip {
                    source_ref,
                    timeline_offset_ms: offset,
                    duration_ms,
                    waveform: Vec::new(),
                };
                offset = clip.end_ms();
                clips.push(clip.clone());
                added.push(clip);
            }
            added
        };

        for clip in &added {
            debug!(source = %clip.source_ref.display(), offset_ms = clip.timeline_offset_ms, "clip added");
            let _ = self.inner.events.send(TimelineEvent::ClipAdded(clip.clone()));
            self.spawn_waveform(clip.source_ref.clone());
        }
        Ok(added)
    }

    fn spawn_waveform(&self, source_ref: PathBuf) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let points = inner.waveforms.extract(&source_ref).await;
            if points.is_empty() {
                return;
            }
            let updated = {
                let mut clips = inner.clips.lock().await;
                let mut updated = false;
                for clip in clips.iter_mut().filter(|c| c.source_ref == source_ref) {
                    clip.waveform = points.clone();
                    updated = true;
                }
                updated
            };
            // The clip may have been removed while decoding.
            if updated {
                let _ = inner.events.send(TimelineEvent::WaveformReady {
                    source_ref,
                    points: points.len(),
                });
            }
        });
    }

    pub async fn remove_last(&self) -> Option<AudioClip> {
        let removed = self.inner.clips.lock().await.pop()?;
        let _ = self.inner.events.send(TimelineEvent::ClipRemoved(removed.clone()));
        Some(removed)
    }

    pub async fn clear(&self) {
        self.inner.clips.lock().await.clear();
        let _ = self.inner.events.send(TimelineEvent::Cleared);
    }

    pub async fn clips(&self) -> Vec<AudioClip> {
        self.inner.clips.lock().await.clone()
    }

    pub async fn total_duration_ms(&self) -> u64 {
        self.inner
            .clips
            .lock()
            .await
            .last()
            .map_or(0, AudioClip::end_ms)
    }

    // ── edits ───────────────────────────────────────────────────────────────

    /// Cut `[start_ms, end_ms)` of `source` into `<output_dir>/<name>.wav`.
    pub async fn trim(
        &self,
        source: &Path,
        start_ms: u64,
        end_ms: u64,
        destination_name: &str,
    ) -> Result<EditOutput, TransformError> {
        let duration = self.source_duration(source).await?;
        let format = self.inner.config.trim_format;
        let job = TransformJob::trim(
            source,
            start_ms,
            end_ms,
            Some(duration),
            format,
            self.destination(destination_name, format),
        )?;
        self.run(job, end_ms - start_ms).await
    }

    /// Scale `[start_ms, end_ms)` of `source` by `gain`, leaving the rest
    /// of it as is.
    pub async fn adjust_volume(
        &self,
        source: &Path,
        start_ms: u64,
        end_ms: u64,
        gain: f32,
        destination_name: &str,
    ) -> Result<EditOutput, TransformError> {
        let duration = self.source_duration(source).await?;
        let format = self.inner.config.edit_format;
        let job = TransformJob::volume_adjust(
            source,
            start_ms,
            end_ms,
            gain,
            Some(duration),
            format,
            self.destination(destination_name, format),
        )?;
        self.run(job, duration).await
    }

    /// Join `refs` in order into one file.
    pub async fn concatenate(
        &self,
        refs: &[PathBuf],
        destination_name: &str,
    ) -> Result<EditOutput, TransformError> {
        if refs.is_empty() {
            return Err(TransformError::Validation(
                "nothing to concatenate".into(),
            ));
        }
        let mut total = 0;
        for source in refs {
            total += self.source_duration(source).await?;
        }
        let format = self.inner.config.edit_format;
        let job = TransformJob::concatenate(
            refs.to_vec(),
            format,
            self.destination(destination_name, format),
        )?;
        self.run(job, total).await
    }

    /// Export the whole timeline as one file.
    pub async fn concatenate_timeline(
        &self,
        destination_name: &str,
    ) -> Result<EditOutput, TransformError> {
        let refs: Vec<PathBuf> = self
            .clips()
            .await
            .into_iter()
            .map(|c| c.source_ref)
            .collect();
        self.concatenate(&refs, destination_name).await
    }

    async fn run(&self, job: TransformJob, duration_ms: u64) -> Result<EditOutput, TransformError> {
        let operation = job.kind();
        let path = self.inner.executor.execute(job).await?;
        info!(%operation, path = %path.display(), duration_ms, "edit saved");
        Ok(EditOutput {
            path,
            duration_ms,
            operation,
        })
    }

    /// Duration of a timeline clip, or a fresh probe for other files.
    async fn source_duration(&self, source: &Path) -> Result<u64, TransformError> {
        let known = self
            .inner
            .clips
            .lock()
            .await
            .iter()
            .find(|c| c.source_ref == source)
            .map(|c| c.duration_ms);
        match known {
            Some(ms) => Ok(ms),
            None => self.inner.probe.duration_ms(source).await,
        }
    }

    fn destination(&self, name: &str, format: TargetFormat) -> PathBuf {
        self.inner
            .config
            .output_dir
            .join(sanitize_file_name(name, format.codec.extension()))
    }
}
