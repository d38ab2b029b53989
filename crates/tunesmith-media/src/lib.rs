//! Audio transforms for tunesmith: typed codec jobs, a serialized
//! executor, waveform extraction and the clip timeline.

pub mod error;
pub mod executor;
pub mod job;
pub mod probe;
pub mod runner;
pub mod timeline;
pub mod waveform;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Stage, TransformError};
pub use executor::TransformExecutor;
pub use job::{AudioCodec, OpKind, TargetFormat, TransformJob, TransformOp};
pub use probe::{FfprobeProbe, MediaProbe};
pub use runner::{CodecOutput, CodecRunner, FfmpegRunner};
pub use timeline::{AudioClip, EditOutput, EditorConfig, TimelineEditor, TimelineEvent};
pub use waveform::{WAVEFORM_SAMPLE_RATE, WaveformExtractor, downsample};
