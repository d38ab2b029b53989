//! Typed descriptions of codec invocations.
//!
//! A [`TransformJob`] can only be built through its validating
//! constructors, and turns itself into an argument vector without ever
//! going through a shell.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use strum::{AsRefStr, Display, EnumString};

use tunesmith_types::format_seconds;

use crate::error::TransformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioCodec {
    Mp3,
    Wav,
    Flac,
    Aac,
}

impl AudioCodec {
    pub fn encoder(self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Wav => "pcm_s16le",
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "aac",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Wav => "wav",
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "m4a",
        }
    }

    fn bitrate(self) -> Option<&'static str> {
        match self {
            AudioCodec::Mp3 | AudioCodec::Aac => Some("192k"),
            AudioCodec::Wav | AudioCodec::Flac => None,
        }
    }
}

/// Codec, sample rate and channel count of an encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for TargetFormat {
    /// 44.1 kHz stereo MP3 at 192 kbit/s, the common format for
    /// concatenation.
    fn default() -> Self {
        Self {
            codec: AudioCodec::Mp3,
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl TargetFormat {
    /// 44.1 kHz stereo 16-bit PCM WAV.
    pub fn wav() -> Self {
        Self {
            codec: AudioCodec::Wav,
            ..Self::default()
        }
    }

    fn encode_args(&self, args: &mut Vec<OsString>) {
        push(args, ["-acodec", self.codec.encoder()]);
        if let Some(bitrate) = self.codec.bitrate() {
            push(args, ["-b:a", bitrate]);
        }
        push(args, ["-ar".to_owned(), self.sample_rate.to_string()]);
        push(args, ["-ac".to_owned(), self.channels.to_string()]);
    }

    fn validate(&self) -> Result<(), TransformError> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(TransformError::Validation(format!(
                "sample rate and channel count must be positive (got {} Hz, {} ch)",
                self.sample_rate, self.channels
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformOp {
    Trim {
        start_ms: u64,
        end_ms: u64,
        format: TargetFormat,
    },
    /// Scale `[start_ms, end_ms)` by the linear factor `gain`; the rest of
    /// the source passes through unchanged.
    VolumeAdjust {
        start_ms: u64,
        end_ms: u64,
        gain: f32,
        source_duration_ms: Option<u64>,
        format: TargetFormat,
    },
    /// Inputs are normalised to `format` first, then joined losslessly.
    Concatenate { format: TargetFormat },
    FormatConvert { format: TargetFormat },
    /// Raw little-endian f32 mono PCM.
    ExtractPcm { sample_rate: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    Trim,
    VolumeAdjust,
    Concatenate,
    FormatConvert,
    ExtractPcm,
}

/// One validated codec job: operation, ordered inputs and final output.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformJob {
    op: TransformOp,
    inputs: Vec<PathBuf>,
    output: PathBuf,
}

impl TransformJob {
    /// Keep `[start_ms, end_ms)` of `input`.  With a known
    /// `source_duration_ms`, `end_ms` must not exceed it.
    pub fn trim(
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        source_duration_ms: Option<u64>,
        format: TargetFormat,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        check_range(start_ms, end_ms, source_duration_ms)?;
        Self::build(TransformOp::Trim { start_ms, end_ms, format }, vec![input.into()], output)
    }

    pub fn volume_adjust(
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        gain: f32,
        source_duration_ms: Option<u64>,
        format: TargetFormat,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        Self::build(
            TransformOp::VolumeAdjust {
                start_ms,
                end_ms,
                gain,
                source_duration_ms,
                format,
            },
            vec![input.into()],
            output,
        )
    }

    pub fn concatenate(
        inputs: Vec<PathBuf>,
        format: TargetFormat,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        Self::build(TransformOp::Concatenate { format }, inputs, output)
    }

    pub fn format_convert(
        input: impl Into<PathBuf>,
        format: TargetFormat,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        Self::build(TransformOp::FormatConvert { format }, vec![input.into()], output)
    }

    pub fn extract_pcm(
        input: impl Into<PathBuf>,
        sample_rate: u32,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        Self::build(TransformOp::ExtractPcm { sample_rate }, vec![input.into()], output)
    }

    fn build(
        op: TransformOp,
        inputs: Vec<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<Self, TransformError> {
        let job = Self {
            op,
            inputs,
            output: output.into(),
        };
        job.validate()?;
        Ok(job)
    }

    pub fn op(&self) -> &TransformOp {
        &self.op
    }

    pub fn kind(&self) -> OpKind {
        match self.op {
            TransformOp::Trim { .. } => OpKind::Trim,
            TransformOp::VolumeAdjust { .. } => OpKind::VolumeAdjust,
            TransformOp::Concatenate { .. } => OpKind::Concatenate,
            TransformOp::FormatConvert { .. } => OpKind::FormatConvert,
            TransformOp::ExtractPcm { .. } => OpKind::ExtractPcm,
        }
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Extension the codec output should carry.
    pub fn output_extension(&self) -> &'static str {
        match &self.op {
            TransformOp::Trim { format, .. }
            | TransformOp::VolumeAdjust { format, .. }
            | TransformOp::Concatenate { format }
            | TransformOp::FormatConvert { format } => format.codec.extension(),
            TransformOp::ExtractPcm { .. } => "f32le",
        }
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        if self.output.file_name().is_none() {
            return Err(TransformError::Validation(format!(
                "output path {} has no file name",
                self.output.display()
            )));
        }
        match &self.op {
            TransformOp::Concatenate { format } => {
                if self.inputs.is_empty() {
                    return Err(TransformError::Validation(
                        "concatenation needs at least one input".into(),
                    ));
                }
                format.validate()
            }
            op => {
                if self.inputs.len() != 1 {
                    return Err(TransformError::Validation(format!(
                        "{} takes exactly one input, got {}",
                        self.kind(),
                        self.inputs.len()
                    )));
                }
                match op {
                    TransformOp::Trim { start_ms, end_ms, format } => {
                        check_range(*start_ms, *end_ms, None)?;
                        format.validate()
                    }
                    TransformOp::VolumeAdjust {
                        start_ms,
                        end_ms,
                        gain,
                        source_duration_ms,
                        format,
                    } => {
                        if !gain.is_finite() || *gain < 0.0 {
                            return Err(TransformError::Validation(format!(
                                "gain must be a finite, non-negative factor (got {gain})"
                            )));
                        }
                        check_range(*start_ms, *end_ms, *source_duration_ms)?;
                        format.validate()
                    }
                    TransformOp::FormatConvert { format } => format.validate(),
                    TransformOp::ExtractPcm { sample_rate } if *sample_rate == 0 => Err(
                        TransformError::Validation("PCM sample rate must be positive".into()),
                    ),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Arguments for one single-invocation operation reading `input` and
    /// writing `output`.  Not used for [`TransformOp::Concatenate`], which
    /// goes through [`concat_args`].
    pub(crate) fn codec_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        push(&mut args, ["-y", "-i"]);
        args.push(input.as_os_str().to_owned());

        match &self.op {
            TransformOp::Trim { start_ms, end_ms, format } => {
                push(&mut args, ["-ss".to_owned(), format_seconds(*start_ms)]);
                push(&mut args, ["-to".to_owned(), format_seconds(*end_ms)]);
                push(&mut args, ["-vn"]);
                format.encode_args(&mut args);
            }
            TransformOp::VolumeAdjust {
                start_ms,
                end_ms,
                gain,
                source_duration_ms,
                format,
            } => {
                let graph = volume_filter(*start_ms, *end_ms, *gain, *source_duration_ms);
                push(&mut args, ["-filter_complex".to_owned(), graph]);
                push(&mut args, ["-map", "[out]"]);
                format.encode_args(&mut args);
            }
            TransformOp::Concatenate { format } | TransformOp::FormatConvert { format } => {
                push(&mut args, ["-vn"]);
                format.encode_args(&mut args);
            }
            TransformOp::ExtractPcm { sample_rate } => {
                push(&mut args, ["-vn", "-f", "f32le", "-acodec", "pcm_f32le"]);
                push(&mut args, ["-ar".to_owned(), sample_rate.to_string()]);
                push(&mut args, ["-ac", "1"]);
            }
        }

        args.push(output.as_os_str().to_owned());
        args
    }
}

/// Arguments joining the files listed in `list` without re-encoding.
pub(crate) fn concat_args(list: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    push(&mut args, ["-y", "-f", "concat", "-safe", "0", "-i"]);
    args.push(list.as_os_str().to_owned());
    push(&mut args, ["-c", "copy"]);
    args.push(output.as_os_str().to_owned());
    args
}

/// Contents of a concat demuxer list file for `inputs`.
pub(crate) fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Filter graph for a volume change between `start_ms` and `end_ms`.
///
/// Up to three segments (before, during, after) are cut from the input and
/// joined again; segments of zero length are left out.
fn volume_filter(start_ms: u64, end_ms: u64, gain: f32, source_duration_ms: Option<u64>) -> String {
    let start = format_seconds(start_ms);
    let end = format_seconds(end_ms);
    let mut chains = Vec::with_capacity(4);
    let mut labels = Vec::with_capacity(3);

    if start_ms > 0 {
        chains.push(format!("[0:a]atrim=end={start},asetpts=PTS-STARTPTS[before]"));
        labels.push("[before]");
    }
    chains.push(format!(
        "[0:a]atrim=start={start}:end={end},asetpts=PTS-STARTPTS,volume={gain}[during]"
    ));
    labels.push("[during]");
    if source_duration_ms.is_none_or(|d| end_ms < d) {
        chains.push(format!("[0:a]atrim=start={end},asetpts=PTS-STARTPTS[after]"));
        labels.push("[after]");
    }

    if labels.len() == 1 {
        // Nothing to join; relabel the lone segment.
        let only = chains.pop().unwrap_or_default().replace("[during]", "[out]");
        return only;
    }
    chains.push(format!(
        "{}concat=n={}:v=0:a=1[out]",
        labels.concat(),
        labels.len()
    ));
    chains.join(";")
}

fn check_range(start_ms: u64, end_ms: u64, duration_ms: Option<u64>) -> Result<(), TransformError> {
    if start_ms >= end_ms {
        return Err(TransformError::Validation(format!(
            "start ({start_ms} ms) must be before end ({end_ms} ms)"
        )));
    }
    if let Some(duration) = duration_ms {
        if end_ms > duration {
            return Err(TransformError::Validation(format!(
                "end ({end_ms} ms) is past the end of the source ({duration} ms)"
            )));
        }
    }
    Ok(())
}

fn push<I, S>(args: &mut Vec<OsString>, items: I)
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    args.extend(items.into_iter().map(Into::into));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn trim_args_seek_after_input_and_encode() {
        let job = TransformJob::trim("in.mp3", 1_500, 4_000, Some(8_000), TargetFormat::wav(), "out.wav")
            .unwrap();
        let args = strings(&job.codec_args(Path::new("in.mp3"), Path::new("tmp.wav")));
        assert_eq!(
            args,
            [
                "-y", "-i", "in.mp3", "-ss", "1.500", "-to", "4.000", "-vn", "-acodec",
                "pcm_s16le", "-ar", "44100", "-ac", "2", "tmp.wav"
            ]
        );
    }

    #[test]
    fn trim_rejects_bad_ranges() {
        let f = TargetFormat::wav();
        assert!(matches!(
            TransformJob::trim("a", 500, 500, None, f, "o.wav"),
            Err(TransformError::Validation(_))
        ));
        assert!(matches!(
            TransformJob::trim("a", 0, 10_000, Some(8_000), f, "o.wav"),
            Err(TransformError::Validation(_))
        ));
    }

    #[test]
    fn volume_filter_has_three_segments_in_the_middle() {
        let graph = volume_filter(2_000, 5_000, 1.5, Some(10_000));
        assert_eq!(
            graph,
            "[0:a]atrim=end=2.000,asetpts=PTS-STARTPTS[before];\
             [0:a]atrim=start=2.000:end=5.000,asetpts=PTS-STARTPTS,volume=1.5[during];\
             [0:a]atrim=start=5.000,asetpts=PTS-STARTPTS[after];\
             [before][during][after]concat=n=3:v=0:a=1[out]"
        );
    }

    #[test]
    fn volume_filter_skips_empty_segments() {
        let head = volume_filter(0, 3_000, 0.0, Some(10_000));
        assert!(!head.contains("[before]"));
        assert!(head.ends_with("[during][after]concat=n=2:v=0:a=1[out]"));

        let whole = volume_filter(0, 10_000, 2.0, Some(10_000));
        assert_eq!(
            whole,
            "[0:a]atrim=start=0.000:end=10.000,asetpts=PTS-STARTPTS,volume=2[out]"
        );
    }

    #[test]
    fn volume_rejects_negative_or_nan_gain() {
        let f = TargetFormat::default();
        for gain in [-0.5, f32::NAN, f32::INFINITY] {
            assert!(TransformJob::volume_adjust("a", 0, 1_000, gain, None, f, "o.mp3").is_err());
        }
        // Amplification is passed through untouched.
        assert!(TransformJob::volume_adjust("a", 0, 1_000, 4.0, None, f, "o.mp3").is_ok());
    }

    #[test]
    fn concatenate_needs_an_input() {
        let err = TransformJob::concatenate(Vec::new(), TargetFormat::default(), "o.mp3").unwrap_err();
        assert!(matches!(err, TransformError::Validation(_)));
    }

    #[test]
    fn concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/tmp/a.mp3"), PathBuf::from("/tmp/it's.mp3")]);
        assert_eq!(list, "file '/tmp/a.mp3'\nfile '/tmp/it'\\''s.mp3'\n");
    }

    #[test]
    fn pcm_extraction_is_mono_f32() {
        let job = TransformJob::extract_pcm("in.wav", 8_000, "out.raw").unwrap();
        let args = strings(&job.codec_args(Path::new("in.wav"), Path::new("out.raw")));
        assert!(args.windows(2).any(|w| w == ["-f", "f32le"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "8000"]));
    }

    #[test]
    fn codec_names_parse() {
        use std::str::FromStr;
        assert_eq!(AudioCodec::from_str("MP3").unwrap(), AudioCodec::Mp3);
        assert_eq!(AudioCodec::Aac.extension(), "m4a");
    }
}
