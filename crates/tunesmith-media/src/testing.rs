//! In-memory stand-ins for the codec and the metadata probe.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TransformError;
use crate::probe::MediaProbe;
use crate::runner::{CodecOutput, CodecRunner};

/// Writes a small file to the last argument (the output path) and
/// records every invocation.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Vec<String>>>,
    fail_when: Mutex<Option<String>>,
    pcm: Mutex<Option<Vec<u8>>>,
    write_nothing: Mutex<bool>,
}

impl FakeRunner {
    pub const OUTPUT: &'static [u8] = b"encoded audio";

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Exit with status 1 whenever an argument contains `needle`.
    pub fn fail_when(&self, needle: &str) {
        *self.fail_when.lock().unwrap() = Some(needle.to_owned());
    }

    /// Bytes written for raw PCM extraction.
    pub fn pcm(&self, samples: &[f32]) {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        *self.pcm.lock().unwrap() = Some(bytes);
    }

    /// Exit successfully without producing a file.
    pub fn write_nothing(&self) {
        *self.write_nothing.lock().unwrap() = true;
    }
}

#[async_trait]
impl CodecRunner for FakeRunner {
    async fn run(&self, args: &[OsString]) -> io::Result<CodecOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        self.calls.lock().unwrap().push(args.clone());

        let failing = self.fail_when.lock().unwrap().clone();
        if let Some(needle) = failing {
            if args.iter().any(|a| a.contains(&needle)) {
                return Ok(CodecOutput {
                    status: Some(1),
                    stderr: format!("{needle}: Invalid data found when processing input"),
                });
            }
        }

        if !*self.write_nothing.lock().unwrap() {
            let out = PathBuf::from(args.last().cloned().unwrap_or_default());
            let is_pcm = args.iter().any(|a| a == "pcm_f32le");
            let body = match self.pcm.lock().unwrap().clone() {
                Some(pcm) if is_pcm => pcm,
                _ => Self::OUTPUT.to_vec(),
            };
            std::fs::write(out, body)?;
        }

        Ok(CodecOutput {
            status: Some(0),
            stderr: String::new(),
        })
    }
}

/// Durations by path; unknown paths fail to probe.
#[derive(Default)]
pub struct FakeProbe {
    durations: Mutex<HashMap<PathBuf, u64>>,
}

impl FakeProbe {
    pub fn with(entries: &[(&str, u64)]) -> Self {
        let probe = Self::default();
        for (path, ms) in entries {
            probe.set(path, *ms);
        }
        probe
    }

    pub fn set(&self, path: impl AsRef<Path>, duration_ms: u64) {
        self.durations
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), duration_ms);
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn duration_ms(&self, path: &Path) -> Result<u64, TransformError> {
        self.durations
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| TransformError::Probe {
                path: path.to_path_buf(),
                message: "no such file".into(),
            })
    }
}
