//! Small shared helpers used by both the task lifecycle and the media crates.

pub mod naming;
pub mod time;

pub use naming::{sanitize_file_name, MAX_FILE_STEM_CHARS};
pub use time::{format_seconds, ms_to_seconds, seconds_to_ms};
