//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tunesmith - generate music remotely, download it and edit it locally
#[derive(Parser)]
#[command(name = "tunesmith")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Submit a text prompt for generation
    Submit {
        /// What the music should sound like
        prompt: String,

        /// Model name; short names get the configured namespace
        #[arg(short, long)]
        model: Option<String>,

        /// Requested length in seconds
        #[arg(short, long, default_value_t = 10.0)]
        duration: f64,

        /// Stay until the task is ready or failed
        #[arg(long)]
        wait: bool,

        /// Download the result once it is ready (implies --wait)
        #[arg(long)]
        download: bool,
    },

    /// Continue an existing audio file
    Continue {
        /// Seed audio to continue from
        seed: PathBuf,

        /// Optional description of the continuation
        #[arg(long)]
        description: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        /// Requested length in seconds
        #[arg(short, long, default_value_t = 10.0)]
        duration: f64,

        #[arg(long)]
        wait: bool,

        #[arg(long)]
        download: bool,
    },

    /// List every task
    List {
        /// Print tasks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resume interrupted polls and downloads, then wait for them
    Resume,

    /// Download a ready task and wait for the file
    Download {
        task_id: String,
    },

    /// Delete a task by id or title
    Delete {
        /// Task id (omit when using --title)
        #[arg(required_unless_present = "title")]
        task_id: Option<String>,

        #[arg(long, conflicts_with = "task_id")]
        title: Option<String>,

        /// Also remove the downloaded file
        #[arg(long)]
        delete_file: bool,
    },

    /// Submit a failed task again
    Resubmit {
        task_id: String,

        #[arg(long)]
        wait: bool,
    },

    /// Show prompt templates
    Presets {
        /// Genre to show; lists genres when omitted
        genre: Option<String>,
    },

    /// Print a coarse waveform of an audio file
    Waveform {
        file: PathBuf,
    },

    /// Cut a time range out of an audio file
    Trim {
        file: PathBuf,

        /// Start in milliseconds
        #[arg(long)]
        start: u64,

        /// End in milliseconds
        #[arg(long)]
        end: u64,

        /// Output name (sanitised, .wav appended)
        #[arg(short, long)]
        name: String,
    },

    /// Change the volume of a time range
    Volume {
        file: PathBuf,

        #[arg(long)]
        start: u64,

        #[arg(long)]
        end: u64,

        /// Linear factor: 0 mutes, 1 keeps, above 1 amplifies
        #[arg(short, long)]
        gain: f32,

        #[arg(short, long)]
        name: String,
    },

    /// Join audio files in order
    Concat {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long)]
        name: String,
    },

    /// List saved edits
    Edits {
        /// Remove the edit with this id from the list
        #[arg(long)]
        delete: Option<i64>,
    },

    /// Download a static ffmpeg build if none is installed
    InstallCodec,
}
