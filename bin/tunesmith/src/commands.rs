//! Subcommand handlers.

use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use tracing::{info, warn};

use tunesmith_core::presets::{find_genre, genre_names};
use tunesmith_core::{
    EditStore, GenerationTask, HttpDownloadManager, HttpGenerationClient, SqliteStore,
    TaskLifecycleManager, TaskStatus,
};
use tunesmith_media::{
    CodecRunner, EditOutput, EditorConfig, FfmpegRunner, FfprobeProbe, MediaProbe,
    TimelineEditor, TransformExecutor, WaveformExtractor,
};
use tunesmith_types::seconds_to_ms;

use crate::cli::Commands;
use crate::config::Config;
use crate::shutdown_signal;

/// Jobs that may queue up behind a running transform.
const TRANSFORM_QUEUE: usize = 16;

pub(crate) async fn run(command: Commands, cfg: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Submit {
            prompt,
            model,
            duration,
            wait,
            download,
        } => {
            let lifecycle = open_lifecycle(cfg).await?;
            let model = model.unwrap_or_else(|| cfg.default_model.clone());
            let task = lifecycle
                .submit(&prompt, &model, duration_ms(duration)?)
                .await?;
            print_task(&task);
            follow(&lifecycle, &task.task_id, wait, download).await
        }

        Commands::Continue {
            seed,
            description,
            model,
            duration,
            wait,
            download,
        } => {
            let lifecycle = open_lifecycle(cfg).await?;
            let model = model.unwrap_or_else(|| cfg.default_model.clone());
            let task = lifecycle
                .submit_continuation(&seed, description.as_deref(), &model, duration_ms(duration)?)
                .await?;
            print_task(&task);
            follow(&lifecycle, &task.task_id, wait, download).await
        }

        Commands::List { json } => {
            let lifecycle = open_lifecycle(cfg).await?;
            let tasks = lifecycle.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("no tasks");
            } else {
                tasks.iter().for_each(print_task);
            }
            Ok(())
        }

        Commands::Resume => {
            let lifecycle = open_lifecycle(cfg).await?;
            let report = lifecycle.reconcile().await?;
            info!(
                polls = report.resumed_polls.len(),
                downloads = report.resumed_downloads.len(),
                completed = report.completed_downloads.len(),
                failed = report.failed_downloads.len(),
                "startup reconciliation done"
            );
            wait_for_workers(&lifecycle).await;
            lifecycle.list().await?.iter().for_each(print_task);
            Ok(())
        }

        Commands::Download { task_id } => {
            let lifecycle = open_lifecycle(cfg).await?;
            lifecycle.reconcile().await?;
            lifecycle.download(&task_id).await?;
            wait_for_workers(&lifecycle).await;
            print_task(&lifecycle.get(&task_id).await?);
            Ok(())
        }

        Commands::Delete {
            task_id,
            title,
            delete_file,
        } => {
            let lifecycle = open_lifecycle(cfg).await?;
            let removed = match (task_id, title) {
                (Some(id), _) => lifecycle.delete(&id, delete_file).await?,
                (None, Some(title)) => lifecycle.delete_by_title(&title, delete_file).await?,
                (None, None) => bail!("give a task id or --title"),
            };
            if !removed {
                bail!("no such task");
            }
            println!("deleted");
            Ok(())
        }

        Commands::Resubmit { task_id, wait } => {
            let lifecycle = open_lifecycle(cfg).await?;
            let task = lifecycle.resubmit(&task_id).await?;
            print_task(&task);
            follow(&lifecycle, &task.task_id, wait, false).await
        }

        Commands::Presets { genre } => {
            match genre {
                Some(name) => {
                    let genre = find_genre(&name).ok_or_else(|| anyhow!("unknown genre {name:?}"))?;
                    for prompt in genre.prompts {
                        println!("{prompt}");
                    }
                }
                None => genre_names().for_each(|name| println!("{name}")),
            }
            Ok(())
        }

        Commands::Waveform { file } => {
            let runner = codec_runner(cfg);
            let extractor = WaveformExtractor::new(runner, &cfg.scratch_dir);
            let points = extractor.extract(&file).await;
            if points.is_empty() {
                bail!("could not decode {}", file.display());
            }
            println!("{}", sparkline(&points));
            Ok(())
        }

        Commands::Trim {
            file,
            start,
            end,
            name,
        } => {
            let (editor, store) = open_editor(cfg).await?;
            let output = editor.trim(&file, start, end, &name).await?;
            save_edit(&store, &name, &output).await
        }

        Commands::Volume {
            file,
            start,
            end,
            gain,
            name,
        } => {
            let (editor, store) = open_editor(cfg).await?;
            let output = editor.adjust_volume(&file, start, end, gain, &name).await?;
            save_edit(&store, &name, &output).await
        }

        Commands::Concat { files, name } => {
            let (editor, store) = open_editor(cfg).await?;
            editor.add_clips(files).await?;
            let output = editor.concatenate_timeline(&name).await?;
            save_edit(&store, &name, &output).await
        }

        Commands::Edits { delete } => {
            let store = open_store(cfg).await?;
            if let Some(id) = delete {
                if !store.delete_edit(id).await? {
                    bail!("no saved edit with id {id}");
                }
                println!("removed edit {id}");
                return Ok(());
            }
            for edit in store.list_edits().await? {
                println!(
                    "{:>4}  {:<14} {:>9}  {}  {}",
                    edit.id,
                    edit.operation,
                    tunesmith_types::format_seconds(edit.duration_ms),
                    edit.title,
                    edit.path.display()
                );
            }
            Ok(())
        }

        Commands::InstallCodec => {
            FfmpegRunner::ensure_installed()
                .await
                .context("failed to install ffmpeg")?;
            println!("ffmpeg ready");
            Ok(())
        }
    }
}

// ── wiring ───────────────────────────────────────────────────────────────────

async fn open_store(cfg: &Config) -> anyhow::Result<SqliteStore> {
    let store = SqliteStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("failed to open {}", cfg.database_url))?;
    info!(database_url = %cfg.database_url, "database ready");
    Ok(store)
}

async fn open_lifecycle(cfg: &Config) -> anyhow::Result<TaskLifecycleManager> {
    let store = Arc::new(open_store(cfg).await?);
    let service = Arc::new(HttpGenerationClient::new(cfg.client_config())?);
    let http = reqwest::Client::builder()
        .user_agent(concat!("tunesmith/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let downloads = Arc::new(HttpDownloadManager::new(http, &cfg.download_dir));
    Ok(TaskLifecycleManager::new(
        store,
        service,
        downloads,
        cfg.lifecycle_config(),
    ))
}

fn codec_runner(cfg: &Config) -> Arc<dyn CodecRunner> {
    Arc::new(cfg.ffmpeg.clone().map(FfmpegRunner::new).unwrap_or_default())
}

async fn open_editor(cfg: &Config) -> anyhow::Result<(TimelineEditor, SqliteStore)> {
    let store = open_store(cfg).await?;
    let runner = codec_runner(cfg);
    let probe: Arc<dyn MediaProbe> =
        Arc::new(cfg.ffprobe.clone().map(FfprobeProbe::new).unwrap_or_default());
    let waveforms = WaveformExtractor::new(Arc::clone(&runner), &cfg.scratch_dir);
    let executor = TransformExecutor::start(runner, &cfg.scratch_dir, TRANSFORM_QUEUE);
    let editor = TimelineEditor::new(
        probe,
        waveforms,
        executor,
        EditorConfig {
            output_dir: cfg.output_dir.clone(),
            ..EditorConfig::default()
        },
    );
    Ok((editor, store))
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn duration_ms(seconds: f64) -> anyhow::Result<u64> {
    seconds_to_ms(seconds)
        .filter(|ms| *ms > 0)
        .ok_or_else(|| anyhow!("duration must be a positive number of seconds, got {seconds}"))
}

/// Optionally wait for the task's poll worker, then download the result.
async fn follow(
    lifecycle: &TaskLifecycleManager,
    task_id: &str,
    wait: bool,
    download: bool,
) -> anyhow::Result<()> {
    if !(wait || download) {
        lifecycle.shutdown();
        return Ok(());
    }
    if !wait_for_workers(lifecycle).await {
        return Ok(());
    }
    let task = lifecycle.get(task_id).await?;
    if download && task.status == TaskStatus::Ready {
        lifecycle.download(task_id).await?;
        wait_for_workers(lifecycle).await;
        print_task(&lifecycle.get(task_id).await?);
    } else {
        print_task(&task);
    }
    Ok(())
}

/// Wait until every worker is done.  Returns `false` when interrupted; the
/// remaining work resumes on the next `resume`.
async fn wait_for_workers(lifecycle: &TaskLifecycleManager) -> bool {
    tokio::select! {
        _ = lifecycle.wait_idle() => true,
        _ = shutdown_signal() => {
            warn!("interrupted; unfinished tasks resume on the next start");
            lifecycle.shutdown();
            false
        }
    }
}

async fn save_edit(store: &SqliteStore, title: &str, output: &EditOutput) -> anyhow::Result<()> {
    let edit = store
        .record_edit(title, &output.path, output.duration_ms, output.operation.as_ref())
        .await?;
    println!("{} (edit #{})", output.path.display(), edit.id);
    Ok(())
}

fn print_task(task: &GenerationTask) {
    let location = match (&task.local_path, &task.remote_url) {
        (Some(path), _) => format!("  {}", path.display()),
        (None, Some(url)) => format!("  {url}"),
        (None, None) => String::new(),
    };
    println!("{:<36} {:<11} {}{}", task.task_id, task.status.as_ref(), task.title, location);
    if let Some(failure) = &task.failure {
        println!("{:<36} {:<11} {}: {}", "", "", failure.reason, failure.message);
    }
}

fn sparkline(points: &[f32]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    points
        .iter()
        .map(|p| BARS[((p.clamp(0.0, 1.0) * 7.0).round() as usize).min(7)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparkline_maps_peaks_to_bars() {
        assert_eq!(sparkline(&[0.0, 0.5, 1.0, 3.0]), "▁▅██");
    }

    #[test]
    fn durations_must_be_positive() {
        assert_eq!(duration_ms(12.5).unwrap(), 12_500);
        assert!(duration_ms(0.0).is_err());
        assert!(duration_ms(-3.0).is_err());
    }
}
