//! Downloader backed by an external command.
//!
//! The command line comes from `[downloader]` config. Placeholders in the
//! arguments are substituted per request:
//!
//! | placeholder | value                          |
//! |-------------|--------------------------------|
//! | `{uri}`     | provider item id               |
//! | `{artist}`  | artist name                    |
//! | `{title}`   | track title                    |
//! | `{output}`  | per-entry staging folder       |
//! | `{format}`  | configured audio format        |
//!
//! Outcome classification:
//! - exit 0 and an audio file in the staging folder: success
//! - exit 0 without a file, or an exit code listed in
//!   `permanent_exit_codes`: [`FetchError::NotFound`]
//! - anything else: [`FetchError::Transient`]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use walkdir::WalkDir;

use crate::config::DownloaderConfig;
use crate::providers::{Downloader, FetchError, FetchRequest};

/// Extensions accepted as downloaded audio (lowercase).
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "opus", "wav", "m4a", "aac"];

/// Downloader that shells out to a configurable command.
pub struct CommandDownloader {
    command: String,
    args: Vec<String>,
    format: String,
    permanent_exit_codes: Vec<i32>,
}

impl CommandDownloader {
    pub fn new(config: &DownloaderConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            format: config.format.clone(),
            permanent_exit_codes: config.permanent_exit_codes.clone(),
        }
    }

    /// Arguments for one request with placeholders filled in.
    fn render_args(&self, request: &FetchRequest) -> Vec<String> {
        let output = request.output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{uri}", &request.item_id)
                    .replace("{artist}", &request.artist)
                    .replace("{title}", &request.title)
                    .replace("{output}", &output)
                    .replace("{format}", &self.format)
            })
            .collect()
    }

    /// Whether the configured command can be started at all.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.command)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Newest audio file below `dir`.
fn find_audio_file(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_audio(e.path()))
        .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .map(|e| e.into_path())
}

/// Last line of the tool's output, for error messages.
fn last_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .chars()
        .take(300)
        .collect()
}

#[async_trait]
impl Downloader for CommandDownloader {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| FetchError::Transient(format!("staging folder: {e}")))?;

        let args = self.render_args(request);
        tracing::debug!(target: "acquisition", command = %self.command, ?args, "Running downloader");

        // Dropping the future (timeout, shutdown) kills the child.
        let output = tokio::process::Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to run {}: {e}", self.command)))?;

        let code = output.status.code();
        if output.status.success() {
            let dir = request.output_dir.clone();
            let found = tokio::task::spawn_blocking(move || find_audio_file(&dir))
                .await
                .map_err(|e| FetchError::Transient(e.to_string()))?;
            return found.ok_or_else(|| {
                FetchError::NotFound(format!(
                    "downloader produced no audio file: {}",
                    last_line(&output.stdout)
                ))
            });
        }

        let detail = match last_line(&output.stderr) {
            line if line.is_empty() => last_line(&output.stdout),
            line => line,
        };
        match code {
            Some(c) if self.permanent_exit_codes.contains(&c) => {
                Err(FetchError::NotFound(format!("exit code {c}: {detail}")))
            }
            Some(c) => Err(FetchError::Transient(format!("exit code {c}: {detail}"))),
            None => Err(FetchError::Transient(format!("terminated by signal: {detail}"))),
        }
    }
}
