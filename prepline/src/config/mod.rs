//! Application configuration.
//!
//! Values are resolved in this order, later sources winning:
//! built-in defaults, the JSON file named by `PREPLINE_CONFIG`, then the
//! individual environment overrides (`DATABASE_URL`, `PREPLINE_FILE_ROOT`,
//! `PREPLINE_LOG_DIR`, `PREPLINE_TICK_SECS`). A `.env` file is read first so
//! it can provide any of these.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::models::StepName;
use crate::logging::DEFAULT_LOG_FILTER;
use crate::{Error, Result};

pub const ENV_CONFIG_FILE: &str = "PREPLINE_CONFIG";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_FILE_ROOT: &str = "PREPLINE_FILE_ROOT";
pub const ENV_LOG_DIR: &str = "PREPLINE_LOG_DIR";
pub const ENV_TICK_SECS: &str = "PREPLINE_TICK_SECS";

/// External command backing one step.
///
/// `args` and the values of `outputs` are templates; see
/// [`pipeline::CommandTask`](crate::pipeline::CommandTask) for the
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Context entries written after a successful run (key -> template).
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), template.into());
        self
    }
}

/// Local speech-to-text backend used by `transcribe-or-caption` when enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_whisper_program")]
    pub program: String,
    #[serde(default)]
    pub model_path: String,
    #[serde(default = "default_whisper_language")]
    pub language: String,
    #[serde(default = "default_whisper_threads")]
    pub threads: u32,
}

fn default_whisper_program() -> String {
    "whisper-cli".to_string()
}

fn default_whisper_language() -> String {
    "auto".to_string()
}

fn default_whisper_threads() -> u32 {
    4
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: default_whisper_program(),
            model_path: String::new(),
            language: default_whisper_language(),
            threads: default_whisper_threads(),
        }
    }
}

impl WhisperConfig {
    /// Check the settings a transcription run needs.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::config("whisper program is empty"));
        }
        if self.model_path.trim().is_empty() {
            return Err(Error::config("whisper model_path is not set"));
        }
        if self.threads == 0 {
            return Err(Error::config("whisper threads must be greater than 0"));
        }
        Ok(())
    }

    /// Command transcribing the extracted audio into `transcript.srt`.
    pub fn command(&self) -> StepCommand {
        StepCommand::new(self.program.clone())
            .with_args([
                "-m".to_string(),
                self.model_path.clone(),
                "-l".to_string(),
                self.language.clone(),
                "-t".to_string(),
                self.threads.to_string(),
                "-osrt".to_string(),
                "-of".to_string(),
                "{work_dir}/transcript".to_string(),
                "-f".to_string(),
                "{ctx:audio_path}".to_string(),
            ])
            .with_output("caption_path", "{work_dir}/transcript.srt")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Root under which per-job working directories are created.
    #[serde(default = "default_file_root")]
    pub file_root: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Queued jobs fetched per intake query.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Put jobs left in progress by an unclean shutdown back in the queue.
    #[serde(default = "default_requeue_interrupted_jobs")]
    pub requeue_interrupted_jobs: bool,

    #[serde(default = "default_steps")]
    pub steps: HashMap<StepName, StepCommand>,

    #[serde(default)]
    pub whisper: WhisperConfig,
}

fn default_database_url() -> String {
    "sqlite:prepline.db?mode=rwc".to_string()
}

fn default_file_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    10
}

fn default_requeue_interrupted_jobs() -> bool {
    true
}

/// yt-dlp / ffmpeg based commands for every step.
pub fn default_steps() -> HashMap<StepName, StepCommand> {
    let mut steps = HashMap::new();
    steps.insert(
        StepName::FetchMedia,
        StepCommand::new("yt-dlp")
            .with_args([
                "--no-progress",
                "-f",
                "bv*+ba/b",
                "--merge-output-format",
                "mp4",
                "-o",
                "{work_dir}/video.%(ext)s",
                "{url}",
            ])
            .with_output("video_path", "{work_dir}/video.mp4"),
    );
    steps.insert(
        StepName::ExtractAudio,
        StepCommand::new("ffmpeg")
            .with_args([
                "-y",
                "-i",
                "{ctx:video_path}",
                "-vn",
                "-ac",
                "1",
                "-ar",
                "16000",
                "{work_dir}/audio.wav",
            ])
            .with_output("audio_path", "{work_dir}/audio.wav"),
    );
    steps.insert(
        StepName::TranscribeOrCaption,
        StepCommand::new("yt-dlp")
            .with_args([
                "--skip-download",
                "--write-subs",
                "--write-auto-subs",
                "--sub-langs",
                "en.*",
                "--convert-subs",
                "srt",
                "-o",
                "{work_dir}/caption",
                "{url}",
            ])
            .with_output("caption_dir", "{work_dir}"),
    );
    steps.insert(
        StepName::FetchThumbnail,
        StepCommand::new("yt-dlp")
            .with_args([
                "--skip-download",
                "--write-thumbnail",
                "--convert-thumbnails",
                "jpg",
                "-o",
                "{work_dir}/thumbnail",
                "{url}",
            ])
            .with_output("thumbnail_path", "{work_dir}/thumbnail.jpg"),
    );
    steps.insert(
        StepName::TranslateCaptions,
        StepCommand::new("yt-dlp")
            .with_args([
                "--skip-download",
                "--write-auto-subs",
                "--sub-langs",
                "zh-Hans",
                "--convert-subs",
                "srt",
                "-o",
                "{work_dir}/translated",
                "{url}",
            ])
            .with_output("translated_caption_dir", "{work_dir}"),
    );
    steps.insert(
        StepName::BuildMetadata,
        StepCommand::new("yt-dlp")
            .with_args([
                "--skip-download",
                "--write-info-json",
                "-o",
                "{work_dir}/metadata",
                "{url}",
            ])
            .with_output("metadata_path", "{work_dir}/metadata.info.json"),
    );
    steps
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            file_root: default_file_root(),
            log_dir: default_log_dir(),
            log_filter: default_log_filter(),
            tick_interval_secs: default_tick_interval_secs(),
            batch_size: default_batch_size(),
            requeue_interrupted_jobs: default_requeue_interrupted_jobs(),
            steps: default_steps(),
            whisper: WhisperConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `.env`, the optional config file and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read environment variables.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG_FILE).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("invalid config file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(root) = lookup(ENV_FILE_ROOT) {
            self.file_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_TICK_SECS) {
            self.tick_interval_secs = secs.trim().parse().map_err(|_| {
                Error::config(format!("{ENV_TICK_SECS} must be a number of seconds, got '{secs}'"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(Error::config("tick_interval_secs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than 0"));
        }
        if self.database_url.trim().is_empty() {
            return Err(Error::config("database_url is empty"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = root.into();
        self
    }

    pub fn with_tick_interval_secs(mut self, secs: u64) -> Self {
        self.tick_interval_secs = secs;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_requeue_interrupted_jobs(mut self, enabled: bool) -> Self {
        self.requeue_interrupted_jobs = enabled;
        self
    }

    pub fn with_step(mut self, step: StepName, command: StepCommand) -> Self {
        self.steps.insert(step, command);
        self
    }

    pub fn with_whisper(mut self, whisper: WhisperConfig) -> Self {
        self.whisper = whisper;
        self
    }
}
