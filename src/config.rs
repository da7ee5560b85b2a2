//! Configuration loading and management
//!
//! Defaults are overlaid by an optional TOML file and a couple of
//! environment variables. Every timing constant of the capture and output
//! controllers lives here so deployments can tune them without a rebuild.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dialogue::AssistantState;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for the operator control channel
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub capture: CaptureTimings,
    pub output: OutputTimings,
    pub dialogue: DialogueConfig,
}

/// On-disk layout; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    capture: CaptureTimings,
    output: OutputTimings,
    dialogue: DialogueConfig,
}

/// Supervisor timings for the recognition session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureTimings {
    pub min_start_interval_ms: u64,
    pub aborted_cooldown_ms: u64,
    pub restart_base_ms: u64,
    pub aborted_restart_base_ms: u64,
    pub backoff_factor: f64,
    pub max_restart_delay_ms: u64,
    pub stable_after_ms: u64,
    pub watchdog_ms: u64,
    pub reinit_after_errors: u32,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            min_start_interval_ms: 1_000,
            aborted_cooldown_ms: 4_000,
            restart_base_ms: 1_000,
            aborted_restart_base_ms: 3_000,
            backoff_factor: 1.8,
            max_restart_delay_ms: 15_000,
            stable_after_ms: 8_000,
            watchdog_ms: 12_000,
            reinit_after_errors: 3,
        }
    }
}

impl CaptureTimings {
    pub fn min_start_interval(&self) -> Duration {
        Duration::from_millis(self.min_start_interval_ms)
    }

    pub fn aborted_cooldown(&self) -> Duration {
        Duration::from_millis(self.aborted_cooldown_ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_millis(self.max_restart_delay_ms)
    }
}

/// Speech output timings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputTimings {
    /// Capture stays paused this long after an utterance completes
    pub grace_ms: u64,
    /// Delay before releasing capture after a forced interrupt
    pub settle_ms: u64,
    /// Force-finalize an utterance the engine never completes
    pub safety_timeout_ms: u64,
}

impl Default for OutputTimings {
    fn default() -> Self {
        Self {
            grace_ms: 1_000,
            settle_ms: 100,
            safety_timeout_ms: 15_000,
        }
    }
}

impl OutputTimings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }
}

/// Where a full dialogue reset lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetState {
    Listening,
    Dormant,
}

impl From<ResetState> for AssistantState {
    fn from(state: ResetState) -> Self {
        match state {
            ResetState::Listening => AssistantState::Listening,
            ResetState::Dormant => AssistantState::Dormant,
        }
    }
}

/// Dialogue orchestrator settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Phrases accepted while dormant
    pub wake_words: Vec<String>,
    pub reset_state: ResetState,
    /// Platform commands are refused until a user signs in
    pub require_auth_for_platforms: bool,
    pub max_pin_attempts: u32,
    pub max_face_attempts: u32,
    pub collaborator_timeout_ms: u64,
    pub transcript_log_limit: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            wake_words: vec![
                "hey concierge".to_string(),
                "hello concierge".to_string(),
                "wake up".to_string(),
            ],
            reset_state: ResetState::Listening,
            require_auth_for_platforms: true,
            max_pin_attempts: 3,
            max_face_attempts: 2,
            collaborator_timeout_ms: 20_000,
            transcript_log_limit: 500,
        }
    }
}

impl DialogueConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

impl Config {
    /// Load configuration from defaults, the config file and environment
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voice-concierge");

        let path = std::env::var_os("VOICE_CONCIERGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::parse_file(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            FileConfig::default()
        };

        let mut config = Self::from_file(file, data_dir);
        if let Some(socket) = std::env::var_os("VOICE_CONCIERGE_SOCKET") {
            config.socket_path = PathBuf::from(socket);
        }

        Ok(config)
    }

    fn parse_file(raw: &str) -> Result<FileConfig> {
        Ok(toml::from_str(raw)?)
    }

    fn from_file(file: FileConfig, data_dir: PathBuf) -> Self {
        let socket_path = file
            .socket_path
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        Self {
            socket_path,
            data_dir,
            capture: file.capture,
            output: file.output,
            dialogue: file.dialogue,
        }
    }

}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(FileConfig::default(), std::env::temp_dir().join("voice-concierge"))
    }
}

impl Config {
    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
