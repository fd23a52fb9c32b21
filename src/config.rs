//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::VideoConstraints;
use crate::error::ConfigError;
use crate::speech::VoiceSettings;

/// How overlapping poll responses are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollOrdering {
    /// Whichever response resolves last is applied, even if it was issued earlier.
    #[default]
    LastResolved,
    /// Responses older than the newest applied request are discarded.
    LatestIssued,
}

impl std::str::FromStr for PollOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-resolved" | "last_resolved" => Ok(Self::LastResolved),
            "latest-issued" | "latest_issued" => Ok(Self::LatestIssued),
            other => Err(format!("unknown poll ordering '{other}'")),
        }
    }
}

/// Settings for one exercise session controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between feedback polls.
    pub poll_interval: Duration,
    /// Reconciliation policy for overlapping polls.
    pub poll_ordering: PollOrdering,
    /// Camera stream request.
    pub video: VideoConstraints,
    /// Text-to-speech parameters.
    pub voice: VoiceSettings,
    /// Whether voice feedback starts enabled.
    pub voice_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_ordering: PollOrdering::LastResolved,
            video: VideoConstraints::default(),
            voice: VoiceSettings::default(),
            voice_enabled: false,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct CoachConfig {
    /// Pose-analysis backend base URL.
    pub pose_url: String,
    /// Diet recommendation service base URL.
    pub diet_url: String,
    /// Nutrition lookup service base URL.
    pub nutrition_url: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Video device node opened by the camera capability.
    pub camera_device: PathBuf,
    /// External TTS program. `None` prints announcements to stderr.
    pub tts_command: Option<String>,
    /// Directory for rolling log files. `None` logs to stderr.
    pub log_dir: Option<PathBuf>,
    pub session: SessionConfig,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            pose_url: "http://localhost:5000".to_string(),
            diet_url: "http://localhost:5002".to_string(),
            nutrition_url: "http://localhost:5003".to_string(),
            http_timeout: Duration::from_secs(10),
            camera_device: PathBuf::from("/dev/video0"),
            tts_command: None,
            log_dir: None,
            session: SessionConfig::default(),
        }
    }
}

impl CoachConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("COACH_POSE_URL") {
            config.pose_url = trim_base_url(&url);
        }
        if let Some(url) = lookup("COACH_DIET_URL") {
            config.diet_url = trim_base_url(&url);
        }
        if let Some(url) = lookup("COACH_NUTRITION_URL") {
            config.nutrition_url = trim_base_url(&url);
        }

        if let Some(ms) = lookup("COACH_POLL_INTERVAL_MS").and_then(|s| s.parse::<u64>().ok()) {
            if ms > 0 {
                config.session.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(ordering) = lookup("COACH_POLL_ORDERING") {
            match ordering.parse() {
                Ok(o) => config.session.poll_ordering = o,
                Err(e) => tracing::warn!("Ignoring COACH_POLL_ORDERING: {e}"),
            }
        }

        if let Some(secs) = lookup("COACH_HTTP_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(device) = lookup("COACH_CAMERA_DEVICE") {
            config.camera_device = PathBuf::from(device);
        }

        config.tts_command = lookup("COACH_TTS_COMMAND").filter(|s| !s.trim().is_empty());
        config.log_dir = lookup("COACH_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        config.session.voice_enabled = lookup("COACH_VOICE")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
            .unwrap_or(false);

        config
    }

    /// Reject base URLs that reqwest could never reach.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, url) in [
            ("COACH_POSE_URL", &self.pose_url),
            ("COACH_DIET_URL", &self.diet_url),
            ("COACH_NUTRITION_URL", &self.nutrition_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
