//! Session state and the pose samples that feed it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle phase of an exercise session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No session; nothing held.
    Idle,
    /// Backend is reachable and the camera is being acquired.
    StartingCamera,
    /// Camera held and feedback being polled.
    Active,
    /// Session ended by the user; counters kept for display.
    Stopped,
}

impl Phase {
    /// Phases from which `start()` is legal.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Phases in which the camera stream is held.
    pub fn holds_camera(&self) -> bool {
        matches!(self, Self::StartingCamera | Self::Active)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::StartingCamera => "starting_camera",
            Self::Active => "active",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// The exercises the pose backend knows how to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseKind {
    Bicep,
    Pushup,
    Squat,
    Lunge,
    Shoulder,
}

impl ExerciseKind {
    pub const ALL: [ExerciseKind; 5] = [
        Self::Bicep,
        Self::Pushup,
        Self::Squat,
        Self::Lunge,
        Self::Shoulder,
    ];

    /// Wire name used in backend query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bicep => "bicep",
            Self::Pushup => "pushup",
            Self::Squat => "squat",
            Self::Lunge => "lunge",
            Self::Shoulder => "shoulder",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Bicep => "Bicep Curls",
            Self::Pushup => "Push-ups",
            Self::Squat => "Squats",
            Self::Lunge => "Lunges",
            Self::Shoulder => "Shoulder Press",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Bicep => "Curl your arms while keeping elbows close to your body",
            Self::Pushup => "Lower your body until chest nearly touches the floor",
            Self::Squat => "Lower your hips as if sitting back into a chair",
            Self::Lunge => "Step forward and lower your hips until both knees are bent at 90°",
            Self::Shoulder => "Raise arms overhead while keeping them straight",
        }
    }
}

impl std::fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExerciseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| format!("unknown exercise '{}'", s.trim()))
    }
}

/// Last reported pose stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Up,
    Down,
    #[default]
    Unknown,
}

impl Stage {
    fn from_wire(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("up") => Self::Up,
            Some("down") => Self::Down,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Unknown => "Ready",
        }
    }
}

/// Result of the most recent backend health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Unknown,
    Connected,
    Error,
}

/// One structurally valid `/exercise_data` snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSample {
    pub reps: u32,
    pub stage: Stage,
    pub feedback: Vec<String>,
    pub symmetry: f64,
    pub angle: f64,
}

impl PoseSample {
    /// Parse a poll response. Returns `None` unless `reps` is a non-negative number;
    /// every other field falls back to its empty value.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let reps = match obj.get("reps")? {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    u32::try_from(u).ok()?
                } else {
                    let f = n.as_f64()?;
                    if !f.is_finite() || f < 0.0 || f > u32::MAX as f64 {
                        return None;
                    }
                    f.trunc() as u32
                }
            }
            _ => return None,
        };

        let feedback = obj
            .get("feedback")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let number = |key: &str| {
            obj.get(key)
                .and_then(Value::as_f64)
                .filter(|f| f.is_finite())
                .unwrap_or(0.0)
        };

        Some(Self {
            reps,
            stage: Stage::from_wire(obj.get("stage")),
            feedback,
            symmetry: number("symmetry"),
            angle: number("angle"),
        })
    }
}

/// Everything the presentation layer can see about the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    /// Fresh for every run that reaches `StartingCamera`.
    pub session_id: Option<Uuid>,
    pub exercise: Option<ExerciseKind>,
    pub rep_count: u32,
    pub stage: Stage,
    /// Current feedback only, not history.
    pub feedback: Vec<String>,
    pub joint_angle: f64,
    pub symmetry_score: f64,
    pub voice_enabled: bool,
    pub last_announced_rep_count: u32,
    pub last_spoken_message: String,
    pub backend_status: BackendStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Last user-visible error, cleared on a successful start.
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(exercise: Option<ExerciseKind>, voice_enabled: bool) -> Self {
        Self {
            phase: Phase::Idle,
            session_id: None,
            exercise,
            rep_count: 0,
            stage: Stage::Unknown,
            feedback: Vec::new(),
            joint_angle: 0.0,
            symmetry_score: 0.0,
            voice_enabled,
            last_announced_rep_count: 0,
            last_spoken_message: String::new(),
            backend_status: BackendStatus::Unknown,
            started_at: None,
            last_error: None,
        }
    }

    /// Zero the counters, sample fields and announcement watermarks.
    pub fn clear_progress(&mut self) {
        self.rep_count = 0;
        self.stage = Stage::Unknown;
        self.feedback.clear();
        self.joint_angle = 0.0;
        self.symmetry_score = 0.0;
        self.last_announced_rep_count = 0;
        self.last_spoken_message.clear();
    }

    /// Overwrite every sample field from a poll response.
    pub fn apply_sample(&mut self, sample: PoseSample) {
        self.rep_count = sample.reps;
        self.stage = sample.stage;
        self.feedback = sample.feedback;
        self.joint_angle = sample.angle;
        self.symmetry_score = sample.symmetry;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(None, false)
    }
}
