//! Text-to-speech capability.

use std::io::ErrorKind;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::error::SpeechError;

/// A voice the synthesizer offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// BCP-47 style tag, e.g. `en-US`.
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Fixed delivery parameters for announcements.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    /// Substring matched against `Voice::lang` when choosing a voice.
    pub preferred_lang: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
            volume: 0.8,
            preferred_lang: "en".to_string(),
        }
    }
}

/// One thing to say.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub voice: Option<Voice>,
}

impl Utterance {
    /// Build an utterance, picking the first voice whose language matches the preference.
    pub fn new(text: impl Into<String>, settings: &VoiceSettings, voices: &[Voice]) -> Self {
        let voice = voices
            .iter()
            .find(|v| v.lang.contains(settings.preferred_lang.as_str()))
            .cloned();
        Self {
            text: text.into(),
            rate: settings.rate,
            pitch: settings.pitch,
            volume: settings.volume,
            voice,
        }
    }
}

/// Non-blocking speech output. `speak` starts speaking and returns; `cancel`
/// silences whatever is currently being spoken.
pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<Voice>;

    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError>;

    fn cancel(&self);
}

// ── Console ─────────────────────────────────────────────────────────

/// Writes announcements to stderr instead of speaking them.
pub struct ConsoleSpeech;

impl SpeechSynthesizer for ConsoleSpeech {
    fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("console", "en-US")]
    }

    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        eprintln!("🔊 {}", utterance.text);
        Ok(())
    }

    fn cancel(&self) {}
}

// ── External program ────────────────────────────────────────────────

/// Speaks through an espeak-compatible program (`-s` words per minute,
/// `-p` pitch, `-a` amplitude, `-v` voice).
pub struct CommandSpeech {
    program: String,
    voices: Vec<Voice>,
    current: Mutex<Option<Child>>,
    /// Killed children that had not exited yet; reaped on the next `speak`.
    killed: Mutex<Vec<Child>>,
}

/// espeak defaults that a rate/pitch/volume of 1.0 maps onto.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const BASE_AMPLITUDE: f32 = 100.0;

impl CommandSpeech {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            voices: vec![Voice::new("en", "en")],
            current: Mutex::new(None),
            killed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_voices(mut self, voices: Vec<Voice>) -> Self {
        self.voices = voices;
        self
    }

    fn args(utterance: &Utterance) -> Vec<String> {
        let mut args = vec![
            "-s".to_string(),
            format!("{}", (utterance.rate * BASE_WORDS_PER_MINUTE).round() as u32),
            "-p".to_string(),
            format!("{}", (utterance.pitch * BASE_PITCH).clamp(0.0, 99.0).round() as u32),
            "-a".to_string(),
            format!("{}", (utterance.volume * BASE_AMPLITUDE).clamp(0.0, 200.0).round() as u32),
        ];
        if let Some(voice) = &utterance.voice {
            args.push("-v".to_string());
            args.push(voice.name.clone());
        }
        // Feedback text may start with '-'.
        args.push("--".to_string());
        args.push(utterance.text.clone());
        args
    }

    /// Drop killed children that have exited since they were cancelled.
    fn reap(&self) {
        self.killed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }
}

impl SpeechSynthesizer for CommandSpeech {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        self.cancel();
        self.reap();

        let child = Command::new(&self.program)
            .args(Self::args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SpeechError::Unsupported(format!(
                    "{} is not installed",
                    self.program
                )),
                _ => SpeechError::Failed(e.to_string()),
            })?;

        debug!(pid = child.id(), text = %utterance.text, "Speaking");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        Ok(())
    }

    fn cancel(&self) {
        let child = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            // Already-finished children just report an error here.
            let _ = child.kill();
            if let Ok(None) = child.try_wait() {
                self.killed
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(child);
            }
        }
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.cancel();
        let killed = self.killed.get_mut().unwrap_or_else(|e| e.into_inner());
        for mut child in killed.drain(..) {
            let _ = child.wait();
        }
    }
}
