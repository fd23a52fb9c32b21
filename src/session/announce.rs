//! Voice announcements derived from state deltas.

use super::state::{Phase, SessionState};

/// Feedback containing any of these is praise, not a correction, and is not read aloud.
pub const CELEBRATION_MARKERS: [&str; 3] = ["💪", "🔥", "🎯"];

pub fn rep_announcement(reps: u32) -> String {
    format!("Rep {reps} completed! Good job!")
}

fn is_celebration(message: &str) -> bool {
    CELEBRATION_MARKERS.iter().any(|m| message.contains(m))
}

/// Compare the state against its watermarks and return what should be spoken,
/// in order. Watermarks are advanced for everything returned.
pub fn take_announcements(state: &mut SessionState) -> Vec<String> {
    let mut out = Vec::new();
    if !state.voice_enabled || state.phase != Phase::Active {
        return out;
    }

    if state.rep_count > state.last_announced_rep_count {
        out.push(rep_announcement(state.rep_count));
        state.last_announced_rep_count = state.rep_count;
    }

    if let Some(first) = state.feedback.first() {
        if *first != state.last_spoken_message && !is_celebration(first) {
            out.push(first.clone());
            state.last_spoken_message = first.clone();
        }
    }

    out
}
