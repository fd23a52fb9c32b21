//! Exercise session: state, announcements and the controller that drives them.

pub mod announce;
pub mod controller;
pub mod state;

pub use controller::SessionController;
pub use state::{BackendStatus, ExerciseKind, Phase, PoseSample, SessionState, Stage};
