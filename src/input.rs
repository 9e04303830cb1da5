//! Human input events as reported by the host
//!
//! The host adapter translates its native pointer/key packets into
//! [`HumanInput`] and asks the session whether each one may reach the
//! desktop.

use std::time::Instant;

/// Verdict for a human input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Forward the event to the host
    Pass,
    /// Drop the event
    Suppress,
}

impl FilterStatus {
    pub fn is_suppressed(self) -> bool {
        self == FilterStatus::Suppress
    }
}

/// What the human did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    PointerMotion { x: i32, y: i32 },
    PointerButton { x: i32, y: i32, button: u8, pressed: bool },
    Key {
        /// Key name as the host reports it, e.g. "Pause" or "a"
        name: String,
        pressed: bool,
        /// Active modifier names, e.g. ["control", "shift"]
        modifiers: Vec<String>,
    },
}

/// A human input event with the time it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanInput {
    pub kind: InputKind,
    pub at: Instant,
}

impl HumanInput {
    pub fn new(kind: InputKind) -> Self {
        Self {
            kind,
            at: Instant::now(),
        }
    }

    /// A key press observed now
    pub fn key_press(name: impl Into<String>, modifiers: &[&str]) -> Self {
        Self::new(InputKind::Key {
            name: name.into(),
            pressed: true,
            modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
        })
    }

    pub fn pointer_motion(x: i32, y: i32) -> Self {
        Self::new(InputKind::PointerMotion { x, y })
    }

    /// Same event, observed at `at`
    pub fn at(mut self, at: Instant) -> Self {
        self.at = at;
        self
    }
}
