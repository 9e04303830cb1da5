//! Input authority gate
//!
//! Holds the current [`InputMode`], decides whether human input reaches the
//! desktop and whether the agent may act, and owns the kill switch. Every
//! read and write goes through one lock, so a transition is never observed
//! half-applied and transitions are reported in the order they happened.

use area_pilot_proto::InputMode;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::input::{FilterStatus, HumanInput, InputKind};

/// Why the mode changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Explicit mode-change request
    Requested,
    /// Kill switch key combination
    KillSwitch,
    /// Autonomous mode outlived its configured timeout
    AutonomousTimeout,
}

/// A mode change that has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: InputMode,
    pub to: InputMode,
    pub cause: TransitionCause,
}

/// Notified of every transition while the gate lock is held
///
/// Implementations must not block and must not call back into the gate.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &ModeTransition);
}

/// Reserved key combination, e.g. `ctrl+Pause`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitch {
    /// Lowercased key name
    key: String,
    /// Lowercased, normalised modifier names
    modifiers: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kill switch combination {0:?}")]
pub struct KillSwitchParseError(String);

impl KillSwitch {
    /// Whether a key event is this combination
    ///
    /// Key names compare case-insensitively; the event may carry extra
    /// modifiers beyond the required ones.
    pub fn matches(&self, name: &str, active: &[String]) -> bool {
        if !name.eq_ignore_ascii_case(&self.key) {
            return false;
        }
        let active: BTreeSet<String> = active.iter().map(|m| normalize_modifier(m)).collect();
        self.modifiers.is_subset(&active)
    }
}

fn normalize_modifier(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "control" | "control_l" | "control_r" => "ctrl".to_string(),
        "alt_l" | "alt_r" => "alt".to_string(),
        "shift_l" | "shift_r" => "shift".to_string(),
        _ => lower,
    }
}

impl FromStr for KillSwitch {
    type Err = KillSwitchParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts.pop().filter(|k| !k.is_empty());
        let Some(key) = key else {
            return Err(KillSwitchParseError(s.to_string()));
        };
        if parts.iter().any(|m| m.is_empty()) {
            return Err(KillSwitchParseError(s.to_string()));
        }
        Ok(Self {
            key: key.to_ascii_lowercase(),
            modifiers: parts.into_iter().map(normalize_modifier).collect(),
        })
    }
}

impl fmt::Display for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modifiers {
            write!(f, "{m}+")?;
        }
        f.write_str(&self.key)
    }
}

#[derive(Debug)]
struct GateState {
    mode: InputMode,
    /// Latest human input seen in collaborative mode
    last_human_input: Option<Instant>,
    /// When the mode last entered autonomous
    autonomous_since: Option<Instant>,
}

/// Mode state machine plus the two authority decisions
pub struct ModeGate {
    state: Mutex<GateState>,
    kill_switch: KillSwitch,
    human_priority: Duration,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl fmt::Debug for ModeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeGate")
            .field("state", &*self.state.lock())
            .field("kill_switch", &self.kill_switch)
            .field("human_priority", &self.human_priority)
            .finish_non_exhaustive()
    }
}

impl ModeGate {
    pub fn new(initial: InputMode, kill_switch: KillSwitch, human_priority: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(GateState {
                mode: initial,
                last_human_input: None,
                autonomous_since: (initial == InputMode::Autonomous).then_some(now),
            }),
            kill_switch,
            human_priority,
            listener: None,
        }
    }

    /// Report transitions to `listener`
    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn mode(&self) -> InputMode {
        self.state.lock().mode
    }

    pub fn autonomous_since(&self) -> Option<Instant> {
        self.state.lock().autonomous_since
    }

    pub fn kill_switch_combo(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Set the mode unconditionally
    pub fn change_mode(&self, target: InputMode) -> ModeTransition {
        let mut state = self.state.lock();
        self.transition(&mut state, target, TransitionCause::Requested, Instant::now())
    }

    /// Force observer mode from any state
    pub fn kill_switch(&self) -> ModeTransition {
        let mut state = self.state.lock();
        self.transition(&mut state, InputMode::Observer, TransitionCause::KillSwitch, Instant::now())
    }

    /// Decide whether a human input event must be dropped
    ///
    /// The kill switch combination always passes, after forcing observer
    /// mode. Everything else is suppressed only in autonomous mode; in
    /// collaborative mode the event opens the human priority window.
    pub fn should_suppress_human_input(&self, input: &HumanInput) -> FilterStatus {
        let mut state = self.state.lock();

        if let InputKind::Key {
            name,
            pressed: true,
            modifiers,
        } = &input.kind
        {
            if self.kill_switch.matches(name, modifiers) {
                self.transition(&mut state, InputMode::Observer, TransitionCause::KillSwitch, input.at);
                return FilterStatus::Pass;
            }
        }

        match state.mode {
            InputMode::Autonomous => FilterStatus::Suppress,
            InputMode::Collaborative => {
                state.last_human_input = Some(match state.last_human_input {
                    Some(prev) if prev > input.at => prev,
                    _ => input.at,
                });
                FilterStatus::Pass
            }
            InputMode::Observer | InputMode::Supervised => FilterStatus::Pass,
        }
    }

    /// Whether the agent may inject input right now
    pub fn agent_may_act(&self) -> bool {
        self.agent_may_act_at(Instant::now())
    }

    pub fn agent_may_act_at(&self, now: Instant) -> bool {
        let state = self.state.lock();
        match state.mode {
            InputMode::Autonomous | InputMode::Supervised => true,
            InputMode::Collaborative => match state.last_human_input {
                Some(last) => now.saturating_duration_since(last) > self.human_priority,
                None => true,
            },
            InputMode::Observer => false,
        }
    }

    /// Revert autonomous mode to observer once it has lasted `timeout`
    pub fn expire_autonomous(&self, timeout: Duration, now: Instant) -> Option<ModeTransition> {
        let mut state = self.state.lock();
        let since = state.autonomous_since?;
        if state.mode != InputMode::Autonomous || now.saturating_duration_since(since) < timeout {
            return None;
        }
        Some(self.transition(&mut state, InputMode::Observer, TransitionCause::AutonomousTimeout, now))
    }

    fn transition(&self, state: &mut GateState, to: InputMode, cause: TransitionCause, now: Instant) -> ModeTransition {
        let transition = ModeTransition {
            from: state.mode,
            to,
            cause,
        };
        state.mode = to;
        if to == InputMode::Autonomous {
            state.autonomous_since = Some(now);
        }

        match cause {
            TransitionCause::KillSwitch => warn!("KILL SWITCH activated: {} -> {}", transition.from, to),
            TransitionCause::AutonomousTimeout => info!("Autonomous mode timed out: {} -> {}", transition.from, to),
            TransitionCause::Requested => info!("Mode changed: {} -> {}", transition.from, to),
        }

        if let Some(listener) = &self.listener {
            listener.on_transition(&transition);
        }
        transition
    }
}
