//! Area Pilot
//!
//! Control plane between a remote-desktop session and an external agent.
//! Window damage is composited into per-window buffers and published as
//! rate-limited snapshots; an explicit mode state machine decides who may
//! drive pointer and keyboard at any instant, with a kill switch that
//! always hands control back to the human.

pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod mode;
pub mod session;
pub mod sink;
pub mod source;
pub mod transport;

pub use area_pilot_proto as proto;
pub use error::{PilotError, PilotResult};
pub use session::{Session, SessionHandle};
