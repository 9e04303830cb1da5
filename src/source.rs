//! Host event source
//!
//! A host adapter (the remote-desktop server integration) translates its
//! native notifications into these calls. The session implements
//! [`HostCallbacks`]; it never reaches into host internals.

use crate::input::{FilterStatus, HumanInput};

/// Window position and size in desktop coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Damage for one window; `data` is encoded according to `encoding`
#[derive(Debug, Clone, Copy)]
pub struct Region<'a> {
    pub wid: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub encoding: &'a str,
    pub data: &'a [u8],
}

/// What the host knows about a newly mapped window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowDescriptor {
    pub title: String,
    /// WM_CLASS instance
    pub class: String,
    pub geometry: Geometry,
    /// Owning process, 0 if unknown
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowLifecycle {
    Created { wid: u32, window: WindowDescriptor },
    Destroyed { wid: u32 },
    Resized { wid: u32, width: u32, height: u32 },
    Retitled { wid: u32, title: String },
    IconChanged { wid: u32, width: u32, height: u32 },
}

/// Notifications a host adapter delivers to the session
///
/// Calls may arrive from any thread and are not ordered relative to
/// publishing or request handling; damage for one window arrives in order.
pub trait HostCallbacks: Send + Sync {
    fn on_region(&self, region: Region<'_>);

    fn on_window_lifecycle(&self, event: WindowLifecycle);

    /// Focus moved to `wid`, or to no tracked window
    fn on_focus(&self, wid: Option<u32>);

    /// Decide whether a human input event reaches the desktop
    fn on_input(&self, input: &HumanInput) -> FilterStatus;

    fn on_clipboard(&self, text: String);
}
