//! Window metadata tracking for the session

use area_pilot_proto::{Payload, Value};
use std::collections::HashMap;

use crate::source::{Geometry, WindowDescriptor};

/// Information about a tracked window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub wid: u32,
    pub title: String,
    pub class: String,
    pub geometry: Geometry,
    pub pid: u32,
}

impl WindowInfo {
    pub fn new(wid: u32, window: WindowDescriptor) -> Self {
        Self {
            wid,
            title: window.title,
            class: window.class,
            geometry: window.geometry,
            pid: window.pid,
        }
    }

    /// Key/value form used in events and query results
    pub fn to_payload(&self) -> Payload {
        let g = self.geometry;
        [
            ("wid", Value::from(self.wid)),
            ("title", Value::from(self.title.as_str())),
            ("wm_class", Value::from(self.class.as_str())),
            ("x", Value::from(g.x)),
            ("y", Value::from(g.y)),
            ("width", Value::from(g.width)),
            ("height", Value::from(g.height)),
            ("pid", Value::from(self.pid)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    pub fn to_value(&self) -> Value {
        payload_value(self.to_payload())
    }
}

/// Convert a payload map into a single msgpack value
pub fn payload_value(payload: Payload) -> Value {
    Value::Map(payload.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
}

/// Window catalog
///
/// Tracks metadata in creation order and which window has focus. Focus may
/// name a window the catalog has not seen yet.
#[derive(Debug, Default)]
pub struct WindowCatalog {
    windows: HashMap<u32, WindowInfo>,
    order: Vec<u32>,
    focused: Option<u32>,
}

impl WindowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window, replacing stale metadata for a reused ID
    pub fn insert(&mut self, info: WindowInfo) {
        let wid = info.wid;
        if self.windows.insert(wid, info).is_none() {
            self.order.push(wid);
        }
    }

    pub fn remove(&mut self, wid: u32) -> Option<WindowInfo> {
        let info = self.windows.remove(&wid)?;
        self.order.retain(|&id| id != wid);
        if self.focused == Some(wid) {
            self.focused = None;
        }
        Some(info)
    }

    pub fn resize(&mut self, wid: u32, width: u32, height: u32) {
        if let Some(win) = self.windows.get_mut(&wid) {
            win.geometry.width = width;
            win.geometry.height = height;
        }
    }

    pub fn retitle(&mut self, wid: u32, title: String) {
        if let Some(win) = self.windows.get_mut(&wid) {
            win.title = title;
        }
    }

    pub fn set_focus(&mut self, wid: Option<u32>) {
        self.focused = wid;
    }

    pub fn focused(&self) -> Option<u32> {
        self.focused
    }

    pub fn is_focused(&self, wid: u32) -> bool {
        self.focused == Some(wid)
    }

    pub fn get(&self, wid: u32) -> Option<&WindowInfo> {
        self.windows.get(&wid)
    }

    /// All windows in creation order
    pub fn windows(&self) -> Vec<&WindowInfo> {
        self.order.iter().filter_map(|id| self.windows.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
        self.order.clear();
        self.focused = None;
    }
}
