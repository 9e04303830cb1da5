//! Area Pilot Protocol
//!
//! Shared message types for communication between `area-pilot` (the control
//! plane running next to the desktop session) and the agent driving it.
//!
//! Four record shapes travel over three channels:
//! - [`FrameMessage`] on the frame channel (pub/sub)
//! - [`EventMessage`] on the event channel (pub/sub)
//! - [`ControlRequest`] / [`ControlResponse`] on the control channel (req/rep)

pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{decode, encode, DecodeError, EncodeError, FramedMessage, Message, MessageKind, WireMessage};
pub use rmpv::Value;

/// Free-form key/value payload carried by events and control messages
pub type Payload = BTreeMap<String, Value>;

/// Default socket path for one of the control plane channels
pub fn socket_path(channel: &str) -> PathBuf {
    let runtime_dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    runtime_dir.join(format!("area-pilot-{channel}.sock"))
}

/// Seconds since the Unix epoch, as carried in message timestamps
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Raised when a string does not name a known enumerated value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

/// Declares a snake_case string enum with `as_str`, `Display` and `FromStr`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Every value, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire representation
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        what: $what,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Who currently holds input authority
    InputMode, "mode" {
        /// Human has exclusive authority
        Observer => "observer",
        /// Agent may act, human input always passes through
        Supervised => "supervised",
        /// Agent has exclusive authority, human input is suppressed
        Autonomous => "autonomous",
        /// Both may act, human input opens a priority window
        Collaborative => "collaborative",
    }
}

wire_enum! {
    /// Window lifecycle and system events
    EventKind, "event kind" {
        WindowCreate => "window_create",
        WindowDestroy => "window_destroy",
        WindowFocus => "window_focus",
        WindowResize => "window_resize",
        WindowTitle => "window_title",
        WindowIcon => "window_icon",
        ModeChange => "mode_change",
        ClipboardUpdate => "clipboard_update",
        KillSwitch => "kill_switch",
    }
}

wire_enum! {
    /// Input actions the agent can request
    ActionKind, "action" {
        Click => "click",
        DoubleClick => "double_click",
        RightClick => "right_click",
        MouseMove => "mouse_move",
        MouseDown => "mouse_down",
        MouseUp => "mouse_up",
        Scroll => "scroll",
        KeyPress => "key_press",
        KeyDown => "key_down",
        KeyUp => "key_up",
        TypeText => "type_text",
        SetClipboard => "set_clipboard",
    }
}

wire_enum! {
    /// Read-only state queries
    QueryKind, "query" {
        WindowList => "window_list",
        WindowInfo => "window_info",
        FocusedWindow => "focused_window",
        Clipboard => "clipboard",
        Screenshot => "screenshot",
        CurrentMode => "current_mode",
    }
}

wire_enum! {
    /// Control request families
    RequestKind, "request type" {
        Action => "action",
        Query => "query",
        Mode => "mode",
    }
}

// ============================================================================
// Frame Messages (pub/sub)
// ============================================================================

/// An encoded window snapshot delivered to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Window ID
    pub wid: u32,
    /// Region offset X
    #[serde(default)]
    pub x: i32,
    /// Region offset Y
    #[serde(default)]
    pub y: i32,
    /// Region width of the encoded image
    pub width: u32,
    /// Region height of the encoded image
    pub height: u32,
    /// Encoding tag: "jpeg", "png" or "raw"
    pub format: String,
    /// Encoded image bytes
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Capture time, seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub window_class: String,
    #[serde(default)]
    pub is_focused: bool,
    /// Per-window snapshot counter
    #[serde(default)]
    pub sequence: u64,
}

// ============================================================================
// Event Messages (pub/sub)
// ============================================================================

/// A window or system event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_type: EventKind,
    /// Window ID, 0 for system-scoped events
    #[serde(default)]
    pub wid: u32,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub data: Payload,
}

impl EventMessage {
    /// Create an event stamped with the current time
    pub fn new(event_type: EventKind, wid: u32, data: Payload) -> Self {
        Self {
            event_type,
            wid,
            timestamp: unix_timestamp(),
            data,
        }
    }
}

// ============================================================================
// Control Messages (req/rep)
// ============================================================================

/// A request from the agent to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// "action", "query" or "mode"; kept as text so unknown kinds still
    /// decode and can be answered with the caller's request id
    pub request_type: String,
    #[serde(default)]
    pub payload: Payload,
    /// Opaque identifier echoed in the response
    #[serde(default)]
    pub request_id: String,
}

impl ControlRequest {
    pub fn new(kind: RequestKind, payload: Payload) -> Self {
        Self {
            request_type: kind.as_str().to_string(),
            payload,
            request_id: String::new(),
        }
    }

    /// Build an action request; `args` are merged next to the `action` key
    pub fn action(action: ActionKind, args: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        let mut payload = collect_payload(args);
        payload.insert("action".into(), Value::from(action.as_str()));
        Self::new(RequestKind::Action, payload)
    }

    /// Build a query request
    pub fn query(query: QueryKind, args: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        let mut payload = collect_payload(args);
        payload.insert("query".into(), Value::from(query.as_str()));
        Self::new(RequestKind::Query, payload)
    }

    /// Build a mode change request
    pub fn mode_change(mode: InputMode) -> Self {
        let mut payload = Payload::new();
        payload.insert("mode".into(), Value::from(mode.as_str()));
        Self::new(RequestKind::Mode, payload)
    }

    /// Attach a request id
    pub fn with_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Parse the request family
    pub fn kind(&self) -> Result<RequestKind, UnknownVariant> {
        self.request_type.parse()
    }
}

fn collect_payload(args: impl IntoIterator<Item = (&'static str, Value)>) -> Payload {
    args.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// A response from the control plane to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "data_is_absent")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A nil result decodes as `None`, so it is never written either
fn data_is_absent(data: &Option<Value>) -> bool {
    matches!(data, None | Some(Value::Nil))
}

impl ControlResponse {
    /// Successful response with an optional result payload
    pub fn ok(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            request_id: request_id.into(),
            data: data.filter(|v| !v.is_nil()),
            error: None,
        }
    }

    /// Failed response; `error` is always non-empty on the wire
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "request failed".to_string();
        }
        Self {
            success: false,
            request_id: request_id.into(),
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        let names: Vec<_> = InputMode::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, ["observer", "supervised", "autonomous", "collaborative"]);
        assert_eq!("collaborative".parse::<InputMode>(), Ok(InputMode::Collaborative));
        assert!("Observer".parse::<InputMode>().is_err());
        assert!("god".parse::<InputMode>().is_err());
    }

    #[test]
    fn test_make_mode_change() {
        let req = ControlRequest::mode_change(InputMode::Autonomous);
        assert_eq!(req.kind(), Ok(RequestKind::Mode));
        assert_eq!(req.payload["mode"].as_str(), Some("autonomous"));
    }

    #[test]
    fn test_make_action() {
        let req = ControlRequest::action(
            ActionKind::Click,
            [("x", Value::from(100)), ("y", Value::from(200))],
        )
        .with_id("req-7");
        assert_eq!(req.request_type, "action");
        assert_eq!(req.payload["action"].as_str(), Some("click"));
        assert_eq!(req.payload["x"].as_i64(), Some(100));
        assert_eq!(req.request_id, "req-7");
    }

    #[test]
    fn test_make_query() {
        let req = ControlRequest::query(QueryKind::WindowList, []);
        assert_eq!(req.kind(), Ok(RequestKind::Query));
        assert_eq!(req.payload["query"].as_str(), Some("window_list"));
    }

    #[test]
    fn test_unknown_request_type() {
        let req = ControlRequest {
            request_type: "reboot".into(),
            payload: Payload::new(),
            request_id: "x".into(),
        };
        assert!(req.kind().is_err());
    }

    #[test]
    fn test_failure_never_empty() {
        let resp = ControlResponse::failure("id", "");
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("request failed"));
    }

    #[test]
    fn test_nil_data_is_absent() {
        let resp = ControlResponse::ok("r", Some(Value::Nil));
        assert_eq!(resp.data, None);

        // Built by hand, a nil result still stays off the wire
        let manual = ControlResponse {
            data: Some(Value::Nil),
            ..ControlResponse::ok("r", None)
        };
        let first = codec::encode(&manual).unwrap();
        let decoded: ControlResponse = codec::decode(&first).unwrap();
        assert_eq!(decoded.data, None);
        assert_eq!(codec::encode(&decoded).unwrap(), first);
    }
}
