//! Control request handlers
//!
//! Each handler returns the response data or a [`PilotError`] whose text
//! becomes the failure reason; the caller wraps either in exactly one
//! response.

use area_pilot_proto::{ActionKind, ControlRequest, InputMode, Payload, QueryKind, RequestKind, Value};
use tracing::{debug, info};

use super::meta::payload_value;
use super::Shared;
use crate::error::{PilotError, PilotResult};
use crate::sink::KeyStroke;

const LEFT_BUTTON: u8 = 1;
const RIGHT_BUTTON: u8 = 3;
/// Notches scrolled when an action names no delta
const DEFAULT_SCROLL_DY: i32 = -3;

/// A validated input action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click { x: i32, y: i32, button: u8 },
    DoubleClick { x: i32, y: i32, button: u8 },
    RightClick { x: i32, y: i32 },
    MouseMove { x: i32, y: i32 },
    MouseDown { x: i32, y: i32, button: u8 },
    MouseUp { x: i32, y: i32, button: u8 },
    Scroll { x: i32, y: i32, dx: i32, dy: i32 },
    KeyPress { key: String },
    KeyDown { key: String },
    KeyUp { key: String },
    TypeText { text: String },
    SetClipboard { text: String },
}

impl Action {
    /// Parse an action payload, e.g. `{"action": "click", "x": 10, "y": 20}`
    pub fn from_payload(payload: &Payload) -> PilotResult<Self> {
        let name = optional_str(payload, "action")?.unwrap_or_default();
        let kind: ActionKind = name.parse().map_err(|_| PilotError::UnknownAction(name.to_string()))?;

        let action = match kind {
            ActionKind::Click => Action::Click {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
                button: button(payload)?,
            },
            ActionKind::DoubleClick => Action::DoubleClick {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
                button: button(payload)?,
            },
            ActionKind::RightClick => Action::RightClick {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
            },
            ActionKind::MouseMove => Action::MouseMove {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
            },
            ActionKind::MouseDown => Action::MouseDown {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
                button: button(payload)?,
            },
            ActionKind::MouseUp => Action::MouseUp {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
                button: button(payload)?,
            },
            ActionKind::Scroll => Action::Scroll {
                x: int(payload, "x")?,
                y: int(payload, "y")?,
                dx: optional_int(payload, "dx")?.unwrap_or(0),
                dy: optional_int(payload, "dy")?.unwrap_or(DEFAULT_SCROLL_DY),
            },
            ActionKind::KeyPress => Action::KeyPress { key: string(payload, "key")? },
            ActionKind::KeyDown => Action::KeyDown { key: string(payload, "key")? },
            ActionKind::KeyUp => Action::KeyUp { key: string(payload, "key")? },
            ActionKind::TypeText => Action::TypeText { text: string(payload, "text")? },
            ActionKind::SetClipboard => Action::SetClipboard { text: string(payload, "text")? },
        };
        Ok(action)
    }
}

fn field<'a>(payload: &'a Payload, name: &str) -> Option<&'a Value> {
    payload.get(name).filter(|v| !v.is_nil())
}

fn optional_int(payload: &Payload, name: &str) -> PilotResult<Option<i32>> {
    let Some(value) = field(payload, name) else {
        return Ok(None);
    };
    let n = match value {
        Value::Integer(n) => n.as_i64(),
        Value::F32(f) => Some(f.round() as i64),
        Value::F64(f) => Some(f.round() as i64),
        _ => return Err(PilotError::InvalidPayload(format!("field `{name}` must be a number"))),
    };
    n.and_then(|n| i32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| PilotError::InvalidPayload(format!("field `{name}` is out of range")))
}

fn int(payload: &Payload, name: &str) -> PilotResult<i32> {
    optional_int(payload, name)?.ok_or_else(|| missing(name))
}

fn button(payload: &Payload) -> PilotResult<u8> {
    match optional_int(payload, "button")? {
        None => Ok(LEFT_BUTTON),
        Some(n) => u8::try_from(n)
            .ok()
            .filter(|&b| b > 0)
            .ok_or_else(|| PilotError::InvalidPayload(format!("invalid button {n}"))),
    }
}

fn optional_str<'a>(payload: &'a Payload, name: &str) -> PilotResult<Option<&'a str>> {
    match field(payload, name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| PilotError::InvalidPayload(format!("field `{name}` must be a string"))),
    }
}

fn string(payload: &Payload, name: &str) -> PilotResult<String> {
    optional_str(payload, name)?
        .map(str::to_string)
        .ok_or_else(|| missing(name))
}

fn optional_wid(payload: &Payload) -> PilotResult<Option<u32>> {
    match optional_int(payload, "wid")? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| PilotError::InvalidPayload(format!("invalid window id {n}"))),
    }
}

fn missing(name: &str) -> PilotError {
    PilotError::InvalidPayload(format!("missing field `{name}`"))
}

fn map(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    payload_value(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

impl Shared {
    /// Route a decoded request to its handler
    pub(super) async fn dispatch(&self, request: &ControlRequest) -> PilotResult<Option<Value>> {
        let kind = request
            .kind()
            .map_err(|_| PilotError::UnknownRequestKind(request.request_type.clone()))?;
        match kind {
            RequestKind::Action => self.handle_action(&request.payload).await.map(|()| None),
            RequestKind::Query => self.handle_query(&request.payload).await.map(Some),
            RequestKind::Mode => self.handle_mode_change(&request.payload).map(Some),
        }
    }

    fn ensure_authority(&self) -> PilotResult<()> {
        if self.gate.agent_may_act() {
            Ok(())
        } else {
            Err(PilotError::AuthorityDenied(self.gate.mode()))
        }
    }

    async fn handle_action(&self, payload: &Payload) -> PilotResult<()> {
        self.ensure_authority()?;
        let action = Action::from_payload(payload)?;
        debug!("Performing {:?}", action);
        let sink = &self.sink;

        match action {
            Action::Click { x, y, button } => sink.click(x, y, button).await?,
            Action::DoubleClick { x, y, button } => {
                sink.click(x, y, button).await?;
                // Authority may have been revoked between the two clicks
                self.ensure_authority()?;
                sink.click(x, y, button).await?;
            }
            Action::RightClick { x, y } => sink.click(x, y, RIGHT_BUTTON).await?,
            Action::MouseMove { x, y } => sink.move_pointer(x, y).await?,
            Action::MouseDown { x, y, button } => sink.button(x, y, button, true).await?,
            Action::MouseUp { x, y, button } => sink.button(x, y, button, false).await?,
            Action::Scroll { x, y, dx, dy } => sink.scroll(x, y, dx, dy).await?,
            Action::KeyPress { key } => sink.key(&key, KeyStroke::Tap).await?,
            Action::KeyDown { key } => sink.key(&key, KeyStroke::Down).await?,
            Action::KeyUp { key } => sink.key(&key, KeyStroke::Up).await?,
            Action::TypeText { text } => sink.type_text(&text).await?,
            Action::SetClipboard { text } => sink.set_clipboard(&text).await?,
        }
        Ok(())
    }

    async fn handle_query(&self, payload: &Payload) -> PilotResult<Value> {
        let name = optional_str(payload, "query")?.unwrap_or_default();
        let query: QueryKind = name.parse().map_err(|_| PilotError::UnknownQuery(name.to_string()))?;

        match query {
            QueryKind::WindowList => {
                let windows = self.windows.lock();
                Ok(Value::Array(windows.windows().iter().map(|w| w.to_value()).collect()))
            }
            QueryKind::WindowInfo => {
                let wid = optional_wid(payload)?.ok_or_else(|| missing("wid"))?;
                self.windows
                    .lock()
                    .get(wid)
                    .map(|w| w.to_value())
                    .ok_or(PilotError::UnknownWindow(wid))
            }
            QueryKind::FocusedWindow => {
                let windows = self.windows.lock();
                let focused = windows.focused();
                let meta = focused
                    .and_then(|wid| windows.get(wid))
                    .map(|w| w.to_value())
                    .unwrap_or(Value::Nil);
                Ok(map([("wid", Value::from(focused.unwrap_or(0))), ("meta", meta)]))
            }
            QueryKind::Clipboard => {
                let text = self.sink.get_clipboard().await?;
                Ok(map([("text", Value::from(text))]))
            }
            QueryKind::Screenshot => {
                let wid = match optional_wid(payload)? {
                    Some(wid) => wid,
                    None => self.windows.lock().focused().ok_or_else(|| missing("wid"))?,
                };
                let snapshot = self.registry.snapshot_now(wid, self.settings).await?;
                Ok(map([
                    ("wid", Value::from(wid)),
                    ("format", Value::from(self.settings.format.as_str())),
                    ("width", Value::from(snapshot.width)),
                    ("height", Value::from(snapshot.height)),
                    ("sequence", Value::from(snapshot.sequence)),
                    ("data", Value::Binary(snapshot.data)),
                ]))
            }
            QueryKind::CurrentMode => Ok(map([("mode", Value::from(self.gate.mode().as_str()))])),
        }
    }

    fn handle_mode_change(&self, payload: &Payload) -> PilotResult<Value> {
        let name = optional_str(payload, "mode")?.unwrap_or_default();
        let mode: InputMode = name.parse().map_err(|_| PilotError::InvalidMode(name.to_string()))?;
        let transition = self.gate.change_mode(mode);
        info!("Mode change requested by agent: {} -> {}", transition.from, transition.to);
        Ok(map([("mode", Value::from(mode.as_str()))]))
    }
}
