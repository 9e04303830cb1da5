use super::*;
use area_pilot_proto::{ActionKind, QueryKind};
use async_trait::async_trait;
use std::time::Duration;

use crate::sink::{InjectionError, KeyStroke};
use crate::source::{Geometry, WindowDescriptor};
use crate::transport::{self, ClientChannels};

/// Records every injected call; fails all of them when `failure` is set
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<String>>,
    failure: Option<String>,
}

impl RecordingSink {
    fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    fn record(&self, call: String) -> Result<(), InjectionError> {
        if let Some(message) = &self.failure {
            return Err(InjectionError::new(message.clone()));
        }
        self.calls.lock().push(call);
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl InjectionSink for RecordingSink {
    async fn click(&self, x: i32, y: i32, button: u8) -> Result<(), InjectionError> {
        self.record(format!("click {x} {y} {button}"))
    }

    async fn move_pointer(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.record(format!("move {x} {y}"))
    }

    async fn button(&self, x: i32, y: i32, button: u8, pressed: bool) -> Result<(), InjectionError> {
        self.record(format!("button {x} {y} {button} {pressed}"))
    }

    async fn scroll(&self, x: i32, y: i32, dx: i32, dy: i32) -> Result<(), InjectionError> {
        self.record(format!("scroll {x} {y} {dx} {dy}"))
    }

    async fn key(&self, key: &str, stroke: KeyStroke) -> Result<(), InjectionError> {
        self.record(format!("key {key} {stroke:?}"))
    }

    async fn type_text(&self, text: &str) -> Result<(), InjectionError> {
        self.record(format!("type {text}"))
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), InjectionError> {
        self.record(format!("set_clipboard {text}"))
    }

    async fn get_clipboard(&self) -> Result<String, InjectionError> {
        self.record("get_clipboard".into())?;
        Ok("copied".into())
    }
}

fn raw_config() -> Config {
    let mut config = Config::default();
    config.capture.format = "raw".into();
    config
}

fn start(config: Config, sink: RecordingSink) -> (Session, ClientChannels, Arc<RecordingSink>) {
    let (channels, client) = transport::in_process(&config.channels);
    let sink = Arc::new(sink);
    let session = Session::new(&config, channels, sink.clone()).unwrap();
    (session, client, sink)
}

fn click(x: i64, y: i64) -> ControlRequest {
    ControlRequest::action(ActionKind::Click, [("x", Value::from(x)), ("y", Value::from(y))])
}

fn window(title: &str, width: u32, height: u32) -> WindowDescriptor {
    WindowDescriptor {
        title: title.into(),
        class: "xterm".into(),
        geometry: Geometry {
            x: 5,
            y: 6,
            width,
            height,
        },
        pid: 1234,
    }
}

fn create(handle: &SessionHandle, wid: u32, width: u32, height: u32) {
    handle.on_window_lifecycle(WindowLifecycle::Created {
        wid,
        window: window("term", width, height),
    });
}

fn damage(handle: &SessionHandle, wid: u32) {
    handle.on_region(Region {
        wid,
        x: 0,
        y: 0,
        width: 1,
        height: 1,
        encoding: "rgb24",
        data: &[255, 0, 0],
    });
}

fn drain_events(client: &mut ClientChannels) -> Vec<EventMessage> {
    std::iter::from_fn(|| client.events.try_recv()).collect()
}

fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

#[tokio::test]
async fn test_action_denied_in_observer() {
    let (session, _client, sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();

    let response = handle.handle_request(&click(10, 20).with_id("a-1")).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "a-1");
    assert_eq!(response.error.as_deref(), Some("AI cannot act in mode: observer"));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_actions_reach_sink_in_supervised() {
    let (session, _client, sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();
    assert!(handle.handle_request(&ControlRequest::mode_change(InputMode::Supervised)).await.success);

    assert!(handle.handle_request(&click(10, 20)).await.success);
    let double = ControlRequest::action(ActionKind::DoubleClick, [("x", Value::from(1)), ("y", Value::from(2))]);
    assert!(handle.handle_request(&double).await.success);
    let right = ControlRequest::action(ActionKind::RightClick, [("x", Value::from(3)), ("y", Value::from(4))]);
    assert!(handle.handle_request(&right).await.success);
    let keys = ControlRequest::action(ActionKind::KeyDown, [("key", Value::from("shift"))]);
    assert!(handle.handle_request(&keys).await.success);
    let text = ControlRequest::action(ActionKind::TypeText, [("text", Value::from("hello"))]);
    assert!(handle.handle_request(&text).await.success);

    assert_eq!(
        sink.calls(),
        [
            "click 10 20 1",
            "click 1 2 1",
            "click 1 2 1",
            "click 3 4 3",
            "key shift Down",
            "type hello",
        ]
    );
}

#[tokio::test]
async fn test_collaborative_human_input_blocks_agent() {
    let mut config = raw_config();
    config.control.mode = "collaborative".into();
    let (session, _client, sink) = start(config, RecordingSink::default());
    let handle = session.handle();

    assert_eq!(handle.on_input(&HumanInput::pointer_motion(1, 1)), FilterStatus::Pass);
    let response = handle.handle_request(&click(1, 1)).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("collaborative"));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_action_is_a_failure() {
    let mut config = raw_config();
    config.control.mode = "autonomous".into();
    let (session, _client, sink) = start(config, RecordingSink::default());
    let handle = session.handle();

    let request = ControlRequest::action(ActionKind::Click, [("x", Value::from(1))]).with_id("m");
    let response = handle.handle_request(&request).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "m");
    assert_eq!(response.error.as_deref(), Some("invalid payload: missing field `y`"));

    let mut unknown = ControlRequest::action(ActionKind::Click, []);
    unknown.payload.insert("action".into(), Value::from("teleport"));
    let response = handle.handle_request(&unknown).await;
    assert_eq!(response.error.as_deref(), Some("Unknown action: \"teleport\""));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_sink_failure_text_is_returned() {
    let mut config = raw_config();
    config.control.mode = "supervised".into();
    let (session, _client, _sink) = start(config, RecordingSink::failing("cannot open display"));
    let handle = session.handle();

    let response = handle.handle_request(&click(1, 1)).await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("cannot open display"));
}

#[tokio::test]
async fn test_window_queries() {
    let (session, _client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();
    create(&handle, 7, 100, 50);
    handle.on_focus(Some(7));

    let info = handle
        .handle_request(&ControlRequest::query(QueryKind::WindowInfo, [("wid", Value::from(7))]))
        .await;
    assert!(info.success);
    let data = info.data.unwrap();
    assert_eq!(map_get(&data, "title"), Some(&Value::from("term")));
    assert_eq!(map_get(&data, "width"), Some(&Value::from(100)));

    let list = handle.handle_request(&ControlRequest::query(QueryKind::WindowList, [])).await;
    assert_eq!(list.data.unwrap().as_array().map(Vec::len), Some(1));

    let focused = handle.handle_request(&ControlRequest::query(QueryKind::FocusedWindow, [])).await;
    let data = focused.data.unwrap();
    assert_eq!(map_get(&data, "wid"), Some(&Value::from(7)));
    assert!(map_get(&data, "meta").is_some_and(|m| m.is_map()));

    let mode = handle.handle_request(&ControlRequest::query(QueryKind::CurrentMode, [])).await;
    assert_eq!(map_get(&mode.data.unwrap(), "mode"), Some(&Value::from("observer")));

    let clip = handle.handle_request(&ControlRequest::query(QueryKind::Clipboard, [])).await;
    assert_eq!(map_get(&clip.data.unwrap(), "text"), Some(&Value::from("copied")));
}

#[tokio::test]
async fn test_unknown_window_query_fails() {
    let (session, _client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();

    let request = ControlRequest::query(QueryKind::WindowInfo, [("wid", Value::from(99))]).with_id("q");
    let response = handle.handle_request(&request).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "q");
    assert_eq!(response.error.as_deref(), Some("No window 99"));

    let shot = ControlRequest::query(QueryKind::Screenshot, [("wid", Value::from(99))]);
    assert_eq!(
        handle.handle_request(&shot).await.error.as_deref(),
        Some("No window 99")
    );
}

#[tokio::test]
async fn test_screenshot_bypasses_dirty_flag() {
    let (session, _client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();
    create(&handle, 3, 8, 4);
    assert_eq!(handle.publish_once(), 0);

    let request = ControlRequest::query(QueryKind::Screenshot, [("wid", Value::from(3))]);
    let response = handle.handle_request(&request).await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(map_get(&data, "format"), Some(&Value::from("raw")));
    let bytes = map_get(&data, "data").and_then(Value::as_slice).unwrap();
    assert_eq!(bytes.len(), 8 * 4 * 3);

    // The publish path is untouched
    assert_eq!(handle.publish_once(), 0);
}

#[tokio::test]
async fn test_invalid_mode_is_rejected() {
    let (session, mut client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();

    let mut request = ControlRequest::mode_change(InputMode::Observer).with_id("x");
    request.payload.insert("mode".into(), Value::from("god"));
    let response = handle.handle_request(&request).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "x");
    assert_eq!(response.error.as_deref(), Some("Invalid mode: \"god\""));
    assert_eq!(handle.mode(), InputMode::Observer);
    assert!(drain_events(&mut client).is_empty());
}

#[tokio::test]
async fn test_mode_change_emits_event() {
    let (session, mut client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();

    let response = handle
        .handle_request(&ControlRequest::mode_change(InputMode::Autonomous))
        .await;
    assert!(response.success);
    assert_eq!(handle.mode(), InputMode::Autonomous);

    let events = drain_events(&mut client);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventKind::ModeChange);
    assert_eq!(events[0].data["old_mode"], Value::from("observer"));
    assert_eq!(events[0].data["new_mode"], Value::from("autonomous"));
}

#[tokio::test]
async fn test_kill_switch_input_emits_one_event() {
    let mut config = raw_config();
    config.control.mode = "autonomous".into();
    let (session, mut client, _sink) = start(config, RecordingSink::default());
    let handle = session.handle();

    assert_eq!(handle.on_input(&HumanInput::pointer_motion(0, 0)), FilterStatus::Suppress);
    let verdict = handle.on_input(&HumanInput::key_press("Pause", &["Control"]));
    assert_eq!(verdict, FilterStatus::Pass);
    assert_eq!(handle.mode(), InputMode::Observer);
    assert!(!handle.agent_may_act());

    let events = drain_events(&mut client);
    let kills: Vec<_> = events.iter().filter(|e| e.event_type == EventKind::KillSwitch).collect();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].wid, 0);
    assert_eq!(kills[0].data["old_mode"], Value::from("autonomous"));
}

#[tokio::test]
async fn test_autonomous_timeout_reverts_to_observer() {
    let mut config = raw_config();
    config.control.autonomous_timeout_secs = 60;
    let (session, mut client, _sink) = start(config, RecordingSink::default());
    let handle = session.handle();

    handle.handle_request(&ControlRequest::mode_change(InputMode::Autonomous)).await;
    handle.publish_once_at(Instant::now() + Duration::from_secs(1));
    assert_eq!(handle.mode(), InputMode::Autonomous);

    handle.publish_once_at(Instant::now() + Duration::from_secs(61));
    assert_eq!(handle.mode(), InputMode::Observer);

    let events = drain_events(&mut client);
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventKind::ModeChange);
    assert_eq!(last.data["reason"], Value::from("autonomous_timeout"));
}

#[tokio::test]
async fn test_undecodable_request_gets_failure() {
    let (session, _client, _sink) = start(raw_config(), RecordingSink::default());
    let response = session.handle().handle_bytes(&[0xc1, 0x00, 0xff]).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "");
    assert!(!response.error.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_request_type_echoes_id() {
    let (session, _client, _sink) = start(raw_config(), RecordingSink::default());
    let mut request = ControlRequest::query(QueryKind::CurrentMode, []).with_id("u");
    request.request_type = "teleport".into();
    let response = session.handle().handle_request(&request).await;
    assert!(!response.success);
    assert_eq!(response.request_id, "u");
    assert_eq!(response.error.as_deref(), Some("Unknown request type: \"teleport\""));
}

#[tokio::test]
async fn test_frame_carries_window_metadata() {
    let (session, mut client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();
    create(&handle, 9, 4, 2);
    handle.on_focus(Some(9));
    damage(&handle, 9);

    assert_eq!(handle.publish_once(), 1);
    let frame = client.frames.try_recv().unwrap();
    assert_eq!(frame.wid, 9);
    assert_eq!((frame.x, frame.y), (5, 6));
    assert_eq!((frame.width, frame.height), (4, 2));
    assert_eq!(frame.format, "raw");
    assert_eq!(&frame.data[..3], &[255, 0, 0]);
    assert_eq!(frame.window_title, "term");
    assert_eq!(frame.window_class, "xterm");
    assert!(frame.is_focused);
    assert_eq!(frame.sequence, 1);
}

#[tokio::test]
async fn test_saturated_frame_channel_does_not_stop_cycle() {
    let mut config = raw_config();
    config.channels.frame_queue_depth = 1;
    let (session, mut client, _sink) = start(config, RecordingSink::default());
    let handle = session.handle();
    for wid in 1..=3 {
        create(&handle, wid, 2, 2);
        damage(&handle, wid);
    }

    assert_eq!(handle.publish_once(), 1);
    assert_eq!(handle.shared.frames.dropped(), 2);
    assert_eq!(client.frames.try_recv().map(|f| f.wid), Some(1));

    // A later cycle publishes new damage normally
    damage(&handle, 2);
    assert_eq!(handle.publish_once_at(Instant::now() + Duration::from_secs(1)), 1);
    assert_eq!(client.frames.try_recv().map(|f| f.wid), Some(2));
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (session, mut client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();

    create(&handle, 4, 10, 10);
    handle.on_focus(Some(4));
    handle.on_window_lifecycle(WindowLifecycle::Resized {
        wid: 4,
        width: 20,
        height: 30,
    });
    handle.on_window_lifecycle(WindowLifecycle::Retitled {
        wid: 4,
        title: "vim".into(),
    });
    handle.on_window_lifecycle(WindowLifecycle::IconChanged {
        wid: 4,
        width: 32,
        height: 32,
    });
    handle.on_clipboard("pasted".into());
    handle.on_window_lifecycle(WindowLifecycle::Destroyed { wid: 4 });

    let kinds: Vec<_> = drain_events(&mut client).iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        [
            EventKind::WindowCreate,
            EventKind::WindowFocus,
            EventKind::WindowResize,
            EventKind::WindowTitle,
            EventKind::WindowIcon,
            EventKind::ClipboardUpdate,
            EventKind::WindowDestroy,
        ]
    );
    assert!(handle.window(4).is_none());
    assert_eq!(handle.focused(), None);
    assert!(handle.registry().is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (a, _ca, _sa) = start(raw_config(), RecordingSink::default());
    let (b, _cb, _sb) = start(raw_config(), RecordingSink::default());
    a.handle().kill_switch();
    a.handle()
        .handle_request(&ControlRequest::mode_change(InputMode::Supervised))
        .await;
    create(&b.handle(), 1, 2, 2);

    assert_eq!(a.handle().mode(), InputMode::Supervised);
    assert_eq!(b.handle().mode(), InputMode::Observer);
    assert!(a.handle().registry().is_empty());
    assert_eq!(b.handle().registry().len(), 1);
}

#[tokio::test]
async fn test_run_serves_requests_until_shutdown() {
    let (session, client, _sink) = start(raw_config(), RecordingSink::default());
    let handle = session.handle();
    create(&handle, 1, 2, 2);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(session.run(async move {
        let _ = stop_rx.await;
    }));

    for id in ["r-1", "r-2"] {
        let request = ControlRequest::query(QueryKind::CurrentMode, []).with_id(id);
        let response = client.control.call(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.request_id, id);
    }

    stop_tx.send(()).unwrap();
    running.await.unwrap();

    assert!(handle.registry().is_empty());
    let request = ControlRequest::query(QueryKind::CurrentMode, []);
    assert!(client.control.call(&request).await.is_err());
}
