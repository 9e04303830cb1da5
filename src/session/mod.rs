//! Control Session
//!
//! Ties the compositor registry, the mode gate and the channels together:
//! - the publish cycle turns dirty windows into frame messages at a fixed rate
//! - control requests are answered one at a time, in arrival order
//! - host notifications become events as soon as they arrive
//!
//! A [`Session`] is constructed, run until shutdown, then drained. Clones of
//! its [`SessionHandle`] go to the host adapter.

mod handlers;
pub mod meta;
pub mod stats;

pub use handlers::Action;

use area_pilot_proto::{
    ControlRequest, ControlResponse, EventKind, EventMessage, FrameMessage, InputMode, Payload, Value,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::compositor::{CompositorRegistry, SnapshotSettings};
use crate::config::{Config, ConfigError};
use crate::error::PilotError;
use crate::input::{FilterStatus, HumanInput};
use crate::mode::{KillSwitch, ModeGate, ModeTransition, TransitionCause, TransitionListener};
use crate::sink::InjectionSink;
use crate::source::{HostCallbacks, Region, WindowLifecycle};
use crate::transport::{PendingRequest, Publisher, RequestQueue, SessionChannels};
use meta::{WindowCatalog, WindowInfo};
use stats::ThroughputCounter;

/// State shared by the publish cycle, request handling and host callbacks
struct Shared {
    registry: CompositorRegistry,
    gate: ModeGate,
    windows: Mutex<WindowCatalog>,
    sink: Arc<dyn InjectionSink>,
    frames: Publisher<FrameMessage>,
    events: Publisher<EventMessage>,
    settings: SnapshotSettings,
    /// Per-window minimum time between published snapshots
    min_interval: Duration,
    autonomous_timeout: Option<Duration>,
}

/// Publishes mode transitions as events, in the order they are applied
struct ModeEvents {
    events: Publisher<EventMessage>,
}

impl TransitionListener for ModeEvents {
    fn on_transition(&self, transition: &ModeTransition) {
        let mut data = Payload::new();
        data.insert("old_mode".into(), Value::from(transition.from.as_str()));
        data.insert("new_mode".into(), Value::from(transition.to.as_str()));
        let kind = match transition.cause {
            TransitionCause::KillSwitch => EventKind::KillSwitch,
            TransitionCause::Requested => EventKind::ModeChange,
            TransitionCause::AutonomousTimeout => {
                data.insert("reason".into(), Value::from("autonomous_timeout"));
                EventKind::ModeChange
            }
        };
        if let Err(e) = self.events.publish(EventMessage::new(kind, 0, data)) {
            warn!("Dropped {} event: {}", kind, e);
        }
    }
}

/// Cloneable handle to a running session
///
/// Implements [`HostCallbacks`] for the host adapter and exposes the
/// request and publish entry points.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

/// A control session and its request queue
pub struct Session {
    handle: SessionHandle,
    requests: RequestQueue,
    period: Duration,
    stats_interval: Duration,
}

impl Session {
    /// Build a session from validated configuration
    pub fn new(config: &Config, channels: SessionChannels, sink: Arc<dyn InjectionSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        let kill_switch: KillSwitch = config.control.kill_switch.parse().map_err(|e| ConfigError {
            key: "control.kill_switch",
            reason: format!("{e}"),
        })?;

        let SessionChannels {
            frames,
            events,
            requests,
        } = channels;

        let gate = ModeGate::new(config.control.default_mode(), kill_switch, config.control.human_priority())
            .with_listener(Arc::new(ModeEvents { events: events.clone() }));

        let capture = &config.capture;
        let period = capture.period();
        let shared = Shared {
            registry: CompositorRegistry::new(),
            gate,
            windows: Mutex::new(WindowCatalog::new()),
            sink,
            frames,
            events,
            settings: SnapshotSettings::from(capture),
            min_interval: if capture.delta_only { period } else { Duration::ZERO },
            autonomous_timeout: config.control.autonomous_timeout(),
        };

        info!(
            "Session ready: mode={}, {} fps, format={}",
            shared.gate.mode(),
            capture.fps,
            shared.settings.format
        );

        Ok(Self {
            handle: SessionHandle {
                shared: Arc::new(shared),
            },
            requests,
            period,
            stats_interval: config.logging.stats_interval(),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Serve requests and publish frames until `shutdown` resolves
    ///
    /// On shutdown the request being handled and the publish cycle in
    /// flight complete, queued requests are refused, and every window
    /// buffer is released.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Session {
            handle,
            mut requests,
            period,
            stats_interval,
        } = self;

        let (stop_tx, stop_rx) = watch::channel(false);
        let publisher = tokio::spawn(publish_loop(handle.clone(), period, stats_interval, stop_rx));

        tokio::pin!(shutdown);
        let mut accepting = true;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                pending = requests.recv(), if accepting => match pending {
                    Some(pending) => handle.serve(pending).await,
                    None => {
                        info!("Control channel closed");
                        accepting = false;
                    }
                },
            }
        }

        info!("Session shutting down");
        requests.close();
        while let Some(pending) = requests.try_recv() {
            let reply = refusal(&pending.bytes);
            pending.respond(encode_response(&reply));
        }

        let _ = stop_tx.send(true);
        if let Err(e) = publisher.await {
            error!("Publish task failed: {}", e);
        }

        handle.shared.registry.clear();
        handle.shared.windows.lock().clear();
        info!("Session stopped");
    }
}

async fn publish_loop(handle: SessionHandle, period: Duration, stats_interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut throughput = ThroughputCounter::new(stats_interval);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let cycle = handle.clone();
                // Encoding is CPU-bound
                match tokio::task::spawn_blocking(move || cycle.publish_once()).await {
                    Ok(sent) => {
                        if let Some(report) = throughput.add(sent as u64, Instant::now()) {
                            handle.log_stats(report);
                        }
                    }
                    Err(e) => error!("Frame publisher error: {}", e),
                }
            }
        }
    }
    debug!("Publish loop ended");
}

fn encode_response(response: &ControlResponse) -> Vec<u8> {
    match area_pilot_proto::encode(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            let fallback = ControlResponse::failure(response.request_id.clone(), "failed to encode response");
            area_pilot_proto::encode(&fallback).unwrap_or_default()
        }
    }
}

/// Failure reply for a request that arrived during shutdown
fn refusal(bytes: &[u8]) -> ControlResponse {
    let request_id = area_pilot_proto::decode::<ControlRequest>(bytes)
        .map(|r| r.request_id)
        .unwrap_or_default();
    ControlResponse::failure(request_id, "session shutting down")
}

impl SessionHandle {
    pub fn mode(&self) -> InputMode {
        self.shared.gate.mode()
    }

    /// Whether the agent may inject input right now
    pub fn agent_may_act(&self) -> bool {
        self.shared.gate.agent_may_act()
    }

    /// Force observer mode, as the kill switch key combination does
    pub fn kill_switch(&self) {
        self.shared.gate.kill_switch();
    }

    pub fn registry(&self) -> &CompositorRegistry {
        &self.shared.registry
    }

    /// Currently focused window, if any
    pub fn focused(&self) -> Option<u32> {
        self.shared.windows.lock().focused()
    }

    pub fn window(&self, wid: u32) -> Option<WindowInfo> {
        self.shared.windows.lock().get(wid).cloned()
    }

    /// Answer one queued request
    pub async fn serve(&self, pending: PendingRequest) {
        let response = self.handle_bytes(&pending.bytes).await;
        pending.respond(encode_response(&response));
    }

    /// Decode, dispatch and answer one encoded request
    ///
    /// Undecodable bytes get a failure response with an empty request id.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> ControlResponse {
        match area_pilot_proto::decode::<ControlRequest>(bytes) {
            Ok(request) => self.handle_request(&request).await,
            Err(e) => {
                warn!("Rejected control request: {}", e);
                ControlResponse::failure("", PilotError::from(e).to_string())
            }
        }
    }

    /// Dispatch one request; always yields exactly one response
    pub async fn handle_request(&self, request: &ControlRequest) -> ControlResponse {
        match self.shared.dispatch(request).await {
            Ok(data) => ControlResponse::ok(request.request_id.clone(), data),
            Err(e) => {
                debug!("Request {:?} failed: {}", request.request_id, e);
                ControlResponse::failure(request.request_id.clone(), e.to_string())
            }
        }
    }

    /// Run one publish cycle now; returns the number of frames published
    pub fn publish_once(&self) -> usize {
        self.publish_once_at(Instant::now())
    }

    pub fn publish_once_at(&self, now: Instant) -> usize {
        let shared = &self.shared;
        if let Some(timeout) = shared.autonomous_timeout {
            shared.gate.expire_autonomous(timeout, now);
        }

        let snapshots = shared
            .registry
            .collect_dirty_snapshots_at(&shared.settings, shared.min_interval, now);
        if snapshots.is_empty() {
            return 0;
        }

        let timestamp = area_pilot_proto::unix_timestamp();
        let format = shared.settings.format.as_str();
        let mut sent = 0;
        for (wid, snapshot) in snapshots {
            let frame = {
                let windows = shared.windows.lock();
                let info = windows.get(wid);
                FrameMessage {
                    wid,
                    x: info.map_or(0, |w| w.geometry.x),
                    y: info.map_or(0, |w| w.geometry.y),
                    width: snapshot.width,
                    height: snapshot.height,
                    format: format.to_string(),
                    data: snapshot.data,
                    timestamp,
                    window_title: info.map(|w| w.title.clone()).unwrap_or_default(),
                    window_class: info.map(|w| w.class.clone()).unwrap_or_default(),
                    is_focused: windows.is_focused(wid),
                    sequence: snapshot.sequence,
                }
            };
            match shared.frames.publish(frame) {
                Ok(()) => sent += 1,
                Err(e) => debug!("Dropped frame for window {}: {}", wid, e),
            }
        }
        sent
    }

    fn log_stats(&self, report: stats::Throughput) {
        let regions = self.shared.registry.stats();
        info!(
            "Frames sent: {} ({:.1}/s), dropped frames: {}, dropped events: {}, dropped regions: {}",
            report.frames,
            report.per_second,
            self.shared.frames.dropped(),
            self.shared.events.dropped(),
            regions.unsupported() + regions.failed() + regions.orphaned()
        );
    }

    fn emit(&self, kind: EventKind, wid: u32, data: Payload) {
        if let Err(e) = self.shared.events.publish(EventMessage::new(kind, wid, data)) {
            warn!("Dropped {} event for window {}: {}", kind, wid, e);
        }
    }
}

fn payload(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Payload {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl HostCallbacks for SessionHandle {
    fn on_region(&self, region: Region<'_>) {
        self.shared.registry.apply_region(
            region.wid,
            region.x,
            region.y,
            region.width,
            region.height,
            region.encoding,
            region.data,
        );
    }

    fn on_window_lifecycle(&self, event: WindowLifecycle) {
        let shared = &self.shared;
        match event {
            WindowLifecycle::Created { wid, window } => {
                let g = window.geometry;
                shared.registry.create(wid, g.width, g.height);
                let info = WindowInfo::new(wid, window);
                let data = info.to_payload();
                shared.windows.lock().insert(info);
                debug!("Window created: wid={} title={:?}", wid, data.get("title"));
                self.emit(EventKind::WindowCreate, wid, data);
            }
            WindowLifecycle::Destroyed { wid } => {
                shared.registry.destroy(wid);
                shared.windows.lock().remove(wid);
                debug!("Window destroyed: wid={}", wid);
                self.emit(EventKind::WindowDestroy, wid, Payload::new());
            }
            WindowLifecycle::Resized { wid, width, height } => {
                shared.registry.resize(wid, width, height);
                shared.windows.lock().resize(wid, width, height);
                self.emit(
                    EventKind::WindowResize,
                    wid,
                    payload([("width", Value::from(width)), ("height", Value::from(height))]),
                );
            }
            WindowLifecycle::Retitled { wid, title } => {
                shared.windows.lock().retitle(wid, title.clone());
                self.emit(EventKind::WindowTitle, wid, payload([("title", Value::from(title))]));
            }
            WindowLifecycle::IconChanged { wid, width, height } => {
                self.emit(
                    EventKind::WindowIcon,
                    wid,
                    payload([("width", Value::from(width)), ("height", Value::from(height))]),
                );
            }
        }
    }

    fn on_focus(&self, wid: Option<u32>) {
        self.shared.windows.lock().set_focus(wid);
        self.emit(EventKind::WindowFocus, wid.unwrap_or(0), Payload::new());
    }

    fn on_input(&self, input: &HumanInput) -> FilterStatus {
        self.shared.gate.should_suppress_human_input(input)
    }

    fn on_clipboard(&self, text: String) {
        self.emit(EventKind::ClipboardUpdate, 0, payload([("text", Value::from(text))]));
    }
}

#[cfg(test)]
mod tests;
