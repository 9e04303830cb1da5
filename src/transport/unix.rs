//! Unix socket binding for the three channels
//!
//! Every record travels as a 4-byte big-endian length prefix followed by the
//! encoded message. Frame and event sockets fan out to every connected
//! subscriber, each with its own bounded queue. The control socket serves
//! one request at a time per connection and funnels all connections into
//! the session's single request queue.

use anyhow::{Context, Result};
use area_pilot_proto::{EventMessage, FrameMessage, FramedMessage, WireMessage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{publish_channel, request_channel, RequestClient, SessionChannels, Subscription};
use crate::config::ChannelConfig;

/// Listening sockets and the tasks serving them
pub struct UnixBinding {
    paths: Vec<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
}

impl UnixBinding {
    /// Socket paths in frame, event, control order
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Stop accepting, drop every connection and remove the socket files
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        let paths: Vec<&Path> = self.paths.iter().map(PathBuf::as_path).collect();
        remove_sockets(&paths);
        info!("Control plane sockets closed");
    }
}

/// Bind all three sockets and start serving them
///
/// Any bind failure aborts the whole call; sockets bound before the failure
/// are closed again.
pub fn bind(config: &ChannelConfig) -> Result<(SessionChannels, UnixBinding)> {
    let frame_listener = listen(&config.frame_socket).context("Failed to bind frame socket")?;
    let event_listener = listen(&config.event_socket)
        .context("Failed to bind event socket")
        .inspect_err(|_| remove_sockets(&[config.frame_socket.as_path()]))?;
    let control_listener = listen(&config.control_socket)
        .context("Failed to bind control socket")
        .inspect_err(|_| remove_sockets(&[config.frame_socket.as_path(), config.event_socket.as_path()]))?;

    let (frames, frame_sub) = publish_channel::<FrameMessage>(config.frame_queue_depth);
    let (events, event_sub) = publish_channel::<EventMessage>(config.event_queue_depth);
    let (control, requests) = request_channel(config.request_queue_depth);

    let tasks = vec![
        tokio::spawn(fan_out("frame", frame_listener, frame_sub, config.frame_queue_depth)),
        tokio::spawn(fan_out("event", event_listener, event_sub, config.event_queue_depth)),
        tokio::spawn(serve_control(control_listener, control)),
    ];

    let binding = UnixBinding {
        paths: vec![
            config.frame_socket.clone(),
            config.event_socket.clone(),
            config.control_socket.clone(),
        ],
        tasks,
    };
    Ok((
        SessionChannels {
            frames,
            events,
            requests,
        },
        binding,
    ))
}

fn remove_sockets(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            debug!("Could not remove socket {:?}: {}", path, e);
        }
    }
}

fn listen(path: &Path) -> Result<UnixListener> {
    // Remove existing socket if present
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to remove stale socket {:?}", path))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path).with_context(|| format!("Failed to bind {:?}", path))?;
    info!("Listening on {:?}", path);
    Ok(listener)
}

/// Accept subscribers and copy every published message to each of them
async fn fan_out<T>(channel: &'static str, listener: UnixListener, mut source: Subscription<T>, depth: usize)
where
    T: WireMessage + Send + 'static,
{
    let mut subscribers: Vec<mpsc::Sender<Arc<[u8]>>> = Vec::new();
    let mut dropped: u64 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    info!("{} subscriber connected", channel);
                    let (tx, rx) = mpsc::channel(depth.max(1));
                    tokio::spawn(write_subscriber(channel, stream, rx));
                    subscribers.push(tx);
                }
                Err(e) => error!("Accept error on {} socket: {}", channel, e),
            },
            message = source.recv() => {
                let Some(message) = message else { break };
                let bytes: Arc<[u8]> = match FramedMessage::new(&message) {
                    Ok(framed) => framed.encode().into(),
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", channel, e);
                        continue;
                    }
                };
                subscribers.retain(|tx| match tx.try_send(bytes.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        debug!("Slow {} subscriber, dropped ({} total)", channel, dropped);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }
    debug!("{} fan-out ended", channel);
}

async fn write_subscriber(channel: &'static str, mut stream: UnixStream, mut rx: mpsc::Receiver<Arc<[u8]>>) {
    while let Some(bytes) = rx.recv().await {
        if stream.write_all(&bytes).await.is_err() {
            break;
        }
    }
    info!("{} subscriber disconnected", channel);
}

async fn serve_control(listener: UnixListener, client: RequestClient) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                info!("Control client connected");
                tokio::spawn(handle_control(stream, client.clone()));
            }
            Err(e) => error!("Accept error on control socket: {}", e),
        }
    }
}

/// Read one framed record, `None` on a clean or broken disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.ok()?;
    let Some(len) = FramedMessage::payload_len(len_buf) else {
        warn!("Message too large: {} bytes", u32::from_be_bytes(len_buf));
        return None;
    };
    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await.ok()?;
    Some(msg_buf)
}

/// Strict request/reply: the next request is read only after the reply is written
async fn handle_control(mut stream: UnixStream, client: RequestClient) {
    while let Some(request) = read_frame(&mut stream).await {
        let reply = match client.call_raw(request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Session stopped answering: {}", e);
                break;
            }
        };
        let framed = FramedMessage::from_bytes(reply).encode();
        if stream.write_all(&framed).await.is_err() {
            break;
        }
    }
    info!("Control client disconnected");
}
