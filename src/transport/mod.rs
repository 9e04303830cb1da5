//! Channels between the session and its clients
//!
//! Three logical channels: frames and events are publish/subscribe with a
//! bounded queue that drops instead of blocking the publisher, control is
//! request/reply with exactly one reply per request. [`in_process`] wires
//! both ends inside one process; [`unix`] binds them to sockets.

pub mod unix;

use area_pilot_proto::{ControlRequest, ControlResponse, DecodeError, EncodeError, EventMessage, FrameMessage};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;

/// Transport failures seen by a client
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Why a publish did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("queue full")]
    Full,
    #[error("no subscriber")]
    Closed,
}

#[derive(Debug, Default)]
struct PublishCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Sending half of a publish channel; never blocks
#[derive(Debug)]
pub struct Publisher<T> {
    tx: mpsc::Sender<T>,
    counters: Arc<PublishCounters>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> Publisher<T> {
    /// Queue a message, dropping it if the queue is full
    pub fn publish(&self, message: T) -> Result<(), PublishError> {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => PublishError::Full,
                    mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
                })
            }
        }
    }

    /// Messages accepted so far
    pub fn sent(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    /// Messages dropped so far
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half of a publish channel
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next message; `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Create a publish channel holding at most `depth` undelivered messages
pub fn publish_channel<T>(depth: usize) -> (Publisher<T>, Subscription<T>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        Publisher {
            tx,
            counters: Arc::default(),
        },
        Subscription { rx },
    )
}

/// An encoded control request waiting for its reply
#[derive(Debug)]
pub struct PendingRequest {
    pub bytes: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

impl PendingRequest {
    /// Send the encoded reply; a vanished caller is ignored
    pub fn respond(self, bytes: Vec<u8>) {
        let _ = self.reply.send(bytes);
    }
}

/// Session side of the control channel
#[derive(Debug)]
pub struct RequestQueue {
    rx: mpsc::Receiver<PendingRequest>,
}

impl RequestQueue {
    /// Wait for the next request; `None` once every client is gone
    pub async fn recv(&mut self) -> Option<PendingRequest> {
        self.rx.recv().await
    }

    /// Refuse new requests; already queued ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn try_recv(&mut self) -> Option<PendingRequest> {
        self.rx.try_recv().ok()
    }
}

/// Client side of the control channel
#[derive(Debug, Clone)]
pub struct RequestClient {
    tx: mpsc::Sender<PendingRequest>,
}

impl RequestClient {
    /// Send encoded request bytes and wait for the encoded reply
    pub async fn call_raw(&self, bytes: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(PendingRequest { bytes, reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)
    }

    /// Send a request and wait for its response
    pub async fn call(&self, request: &ControlRequest) -> Result<ControlResponse, TransportError> {
        let bytes = area_pilot_proto::encode(request)?;
        let reply = self.call_raw(bytes).await?;
        Ok(area_pilot_proto::decode(&reply)?)
    }
}

/// Create a control channel with room for `depth` queued requests
pub fn request_channel(depth: usize) -> (RequestClient, RequestQueue) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (RequestClient { tx }, RequestQueue { rx })
}

/// Session ends of the three channels
#[derive(Debug)]
pub struct SessionChannels {
    pub frames: Publisher<FrameMessage>,
    pub events: Publisher<EventMessage>,
    pub requests: RequestQueue,
}

/// Client ends of the three channels
#[derive(Debug)]
pub struct ClientChannels {
    pub frames: Subscription<FrameMessage>,
    pub events: Subscription<EventMessage>,
    pub control: RequestClient,
}

/// Connect a session and a client inside one process
pub fn in_process(config: &ChannelConfig) -> (SessionChannels, ClientChannels) {
    let (frames, frame_sub) = publish_channel(config.frame_queue_depth);
    let (events, event_sub) = publish_channel(config.event_queue_depth);
    let (control, requests) = request_channel(config.request_queue_depth);
    (
        SessionChannels {
            frames,
            events,
            requests,
        },
        ClientChannels {
            frames: frame_sub,
            events: event_sub,
            control,
        },
    )
}
