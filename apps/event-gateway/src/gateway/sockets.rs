//! Live transport sockets and their outbound queues.
//!
//! Every accepted WebSocket gets an entry here, authenticated or not. The
//! connection task drains the queue and writes to the socket, so frames for
//! one connection are delivered in the order they were queued.
//!
//! Closing does not go through the bounded queue: each socket has a one-shot
//! close signal, so a full queue can delay events but never a close.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use realtime_common::id::{prefix, prefixed_ulid};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};

use super::events::ServerEvent;

/// An item on a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<ServerEvent>),
    /// Write a close frame and end the connection.
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct CloseRequest {
    code: u16,
    reason: String,
    /// Last event written before the close frame.
    farewell: Option<Arc<ServerEvent>>,
}

struct SocketEntry {
    tx: mpsc::Sender<Outbound>,
    close: Option<oneshot::Sender<CloseRequest>>,
}

/// Receiving half of one socket: queued events, then the close once requested.
pub struct Outbox {
    queue: mpsc::Receiver<Outbound>,
    close: Option<oneshot::Receiver<CloseRequest>>,
    closing: VecDeque<Outbound>,
}

impl Outbox {
    /// Next frame to write. After a close request this yields whatever was
    /// already queued, the farewell event if any, and then `Outbound::Close`.
    pub async fn recv(&mut self) -> Option<Outbound> {
        loop {
            if let Some(item) = self.closing.pop_front() {
                return Some(item);
            }
            let Some(close) = self.close.as_mut() else {
                return self.queue.recv().await;
            };

            tokio::select! {
                biased;
                request = close => {
                    self.close = None;
                    if let Ok(request) = request {
                        self.stage(request);
                    }
                }
                item = self.queue.recv() => return item,
            }
        }
    }

    /// Non-blocking variant of [`Outbox::recv`].
    pub fn try_recv(&mut self) -> Option<Outbound> {
        if let Some(close) = self.close.as_mut() {
            if let Ok(request) = close.try_recv() {
                self.close = None;
                self.stage(request);
            }
        }
        if let Some(item) = self.closing.pop_front() {
            return Some(item);
        }
        self.queue.try_recv().ok()
    }

    fn stage(&mut self, request: CloseRequest) {
        while let Ok(item) = self.queue.try_recv() {
            self.closing.push_back(item);
        }
        if let Some(event) = request.farewell {
            self.closing.push_back(Outbound::Event(event));
        }
        self.closing.push_back(Outbound::Close {
            code: request.code,
            reason: request.reason,
        });
    }
}

pub struct SocketTable {
    sockets: DashMap<String, SocketEntry>,
    buffer: usize,
    send_timeout: Duration,
}

impl SocketTable {
    pub fn new(buffer: usize, send_timeout: Duration) -> Self {
        Self {
            sockets: DashMap::new(),
            buffer: buffer.max(1),
            send_timeout,
        }
    }

    /// Accept a new socket. Returns its connection id and outbox.
    pub fn open(&self) -> (String, Outbox) {
        let connection_id = prefixed_ulid(prefix::CONNECTION);
        let (tx, queue) = mpsc::channel(self.buffer);
        let (close_tx, close_rx) = oneshot::channel();
        self.sockets.insert(
            connection_id.clone(),
            SocketEntry {
                tx,
                close: Some(close_tx),
            },
        );
        let outbox = Outbox {
            queue,
            close: Some(close_rx),
            closing: VecDeque::new(),
        };
        (connection_id, outbox)
    }

    pub fn remove(&self, connection_id: &str) -> bool {
        self.sockets.remove(connection_id).is_some()
    }

    /// Queue an event for one socket. Waits at most `send_timeout` on a full
    /// queue; returns `false` if the socket is gone or the event was dropped.
    pub async fn send(&self, connection_id: &str, event: Arc<ServerEvent>) -> bool {
        // Clone the sender so the shard lock is not held across the await.
        let Some(tx) = self
            .sockets
            .get(connection_id)
            .map(|entry| entry.value().tx.clone())
        else {
            return false;
        };

        match tx.send_timeout(Outbound::Event(event), self.send_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    connection_id,
                    "outbound queue full; dropping frame for slow connection"
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => false,
        }
    }

    /// Request a close frame after anything already queued. Only the first
    /// request per socket takes effect.
    pub fn close(&self, connection_id: &str, code: u16, reason: &str) -> bool {
        self.close_with(connection_id, code, reason, None)
    }

    /// Like [`SocketTable::close`], writing `farewell` just before the close
    /// frame regardless of queue capacity.
    pub fn close_with(
        &self,
        connection_id: &str,
        code: u16,
        reason: &str,
        farewell: Option<Arc<ServerEvent>>,
    ) -> bool {
        let Some(signal) = self
            .sockets
            .get_mut(connection_id)
            .and_then(|mut entry| entry.close.take())
        else {
            return false;
        };

        signal
            .send(CloseRequest {
                code,
                reason: reason.to_string(),
                farewell,
            })
            .is_ok()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sockets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}
