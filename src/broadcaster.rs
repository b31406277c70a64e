// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Accepts subscriber connections over length-delimited framed TCP and carries tagged JSON
//! records (`protocol::ClientMessage` / `protocol::ServerMessage`). One `tokio::spawn`ed task
//! runs per connection, with the subscriber table guarded by a `parking_lot::RwLock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{info, span, warn, Level};
use uuid::Uuid;

pub mod protocol;

pub use protocol::{ClientMessage, ServerMessage, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};

use crate::frame::now_ms;

#[derive(Debug, Error)]
pub enum BroadcasterError {
    #[error("no free port found starting from {0}")]
    NoFreePort(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SubscriberDescriptor {
    pub name: String,
    pub version: String,
    pub platform: String,
    pub capabilities: Vec<String>,
}

/// Events the Broadcaster hands up to the Supervisor: connection lifecycle and forwarded
/// subscriber control messages.
#[derive(Debug)]
pub enum BroadcasterEvent {
    ClientConnected {
        id: Uuid,
        descriptor: SubscriberDescriptor,
    },
    ClientDisconnected {
        id: Uuid,
        subscribers_remaining: usize,
    },
    Control {
        id: Uuid,
        message: ClientMessage,
    },
}

struct SubscriberHandle {
    tx: mpsc::Sender<ServerMessage>,
}

pub struct Broadcaster {
    host: String,
    requested_port: u16,
    identification_timeout: Duration,
    subscribers: Arc<RwLock<HashMap<Uuid, SubscriberHandle>>>,
    events_tx: mpsc::Sender<BroadcasterEvent>,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<BroadcasterEvent>>>,
    bound_port: tokio::sync::Mutex<Option<u16>>,
    shutdown_tx: tokio::sync::Mutex<Option<mpsc::Sender<()>>>,
}

const MAX_PORT_ATTEMPTS: u16 = 100;

impl Broadcaster {
    pub fn new(host: String, port: u16, identification_timeout: Duration) -> Broadcaster {
        let (events_tx, events_rx) = mpsc::channel(128);
        Broadcaster {
            host,
            requested_port: port,
            identification_timeout,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
            bound_port: tokio::sync::Mutex::new(None),
            shutdown_tx: tokio::sync::Mutex::new(None),
        }
    }

    /// Events to drain in the Supervisor's routing loop. Panics if called more than once.
    pub async fn events(&self) -> mpsc::Receiver<BroadcasterEvent> {
        self.events_rx
            .lock()
            .await
            .take()
            .expect("Broadcaster::events called more than once")
    }

    /// Binds a listener, retrying on successive ports if the requested one is in use, and
    /// spawns the accept loop. Returns the port actually bound.
    pub async fn start(&self) -> Result<u16, BroadcasterError> {
        let span = span!(Level::INFO, "broadcaster start");
        let _enter = span.enter();

        let mut port = self.requested_port;
        let listener = loop {
            match TcpListener::bind((self.host.as_str(), port)).await {
                Ok(listener) => break listener,
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    warn!(port, "port in use, retrying on next port");
                    port = port.wrapping_add(1);
                    if port - self.requested_port >= MAX_PORT_ATTEMPTS {
                        return Err(BroadcasterError::NoFreePort(self.requested_port));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        };

        info!(host = self.host, port, "broadcaster listening");
        *self.bound_port.lock().await = Some(port);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let subscribers = Arc::clone(&self.subscribers);
        let events_tx = self.events_tx.clone();
        let identification_timeout = self.identification_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, addr)) = accepted else { continue };
                        info!(%addr, "subscriber connected");
                        let subscribers = Arc::clone(&subscribers);
                        let events_tx = events_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, subscribers, events_tx, identification_timeout).await;
                        });
                    }
                }
            }
        });

        Ok(port)
    }

    /// Serializes `msg` once and sends to every identified subscriber. A per-subscriber send
    /// failure only drops that subscriber; it never aborts the broadcast.
    pub fn broadcast(&self, msg: ServerMessage) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, handle) in subscribers.iter() {
                if handle.tx.try_send(msg.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    /// Addresses a single subscriber by id. No-op if the id is unknown or already gone.
    pub fn send(&self, id: Uuid, msg: ServerMessage) {
        let subscribers = self.subscribers.read();
        if let Some(handle) = subscribers.get(&id) {
            let _ = handle.tx.try_send(msg);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Closes every subscriber with code 1000, then shuts down the accept loop. Idempotent.
    pub async fn stop(&self) {
        self.broadcast(ServerMessage::Close {
            code: CLOSE_NORMAL,
            reason: "Service shutting down".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.subscribers.write().clear();

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    subscribers: Arc<RwLock<HashMap<Uuid, SubscriberHandle>>>,
    events_tx: mpsc::Sender<BroadcasterEvent>,
    identification_timeout: Duration,
) {
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut stream) = framed.split();
    let id = Uuid::new_v4();

    if send_json(
        &mut sink,
        &ServerMessage::Identify {
            client_id: id.to_string(),
        },
    )
    .await
    .is_err()
    {
        return;
    }

    let descriptor = match tokio::time::timeout(identification_timeout, stream.next()).await {
        Ok(Some(Ok(bytes))) => match serde_json::from_slice::<ClientMessage>(&bytes) {
            Ok(ClientMessage::Identify {
                name,
                version,
                platform,
                capabilities,
            }) => SubscriberDescriptor {
                name,
                version,
                platform,
                capabilities,
            },
            _ => {
                let _ = send_json(
                    &mut sink,
                    &ServerMessage::Close {
                        code: CLOSE_PROTOCOL_ERROR,
                        reason: "expected identify as the first message".to_string(),
                    },
                )
                .await;
                return;
            }
        },
        _ => {
            let _ = send_json(
                &mut sink,
                &ServerMessage::Close {
                    code: CLOSE_PROTOCOL_ERROR,
                    reason: "identification timed out".to_string(),
                },
            )
            .await;
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    subscribers.write().insert(id, SubscriberHandle { tx: out_tx });
    let _ = events_tx
        .send(BroadcasterEvent::ClientConnected { id, descriptor })
        .await;

    if send_json(
        &mut sink,
        &ServerMessage::Welcome {
            session_id: id.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: now_ms(),
        },
    )
    .await
    .is_err()
    {
        subscribers.write().remove(&id);
        return;
    }

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let is_close = matches!(msg, ServerMessage::Close { .. });
                        if send_json(&mut sink, &msg).await.is_err() || is_close {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(bytes)) => match serde_json::from_slice::<ClientMessage>(&bytes) {
                        Ok(message) => {
                            let _ = events_tx.send(BroadcasterEvent::Control { id, message }).await;
                        }
                        Err(err) => {
                            let _ = send_json(&mut sink, &ServerMessage::Error { error: err.to_string() }).await;
                        }
                    },
                    _ => break,
                }
            }
        }
    }

    subscribers.write().remove(&id);
    let remaining = subscribers.read().len();
    let _ = events_tx
        .send(BroadcasterEvent::ClientDisconnected {
            id,
            subscribers_remaining: remaining,
        })
        .await;
}

async fn send_json<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Bytes> + Unpin,
{
    let bytes = serde_json::to_vec(msg).map_err(|_| ())?;
    sink.send(Bytes::from(bytes)).await.map_err(|_| ())
}

#[cfg(test)]
mod test {
    use std::time::Duration as StdDuration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream as ClientStream;

    use super::*;

    #[tokio::test]
    async fn test_start_binds_and_accepts_identify() {
        let broadcaster = Broadcaster::new("127.0.0.1".to_string(), 0, StdDuration::from_secs(2));
        let port = broadcaster.start().await.expect("start");

        let mut client = ClientStream::connect(("127.0.0.1", port)).await.expect("connect");

        // Read the length-delimited `identify` frame.
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.expect("read len");
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        client.read_exact(&mut payload).await.expect("read payload");
        let msg: serde_json::Value = serde_json::from_slice(&payload).expect("parse");
        assert_eq!("identify", msg["type"]);

        let identify = serde_json::json!({
            "type": "identify",
            "name": "test-client",
            "version": "1.0",
            "platform": "linux",
            "capabilities": [],
        });
        let payload = serde_json::to_vec(&identify).expect("serialize");
        client
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .expect("write len");
        client.write_all(&payload).await.expect("write payload");

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(1, broadcaster.subscriber_count());
    }
}
