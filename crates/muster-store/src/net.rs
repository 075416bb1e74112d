//! TCP transport for the coordination store.
//!
//! One process (the coordinator) hosts the store; every other member
//! connects to it. The wire protocol is a length-prefixed postcard frame per
//! request and per response, handled strictly in order on each connection.
//! `wait` blocks server-side, so a waiting client holds no busy loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::MAX_FRAME_SIZE;
use crate::constants::RPC_READ_TIMEOUT_MS;
use crate::constants::WAIT_RESPONSE_GRACE_MS;
use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::traits::CoordinationStore;

/// Store requests on the wire.
#[derive(Debug, Serialize, Deserialize)]
enum Request {
    Set { key: String, value: Vec<u8> },
    Get { key: String },
    Delete { key: String },
    Wait { keys: Vec<String>, timeout_ms: u64 },
}

/// Store responses on the wire.
#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Ok,
    Value { value: Vec<u8> },
    NotFound { key: String },
    WaitOk,
    WaitTimeout { duration_ms: u64 },
    Failed { reason: String },
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), StoreError> {
    // Checked before any bytes go out: a truncated length prefix would
    // desynchronize the stream for every later frame.
    if payload.len() > MAX_FRAME_SIZE {
        return Err(StoreError::Protocol {
            reason: format!("frame of {} bytes exceeds maximum of {MAX_FRAME_SIZE}", payload.len()),
        });
    }
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|source| StoreError::Io {
            operation: "write frame length",
            source,
        })?;
    writer.write_all(payload).await.map_err(|source| StoreError::Io {
        operation: "write frame payload",
        source,
    })?;
    writer.flush().await.map_err(|source| StoreError::Io {
        operation: "flush frame",
        source,
    })
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, StoreError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|source| StoreError::Io {
            operation: "read frame length",
            source,
        })?;
    let len = u32::from_be_bytes(len_buf) as usize;

    // An empty frame is always a peer bug: postcard needs at least one byte.
    if len == 0 {
        return Err(StoreError::Protocol {
            reason: "empty frame".to_string(),
        });
    }
    if len > MAX_FRAME_SIZE {
        return Err(StoreError::Protocol {
            reason: format!("frame of {len} bytes exceeds maximum of {MAX_FRAME_SIZE}"),
        });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|source| StoreError::Io {
            operation: "read frame payload",
            source,
        })?;
    Ok(payload)
}

fn connection_closed(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::Io { source, .. }
            if source.kind() == std::io::ErrorKind::UnexpectedEof
    )
}

/// TCP-hosted coordination store server.
///
/// Wraps a [`MemoryStore`] and serves it to remote members. The hosting
/// process should use [`store`](Self::store) directly rather than dialing
/// itself. Dropping the server stops the accept loop and all connections.
pub struct TcpStoreServer {
    local_addr: SocketAddr,
    state: Arc<MemoryStore>,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl TcpStoreServer {
    /// Bind the server and start accepting connections.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, StoreError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| StoreError::Io {
            operation: "bind store endpoint",
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| StoreError::Io {
            operation: "resolve local address",
            source,
        })?;

        let state = MemoryStore::new();
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, state.clone(), cancel.clone()));

        info!(addr = %local_addr, "store endpoint listening");
        Ok(Self {
            local_addr,
            state,
            cancel,
            accept_task,
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// In-process handle to the served store state.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.state.clone()
    }

    /// Stop accepting connections and terminate existing ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TcpStoreServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<MemoryStore>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "store connection accepted");
                tokio::spawn(serve_connection(state.clone(), stream, peer, cancel.child_token()));
            }
            Err(error) => {
                // Accept failures are usually transient (fd pressure); keep serving.
                warn!(%error, "failed to accept store connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    debug!("store accept loop stopped");
}

async fn serve_connection(
    state: Arc<MemoryStore>,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = read_frame(&mut stream) => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) if connection_closed(&error) => {
                debug!(%peer, "store connection closed");
                return;
            }
            Err(error) => {
                warn!(%peer, %error, "dropping store connection");
                return;
            }
        };

        // A `Wait` blocks in here for up to its full timeout; shutdown must
        // interrupt it, not just the idle read.
        let response = match postcard::from_bytes::<Request>(&frame) {
            Ok(request) => tokio::select! {
                _ = cancel.cancelled() => return,
                response = handle_request(&state, request) => response,
            },
            Err(error) => Response::Failed {
                reason: format!("undecodable request: {error}"),
            },
        };

        let encoded = match postcard::to_stdvec(&response) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(%peer, %error, "failed to encode store response");
                return;
            }
        };
        if let Err(error) = write_frame(&mut stream, &encoded).await {
            debug!(%peer, %error, "failed to write store response");
            return;
        }
    }
}

async fn handle_request(state: &MemoryStore, request: Request) -> Response {
    match request {
        Request::Set { key, value } => match state.set(&key, &value).await {
            Ok(()) => Response::Ok,
            Err(error) => Response::Failed {
                reason: error.to_string(),
            },
        },
        Request::Get { key } => match state.get(&key).await {
            Ok(value) => Response::Value { value },
            Err(StoreError::NotFound { key }) => Response::NotFound { key },
            Err(error) => Response::Failed {
                reason: error.to_string(),
            },
        },
        Request::Delete { key } => match state.delete(&key).await {
            Ok(()) => Response::Ok,
            Err(error) => Response::Failed {
                reason: error.to_string(),
            },
        },
        Request::Wait { keys, timeout_ms } => {
            match state.wait(&keys, Duration::from_millis(timeout_ms)).await {
                Ok(()) => Response::WaitOk,
                Err(StoreError::WaitTimeout { duration_ms }) => Response::WaitTimeout { duration_ms },
                Err(error) => Response::Failed {
                    reason: error.to_string(),
                },
            }
        }
    }
}

/// Client side of the TCP-hosted store.
///
/// Requests on one connection are strictly serialized; the connection is
/// guarded by a mutex so the client can be shared across tasks. A failed
/// round trip poisons the connection: once a request is on the wire, a late
/// reply to it would otherwise be read as the answer to the *next* request.
/// The next round trip dials a fresh connection instead.
pub struct TcpStoreClient {
    stream: Mutex<Option<TcpStream>>,
    peer: SocketAddr,
}

impl TcpStoreClient {
    /// Connect to a store endpoint. A single attempt; callers own retry.
    pub async fn connect(addr: SocketAddr) -> Result<Self, StoreError> {
        let stream = Self::dial(addr).await?;
        Ok(Self {
            stream: Mutex::new(Some(stream)),
            peer: addr,
        })
    }

    /// The endpoint this client is connected to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn dial(addr: SocketAddr) -> Result<TcpStream, StoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| StoreError::Unavailable {
                reason: format!("connect to store {addr}: {source}"),
            })?;
        // Coordination traffic is small request/response pairs; don't batch.
        stream.set_nodelay(true).map_err(|source| StoreError::Io {
            operation: "set nodelay",
            source,
        })?;
        debug!(%addr, "connected to store endpoint");
        Ok(stream)
    }

    async fn round_trip(&self, request: &Request, read_timeout: Duration) -> Result<Response, StoreError> {
        let encoded = postcard::to_stdvec(request).map_err(|error| StoreError::Decode {
            what: "store request",
            reason: error.to_string(),
        })?;

        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => {
                debug!(peer = %self.peer, "reconnecting to store endpoint");
                Self::dial(self.peer).await?
            }
        };

        // The stream only goes back into the slot after a clean exchange.
        // After a timeout or I/O error the peer may still answer the
        // abandoned request, and that stale frame must never be read.
        let frame = self.exchange(&mut stream, &encoded, read_timeout).await?;
        *slot = Some(stream);
        drop(slot);

        postcard::from_bytes(&frame).map_err(|error| StoreError::Decode {
            what: "store response",
            reason: error.to_string(),
        })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        encoded: &[u8],
        read_timeout: Duration,
    ) -> Result<Vec<u8>, StoreError> {
        write_frame(stream, encoded).await?;
        tokio::time::timeout(read_timeout, read_frame(stream))
            .await
            .map_err(|_| StoreError::Unavailable {
                reason: format!(
                    "no response from store {} within {}ms",
                    self.peer,
                    read_timeout.as_millis()
                ),
            })?
    }

    fn rpc_timeout() -> Duration {
        Duration::from_millis(RPC_READ_TIMEOUT_MS)
    }
}

#[async_trait]
impl CoordinationStore for TcpStoreClient {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let request = Request::Set {
            key: key.to_string(),
            value: value.to_vec(),
        };
        match self.round_trip(&request, Self::rpc_timeout()).await? {
            Response::Ok => Ok(()),
            Response::Failed { reason } => Err(StoreError::Unavailable { reason }),
            other => Err(StoreError::Protocol {
                reason: format!("unexpected response to set: {other:?}"),
            }),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let request = Request::Get { key: key.to_string() };
        match self.round_trip(&request, Self::rpc_timeout()).await? {
            Response::Value { value } => Ok(value),
            Response::NotFound { key } => Err(StoreError::NotFound { key }),
            Response::Failed { reason } => Err(StoreError::Unavailable { reason }),
            other => Err(StoreError::Protocol {
                reason: format!("unexpected response to get: {other:?}"),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let request = Request::Delete { key: key.to_string() };
        match self.round_trip(&request, Self::rpc_timeout()).await? {
            Response::Ok => Ok(()),
            Response::Failed { reason } => Err(StoreError::Unavailable { reason }),
            other => Err(StoreError::Protocol {
                reason: format!("unexpected response to delete: {other:?}"),
            }),
        }
    }

    async fn wait(&self, keys: &[String], timeout: Duration) -> Result<(), StoreError> {
        let request = Request::Wait {
            keys: keys.to_vec(),
            timeout_ms: timeout.as_millis() as u64,
        };
        // The server blocks for up to `timeout`; grant it that plus grace.
        let read_timeout = timeout + Duration::from_millis(WAIT_RESPONSE_GRACE_MS);
        match self.round_trip(&request, read_timeout).await? {
            Response::WaitOk => Ok(()),
            Response::WaitTimeout { duration_ms } => Err(StoreError::WaitTimeout { duration_ms }),
            Response::Failed { reason } => Err(StoreError::Unavailable { reason }),
            other => Err(StoreError::Protocol {
                reason: format!("unexpected response to wait: {other:?}"),
            }),
        }
    }
}
