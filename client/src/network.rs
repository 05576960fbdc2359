//! Client side of the wire protocol
//!
//! The client loop is single-threaded, so requests are synchronous: each one
//! sends a datagram and blocks until the matching reply arrives or the
//! request deadline passes.

use log::{debug, trace, warn};
use shared::{Packet, Request, Response, SyncError, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unexpected response to {request}: {response:?}")]
    UnexpectedResponse {
        request: &'static str,
        response: Response,
    },
}

impl ClientError {
    /// Transient errors skip the current tick and are retried on the next one
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Sync(e) => e.is_transient(),
            ClientError::Io(_) => true,
            ClientError::Codec(_) | ClientError::UnexpectedResponse { .. } => false,
        }
    }

    pub fn sync_error(&self) -> Option<&SyncError> {
        match self {
            ClientError::Sync(e) => Some(e),
            _ => None,
        }
    }
}

/// Request/response channel to a sync server
pub trait Transport {
    /// Sends `request` and waits for its reply
    ///
    /// A `Response::Error` is returned as `Ok`; only failures to obtain a
    /// reply at all (timeouts, I/O, decoding) are `Err`.
    fn request(&mut self, request: Request) -> Result<Response, ClientError>;
}

/// Blocking UDP transport with a per-request deadline
///
/// Owns a current-thread runtime so the async socket can be driven from
/// the synchronous client loop.
pub struct UdpTransport {
    runtime: Runtime,
    socket: UdpSocket,
    server_addr: SocketAddr,
    timeout: Duration,
    next_request_id: u32,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn connect(server_addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let socket = runtime.block_on(UdpSocket::bind(bind_addr))?;
        debug!(
            "Client socket bound to {}, server at {}",
            socket.local_addr()?,
            server_addr
        );

        Ok(Self {
            runtime,
            socket,
            server_addr,
            timeout,
            next_request_id: 1,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

/// Sends one request and waits for the reply carrying the same id
async fn exchange(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    buffer: &mut [u8],
    data: &[u8],
    id: u32,
) -> Result<Response, ClientError> {
    socket.send_to(data, server_addr).await?;
    loop {
        let (len, from) = socket.recv_from(buffer).await?;
        if from != server_addr {
            trace!("Ignoring datagram from {}", from);
            continue;
        }
        match Packet::decode(&buffer[..len]) {
            Ok(Packet::Response { id: reply_id, body }) if reply_id == id => return Ok(body),
            Ok(Packet::Response { id: reply_id, .. }) => {
                // Late reply to a request that already timed out
                trace!("Discarding stale reply {} (waiting for {})", reply_id, id);
            }
            Ok(Packet::Request { .. }) => trace!("Ignoring request packet from server"),
            Err(e) => warn!("Undecodable reply: {}", e),
        }
    }
}

impl Transport for UdpTransport {
    fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let data = Packet::Request { id, body: request }.encode()?;

        let timeout = self.timeout;
        let reply = exchange(&self.socket, self.server_addr, &mut self.buffer, &data, id);

        match self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, reply).await })
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout.into()),
        }
    }
}
