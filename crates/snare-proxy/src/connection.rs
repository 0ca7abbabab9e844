use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use snare_http::ByteBuffer;

use crate::error::ProxyError;
use crate::transport::Transport;

const INBOUND_BUFFER_SIZE: usize = 8 * 1024;

/// Which side of the session a connection serves. The role decides the
/// handshake direction, the idle timeout, and which codec consumes the
/// inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// One side of a session: the socket façade, an 8 KiB inbound buffer with
/// carry-over for pipelined bytes, and a FIFO of outbound byte buffers
/// drained one write at a time.
pub struct Connection {
    id: u64,
    role: Role,
    transport: Option<Transport>,
    inbound: Vec<u8>,
    start: usize,
    end: usize,
    out_queue: std::collections::VecDeque<ByteBuffer>,
    writing: bool,
    connected: bool,
    handshaking: bool,
    stopped: bool,
    idle: Duration,
    host: String,
    port: u16,
    total_written: u64,
}

impl Connection {
    /// Wrap an accepted client socket.
    pub fn client(id: u64, stream: TcpStream, idle: Duration) -> Self {
        Self {
            id,
            role: Role::Client,
            transport: Some(Transport::Plain(stream)),
            inbound: vec![0; INBOUND_BUFFER_SIZE],
            start: 0,
            end: 0,
            out_queue: std::collections::VecDeque::new(),
            writing: false,
            connected: true,
            handshaking: false,
            stopped: false,
            idle,
            host: String::new(),
            port: 0,
            total_written: 0,
        }
    }

    /// A server-facing connection; [`Connection::connect`] resolves and
    /// dials the stored target.
    pub fn server(id: u64, host: String, port: u16, idle: Duration) -> Self {
        Self {
            id,
            role: Role::Server,
            transport: None,
            inbound: vec![0; INBOUND_BUFFER_SIZE],
            start: 0,
            end: 0,
            out_queue: std::collections::VecDeque::new(),
            writing: false,
            connected: false,
            handshaking: false,
            stopped: false,
            idle,
            host,
            port,
            total_written: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_open(&self) -> bool {
        self.connected && !self.stopped
    }

    pub fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    pub fn matches_target(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(host)
    }

    /// Total bytes put on the wire by [`Connection::drain`].
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Resolve the stored target through the runtime's resolver and dial
    /// the first address that accepts.
    pub async fn connect(&mut self) -> Result<(), ProxyError> {
        let authority = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| ProxyError::Resolve {
                authority: authority.clone(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ProxyError::Resolve {
                authority,
                source: io::Error::new(io::ErrorKind::NotFound, "resolver returned no addresses"),
            });
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    self.transport = Some(Transport::Plain(stream));
                    self.connected = true;
                    return Ok(());
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(ProxyError::Io(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "connect failed")
        })))
    }

    /// Read at least one byte, or serve bytes left over from a previous
    /// read (pipelined requests). Returns 0 on peer EOF. Guarded by the
    /// role's idle timer, which re-arms on every call.
    pub async fn read_some(&mut self) -> Result<usize, ProxyError> {
        if self.stopped || !self.connected {
            return Err(ProxyError::Protocol("read on inactive connection"));
        }
        if self.start < self.end {
            return Ok(self.end - self.start);
        }

        let transport = self
            .transport
            .as_mut()
            .ok_or(ProxyError::Protocol("read before connect"))?;
        let read = match timeout(self.idle, transport.read(&mut self.inbound)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProxyError::Timeout {
                    side: self.role.label(),
                    timeout: self.idle,
                });
            }
        };
        self.start = 0;
        self.end = read;
        Ok(read)
    }

    /// The unconsumed portion of the last read.
    pub fn chunk(&self) -> &[u8] {
        &self.inbound[self.start..self.end]
    }

    pub fn mark_consumed(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    pub fn enqueue(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.out_queue.push_back(ByteBuffer::from_vec(bytes));
    }

    /// Drain the outbound FIFO. At most one drain runs at a time; a short
    /// write consumes the written prefix and resubmits the remainder.
    pub async fn drain(&mut self) -> Result<(), ProxyError> {
        if self.writing {
            return Ok(());
        }
        if self.stopped {
            return Err(ProxyError::Protocol("write on stopped connection"));
        }
        self.writing = true;
        let result = self.drain_queue().await;
        self.writing = false;
        result
    }

    async fn drain_queue(&mut self) -> Result<(), ProxyError> {
        while let Some(front) = self.out_queue.front_mut() {
            if front.is_empty() {
                self.out_queue.pop_front();
                continue;
            }
            let transport = self
                .transport
                .as_mut()
                .ok_or(ProxyError::Protocol("write before connect"))?;
            let written = transport.write(front.unread()).await?;
            if written == 0 {
                return Err(ProxyError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                )));
            }
            self.total_written += written as u64;
            if written < front.len() {
                front.consume(written);
                continue;
            }
            self.out_queue.pop_front();
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.flush().await?;
        }
        Ok(())
    }

    pub async fn write_raw(&mut self, bytes: Vec<u8>) -> Result<(), ProxyError> {
        self.enqueue(bytes);
        self.drain().await
    }

    /// Switch the client-facing socket to TLS server mode. One-way.
    pub async fn upgrade_server_tls(&mut self, config: Arc<ServerConfig>) -> Result<(), ProxyError> {
        let transport = self
            .transport
            .take()
            .ok_or(ProxyError::Protocol("handshake before connect"))?;
        self.handshaking = true;
        let result = transport.into_server_tls(config).await;
        self.handshaking = false;
        match result {
            Ok(upgraded) => {
                self.transport = Some(upgraded);
                Ok(())
            }
            Err(source) => {
                self.connected = false;
                Err(ProxyError::Tls {
                    side: self.role.label(),
                    source,
                })
            }
        }
    }

    /// Switch the server-facing socket to TLS client mode. One-way.
    pub async fn upgrade_client_tls(
        &mut self,
        config: Arc<ClientConfig>,
        server_name: &str,
    ) -> Result<(), ProxyError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ProxyError::Protocol("target is not a valid TLS server name"))?;
        let transport = self
            .transport
            .take()
            .ok_or(ProxyError::Protocol("handshake before connect"))?;
        self.handshaking = true;
        let result = transport.into_client_tls(config, name).await;
        self.handshaking = false;
        match result {
            Ok(upgraded) => {
                self.transport = Some(upgraded);
                Ok(())
            }
            Err(source) => {
                self.connected = false;
                Err(ProxyError::Tls {
                    side: self.role.label(),
                    source,
                })
            }
        }
    }

    /// Shut down the write half, leaving the read half open for the peer
    /// to finish.
    pub async fn half_close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.shutdown().await;
        }
    }

    /// Idempotent: closes the socket and discards pending output. No
    /// events are delivered for a stopped connection.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.connected = false;
        self.out_queue.clear();
        self.transport = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Prepare for the next exchange on a kept-alive connection: pending
    /// output is dropped, inbound carry-over stays (pipelined requests),
    /// and the idle timer re-arms on the next read.
    pub fn reset(&mut self) {
        self.out_queue.clear();
        self.writing = false;
    }
}
