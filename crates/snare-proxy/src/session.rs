use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use snare_filter::ChainVerdict;
use snare_http::{
    encode_chunk, encode_request, encode_response, encode_response_head, origin_form,
    HttpRequest, HttpResponse, RequestDecoder, ResponseDecoder, TransferCoding, LAST_CHUNK,
};
use snare_observe::{Event, EventType, SessionScope};
use tokio::net::TcpStream;

use crate::connection::Connection;
use crate::error::ProxyError;
use crate::server::ProxyShared;

/// Literal tunnel-establishment reply sent on the plain client socket
/// before the local TLS handshake.
pub const TUNNEL_ESTABLISHED_REPLY: &[u8] =
    b"HTTP/1.1 200 Connection Established\r\nProxy-Connection: Keep-Alive\r\n\r\n";

/// Tunnel/forward machine states. Every transition is emitted through the
/// event sink, so the sequence is observable from outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    AwaitRequest,
    TunnelSetup,
    ResolveRemote,
    RemoteConnect,
    RemoteHandshake,
    ForwardRequest,
    AwaitResponse,
    ForwardResponse,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::AwaitRequest => "await_request",
            Self::TunnelSetup => "tunnel_setup",
            Self::ResolveRemote => "resolve_remote",
            Self::RemoteConnect => "remote_connect",
            Self::RemoteHandshake => "remote_handshake",
            Self::ForwardRequest => "forward_request",
            Self::AwaitResponse => "await_response",
            Self::ForwardResponse => "forward_response",
            Self::Terminated => "terminated",
        }
    }
}

/// State shared between the two halves of a session.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub https: bool,
    /// The client used absolute-form targets, i.e. it knows it is talking
    /// to a proxy over plain HTTP.
    pub proxied: bool,
    pub remote_host: String,
    pub remote_port: u16,
    pub request: HttpRequest,
    pub response: HttpResponse,
}

/// One intercepted client connection paired with its server-facing
/// connection, driven through the tunnel/forward state machine. The
/// session owns both connections exclusively; everything runs on the task
/// that accepted the client socket.
pub struct Session {
    id: u64,
    state: SessionState,
    client: Connection,
    server: Option<Connection>,
    ctx: SessionContext,
    request_decoder: RequestDecoder,
    response_decoder: ResponseDecoder,
    shared: Arc<ProxyShared>,
    client_addr: String,
    response_forwarded: bool,
}

impl Session {
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, shared: Arc<ProxyShared>) -> Self {
        let client = Connection::client(
            shared.allocate_connection_id(),
            stream,
            shared.config.client_idle(),
        );
        Self {
            id,
            state: SessionState::Accepted,
            client,
            server: None,
            ctx: SessionContext::default(),
            request_decoder: RequestDecoder::new(),
            response_decoder: ResponseDecoder::new(),
            shared,
            client_addr: peer.to_string(),
            response_forwarded: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn run(mut self) {
        self.emit(Event::new(EventType::SessionAccepted, self.scope()));

        match self.drive().await {
            Ok(reason) => {
                tracing::debug!(session = self.id, reason, "session finished");
                self.finish(reason, None).await;
            }
            Err(error) => {
                let code = error.code();
                tracing::debug!(session = self.id, code, %error, "session failed");
                self.handle_failure(&error).await;
                self.finish(code, Some(error.to_string())).await;
            }
        }
    }

    async fn drive(&mut self) -> Result<&'static str, ProxyError> {
        loop {
            self.enter(SessionState::AwaitRequest);
            if !self.read_request().await? {
                return Ok("client_closed");
            }
            self.emit_request_headers();

            if self.ctx.request.is_connect() {
                if self.ctx.https {
                    return Err(ProxyError::Protocol("CONNECT inside an established tunnel"));
                }
                self.establish_tunnel().await?;
                // The decoder was re-armed; the next client bytes are the
                // plaintext request inside the tunnel.
                if !self.read_request().await? {
                    return Ok("client_closed");
                }
                self.emit_request_headers();
            }

            match self
                .shared
                .filters
                .apply_request_headers(&mut self.ctx.request)
            {
                ChainVerdict::Forward => {}
                ChainVerdict::ShortCircuit(response) => {
                    tracing::debug!(session = self.id, status = response.status, "short-circuit");
                    // The synthetic reply advertises Connection: close, so
                    // the exchange ends here.
                    self.send_synthetic(response).await?;
                    return Ok("completed");
                }
            }

            self.select_target()?;
            self.ensure_server_connection().await?;
            self.forward_request().await?;
            let keep_alive = self.relay_response().await?;

            if !keep_alive {
                return Ok("completed");
            }
            self.reset_exchange();
        }
    }

    /// Read until the current request is complete. Returns false on a
    /// clean EOF between requests; EOF mid-message is an error.
    async fn read_request(&mut self) -> Result<bool, ProxyError> {
        while !self.ctx.request.body_complete {
            let available = self.client.read_some().await?;
            if available == 0 {
                if self.request_decoder.is_fresh() {
                    return Ok(false);
                }
                return Err(ProxyError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed mid-request",
                )));
            }

            let consumed = self
                .request_decoder
                .decode(self.client.chunk(), &mut self.ctx.request)?;
            self.client.mark_consumed(consumed);

            if !self.ctx.request.headers_complete
                && self.request_decoder.head_len() > self.shared.config.max_header_bytes
            {
                return Err(ProxyError::Protocol("request head exceeds configured limit"));
            }
        }

        if self.ctx.request.ambiguous_framing {
            tracing::warn!(
                session = self.id,
                "request carried both chunked and Content-Length framing; chunked wins"
            );
        }
        Ok(true)
    }

    /// CONNECT sequence: store the target, acknowledge the tunnel on the
    /// plain socket, switch the client socket to TLS with the minted leaf,
    /// then re-arm the request decoder for the plaintext request.
    async fn establish_tunnel(&mut self) -> Result<(), ProxyError> {
        self.enter(SessionState::TunnelSetup);

        let host = self.ctx.request.host.clone();
        let port = self.ctx.request.port;
        if host.is_empty() {
            return Err(ProxyError::Protocol("CONNECT target has no host"));
        }
        self.ctx.https = true;
        self.ctx.remote_host = host.clone();
        self.ctx.remote_port = port;

        self.client.write_raw(TUNNEL_ESTABLISHED_REPLY.to_vec()).await?;

        let leaf = self.shared.authority.leaf_for_host(&host)?;
        tracing::debug!(session = self.id, %host, cn = %leaf.common_name, "local handshake");
        self.emit_tls(EventType::TlsHandshakeStarted, "client");
        match self
            .client
            .upgrade_server_tls(Arc::clone(&leaf.server_config))
            .await
        {
            Ok(()) => self.emit_tls(EventType::TlsHandshakeSucceeded, "client"),
            Err(error) => {
                self.emit_tls(EventType::TlsHandshakeFailed, "client");
                return Err(error);
            }
        }

        self.request_decoder = RequestDecoder::new();
        self.ctx.request.reset();
        Ok(())
    }

    fn select_target(&mut self) -> Result<(), ProxyError> {
        if self.ctx.https {
            if self.ctx.remote_host.is_empty() {
                return Err(ProxyError::Protocol("tunnel target missing"));
            }
            return Ok(());
        }

        let request = &self.ctx.request;
        if request.host.is_empty() {
            return Err(ProxyError::Protocol("request carries no resolvable host"));
        }
        self.ctx.proxied =
            request.uri.starts_with("http://") || request.uri.starts_with("https://");
        self.ctx.remote_host = request.host.clone();
        self.ctx.remote_port = request.port;
        Ok(())
    }

    /// Reuse the server connection when the target matches and it is still
    /// open; otherwise resolve, dial, and (inside a tunnel) handshake.
    async fn ensure_server_connection(&mut self) -> Result<(), ProxyError> {
        self.enter(SessionState::ResolveRemote);
        let host = self.ctx.remote_host.clone();
        let port = self.ctx.remote_port;

        let reusable = self
            .server
            .as_ref()
            .is_some_and(|server| server.is_open() && server.matches_target(&host, port));
        self.enter(SessionState::RemoteConnect);
        if reusable {
            return Ok(());
        }

        if let Some(mut stale) = self.server.take() {
            stale.stop();
        }

        let mut server = Connection::server(
            self.shared.allocate_connection_id(),
            host.clone(),
            port,
            self.shared.config.server_idle(),
        );
        server.connect().await?;
        tracing::debug!(session = self.id, %host, port, "origin connected");

        if self.ctx.https {
            self.enter(SessionState::RemoteHandshake);
            self.emit_tls(EventType::TlsHandshakeStarted, "server");
            match server
                .upgrade_client_tls(Arc::clone(&self.shared.upstream_tls), &host)
                .await
            {
                Ok(()) => self.emit_tls(EventType::TlsHandshakeSucceeded, "server"),
                Err(error) => {
                    self.emit_tls(EventType::TlsHandshakeFailed, "server");
                    return Err(error);
                }
            }
        }

        self.server = Some(server);
        Ok(())
    }

    async fn forward_request(&mut self) -> Result<(), ProxyError> {
        self.enter(SessionState::ForwardRequest);

        if self.ctx.proxied && !self.ctx.https {
            let rewritten = origin_form(&self.ctx.request.uri).to_string();
            self.ctx.request.uri = rewritten;
        }

        let bytes = encode_request(&self.ctx.request);
        let server = self
            .server
            .as_mut()
            .ok_or(ProxyError::Protocol("forward without a server connection"))?;
        server.enqueue(bytes);
        server.drain().await
    }

    /// Read the response and stream it to the client: headers as soon as
    /// they complete, each decoded body segment as it arrives, re-framed
    /// per the response's transfer coding.
    async fn relay_response(&mut self) -> Result<bool, ProxyError> {
        self.enter(SessionState::AwaitResponse);

        loop {
            let server = self
                .server
                .as_mut()
                .ok_or(ProxyError::Protocol("response without a server connection"))?;
            let available = server.read_some().await?;

            if available == 0 {
                if !self.ctx.response.headers_complete {
                    return Err(ProxyError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "origin closed before response headers",
                    )));
                }
                if self.response_decoder.finish_eof(&mut self.ctx.response) {
                    break;
                }
                return Err(ProxyError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "origin closed mid-response",
                )));
            }

            let body_len_before = self.ctx.response.body.len();
            let consumed = self
                .response_decoder
                .decode(server.chunk(), &mut self.ctx.response)?;
            server.mark_consumed(consumed);

            if !self.ctx.response.headers_complete
                && self.response_decoder.head_len() > self.shared.config.max_header_bytes
            {
                return Err(ProxyError::Protocol("response head exceeds configured limit"));
            }

            if self.ctx.response.headers_complete && !self.response_forwarded {
                if self.ctx.response.ambiguous_framing {
                    tracing::warn!(
                        session = self.id,
                        "response carried both chunked and Content-Length framing; chunked wins"
                    );
                }
                match self
                    .shared
                    .filters
                    .apply_response_headers(&mut self.ctx.response)
                {
                    ChainVerdict::Forward => {}
                    ChainVerdict::ShortCircuit(synthetic) => {
                        // The origin stream state is unknown from here on;
                        // answer the client and drop the exchange.
                        self.send_synthetic(synthetic).await?;
                        return Ok(false);
                    }
                }
                self.emit_response_headers();
                self.enter(SessionState::ForwardResponse);
                self.client
                    .enqueue(encode_response_head(&self.ctx.response));
                self.response_forwarded = true;
            }

            if self.response_forwarded {
                let body_len = self.ctx.response.body.len();
                if body_len > body_len_before {
                    let segment = self.ctx.response.body[body_len_before..body_len].to_vec();
                    let segment = self.shared.filters.apply_body_chunk(segment);
                    self.emit(
                        Event::new(EventType::BodyChunk, self.scope())
                            .with_attribute("bytes", segment.len().to_string()),
                    );
                    match self.ctx.response.transfer_coding {
                        TransferCoding::Chunked => self.client.enqueue(encode_chunk(&segment)),
                        TransferCoding::Identity => self.client.enqueue(segment),
                    }
                }
                self.client.drain().await?;
            }

            if self.ctx.response.body_complete {
                break;
            }
        }

        if self.ctx.response.transfer_coding == TransferCoding::Chunked {
            self.client.enqueue(LAST_CHUNK.to_vec());
        }
        self.client.drain().await?;

        Ok(self.ctx.request.keep_alive() && self.ctx.response.keep_alive())
    }

    /// Write a proxy-originated response in place of an origin exchange.
    async fn send_synthetic(&mut self, response: HttpResponse) -> Result<(), ProxyError> {
        self.ctx.response = response;
        self.enter(SessionState::ForwardResponse);
        self.emit_response_headers();
        self.client.enqueue(encode_response(&self.ctx.response));
        self.response_forwarded = true;
        self.client.drain().await
    }

    fn reset_exchange(&mut self) {
        self.client.reset();
        if let Some(server) = self.server.as_mut() {
            server.reset();
        }
        self.request_decoder = RequestDecoder::new();
        self.response_decoder = ResponseDecoder::new();
        self.ctx.request.reset();
        self.ctx.response.reset();
        self.response_forwarded = false;
    }

    /// Error policy: before any response bytes have been forwarded, plain
    /// HTTP clients get a synthetic reply (400 for their own malformed
    /// bytes, 502 otherwise); inside a TLS tunnel the session terminates
    /// silently. After forwarding has begun, a decode error on the
    /// response half-closes the client and everything else just stops.
    async fn handle_failure(&mut self, error: &ProxyError) {
        if matches!(error, ProxyError::Cancelled) {
            return;
        }
        if self.response_forwarded {
            if error.is_decode() {
                self.client.half_close().await;
            }
            return;
        }
        if self.ctx.https {
            return;
        }
        let synthetic = if error.is_decode() {
            HttpResponse::synthetic(400, "Bad Request", b"")
        } else {
            HttpResponse::synthetic(502, "Bad Gateway", b"")
        };
        if self.send_synthetic(synthetic).await.is_err() {
            tracing::trace!(session = self.id, "error reply could not be written");
        }
    }

    async fn finish(&mut self, reason: &'static str, detail: Option<String>) {
        self.enter(SessionState::Terminated);
        self.client.stop();
        if let Some(server) = self.server.as_mut() {
            server.stop();
        }

        let mut event = Event::new(EventType::SessionClosed, self.scope())
            .with_attribute("reason_code", reason);
        if let Some(detail) = detail {
            event = event.with_attribute("reason_detail", detail);
        }
        self.emit(event);
    }

    fn enter(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        tracing::trace!(
            session = self.id,
            from = from.as_str(),
            to = next.as_str(),
            "transition"
        );
        self.emit(
            Event::new(EventType::StateChanged, self.scope())
                .with_attribute("from", from.as_str())
                .with_attribute("to", next.as_str()),
        );
    }

    fn scope(&self) -> SessionScope {
        SessionScope {
            session_id: self.id,
            client_addr: self.client_addr.clone(),
            remote_host: self.ctx.remote_host.clone(),
            remote_port: self.ctx.remote_port,
            https: self.ctx.https,
        }
    }

    fn emit(&self, event: Event) {
        self.shared.events.emit(event);
    }

    fn emit_tls(&self, kind: EventType, peer: &'static str) {
        self.emit(Event::new(kind, self.scope()).with_attribute("peer", peer));
    }

    fn emit_request_headers(&self) {
        let request = &self.ctx.request;
        self.emit(
            Event::new(EventType::RequestHeaders, self.scope())
                .with_attribute("method", request.method.clone())
                .with_attribute("target", request.uri.clone())
                .with_attribute("version", format!("HTTP/{}.{}", request.major, request.minor))
                .with_attribute("header_count", request.headers.len().to_string()),
        );
    }

    fn emit_response_headers(&self) {
        let response = &self.ctx.response;
        self.emit(
            Event::new(EventType::ResponseHeaders, self.scope())
                .with_attribute("status", response.status.to_string())
                .with_attribute("reason", response.reason.clone())
                .with_attribute("header_count", response.headers.len().to_string()),
        );
    }
}
