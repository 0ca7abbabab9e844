/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferCoding {
    #[default]
    Identity,
    Chunked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered header list preserving first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header::new(name, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// First value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma-separated value of `name` equals `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.0
            .iter()
            .filter(|header| header.name.eq_ignore_ascii_case(name))
            .flat_map(|header| header.value.split(','))
            .any(|value| value.trim().eq_ignore_ascii_case(token))
    }

    /// Remove every header named `name`; returns the first removed value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_string);
        self.0
            .retain(|header| !header.name.eq_ignore_ascii_case(name));
        first
    }

    pub fn last_mut(&mut self) -> Option<&mut Header> {
        self.0.last_mut()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub major: u8,
    pub minor: u8,
    pub method: String,
    /// Request target exactly as received: origin-form, absolute-form, or
    /// authority-form (CONNECT).
    pub uri: String,
    pub host: String,
    pub port: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub transfer_coding: TransferCoding,
    pub content_length: Option<u64>,
    /// Both chunked and Content-Length were present; chunked won.
    pub ambiguous_framing: bool,
    pub headers_complete: bool,
    pub body_complete: bool,
    /// Forwarding may begin. Requests become deliverable after the full
    /// parse; they are re-encoded as one unit.
    pub deliverable: bool,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Keep-alive is the HTTP/1.1 default; HTTP/1.0 must opt in. A
    /// `close` token on either Connection or Proxy-Connection opts out.
    pub fn keep_alive(&self) -> bool {
        if self.connection_token("close") {
            return false;
        }
        if self.major == 1 && self.minor == 0 {
            return self.connection_token("keep-alive");
        }
        true
    }

    fn connection_token(&self, token: &str) -> bool {
        self.headers.has_token("Connection", token)
            || self.headers.has_token("Proxy-Connection", token)
    }

    /// Clear all parse state for keep-alive reuse.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub major: u8,
    pub minor: u8,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub transfer_coding: TransferCoding,
    pub content_length: Option<u64>,
    pub ambiguous_framing: bool,
    pub headers_complete: bool,
    pub body_complete: bool,
    /// Responses stream: deliverable once the status line and headers are
    /// parsed, ahead of the body.
    pub deliverable: bool,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A synthetic proxy-originated response (error replies and filter
    /// short-circuits).
    pub fn synthetic(status: u16, reason: &str, body: &[u8]) -> Self {
        let mut response = Self {
            major: 1,
            minor: 1,
            status,
            reason: reason.to_string(),
            body: body.to_vec(),
            content_length: Some(body.len() as u64),
            headers_complete: true,
            body_complete: true,
            deliverable: true,
            ..Self::default()
        };
        response
            .headers
            .push("Content-Length", body.len().to_string());
        response.headers.push("Connection", "close");
        response
    }

    /// Statuses that never carry a body regardless of framing headers.
    pub fn bodyless_status(status: u16) -> bool {
        (100..200).contains(&status) || status == 204 || status == 304
    }

    /// Identity framing with no Content-Length reads until peer EOF and
    /// therefore cannot keep the connection alive.
    pub fn close_delimited(&self) -> bool {
        self.transfer_coding == TransferCoding::Identity
            && self.content_length.is_none()
            && !Self::bodyless_status(self.status)
    }

    pub fn keep_alive(&self) -> bool {
        if self.close_delimited() {
            return false;
        }
        if self.headers.has_token("Connection", "close") {
            return false;
        }
        if self.major == 1 && self.minor == 0 {
            return self.headers.has_token("Connection", "keep-alive");
        }
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Reduce an absolute-form request target to origin-form for forwarding
/// to the origin server. Origin-form and authority-form targets pass
/// through unchanged.
pub fn origin_form(uri: &str) -> &str {
    let rest = match uri.split_once("://") {
        Some((scheme, rest)) if scheme.chars().all(|c| c.is_ascii_alphabetic()) => rest,
        _ => return uri,
    };
    match rest.find('/') {
        Some(index) => &rest[index..],
        None => "/",
    }
}
