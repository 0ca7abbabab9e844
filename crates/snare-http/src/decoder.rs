use thiserror::Error;

use crate::message::{Headers, HttpRequest, HttpResponse, TransferCoding};

/// Malformed wire bytes. Each variant names the rule that was violated so
/// close reasons stay diagnosable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("request method must be ASCII alphabetic")]
    InvalidMethod,
    #[error("request target contains control bytes")]
    InvalidUri,
    #[error("malformed HTTP version")]
    InvalidVersion,
    #[error("HTTP version digits overflowed")]
    VersionOverflow,
    #[error("CR not followed by LF")]
    MissingLineFeed,
    #[error("invalid header name byte")]
    InvalidHeaderName,
    #[error("invalid header value byte")]
    InvalidHeaderValue,
    #[error("malformed response status code")]
    InvalidStatus,
    #[error("invalid reason phrase byte")]
    InvalidReason,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("invalid chunk size line")]
    InvalidChunkSize,
    #[error("invalid chunk terminator")]
    InvalidChunkTerminator,
    #[error("malformed chunked trailer section")]
    InvalidTrailer,
    #[error("malformed authority")]
    InvalidAuthority,
    #[error("invalid port number")]
    InvalidPort,
}

fn is_ctl(byte: u8) -> bool {
    byte < 0x20 || byte == 0x7f
}

fn is_token_char(byte: u8) -> bool {
    if !(0x21..=0x7e).contains(&byte) {
        return false;
    }
    !matches!(
        byte,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
    )
}

fn accumulate_decimal(value: u8, byte: u8) -> Result<u8, DecodeError> {
    value
        .checked_mul(10)
        .and_then(|v| v.checked_add(byte - b'0'))
        .ok_or(DecodeError::VersionOverflow)
}

/// Parse `host[:port]`, bracketed IPv6 included. A missing port falls back
/// to `default_port`.
pub fn parse_authority(authority: &str, default_port: u16) -> Result<(String, u16), DecodeError> {
    if authority.is_empty() {
        return Err(DecodeError::InvalidAuthority);
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let close = rest.find(']').ok_or(DecodeError::InvalidAuthority)?;
        let host = &rest[..close];
        if host.is_empty() {
            return Err(DecodeError::InvalidAuthority);
        }
        let suffix = &rest[close + 1..];
        if suffix.is_empty() {
            return Ok((host.to_string(), default_port));
        }
        let port_text = suffix.strip_prefix(':').ok_or(DecodeError::InvalidAuthority)?;
        let port = port_text.parse().map_err(|_| DecodeError::InvalidPort)?;
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Err(DecodeError::InvalidAuthority),
        Some((host, port_text)) => {
            if host.is_empty() {
                return Err(DecodeError::InvalidAuthority);
            }
            let port = port_text.parse().map_err(|_| DecodeError::InvalidPort)?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

/// Header-section machine shared by both decoders:
/// `(NAME ':' OWS VALUE CRLF [+ LWS continuation])* CRLF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum HeaderState {
    #[default]
    LineStart,
    Lws,
    Name,
    ValueOws,
    Value,
    LineLf,
    FinalLf,
}

#[derive(Debug, Default)]
struct HeaderParser {
    state: HeaderState,
}

impl HeaderParser {
    /// Feed one byte; returns `true` once the terminating blank line is
    /// consumed.
    fn feed(&mut self, byte: u8, headers: &mut Headers) -> Result<bool, DecodeError> {
        match self.state {
            HeaderState::LineStart => {
                if byte == b'\r' {
                    self.state = HeaderState::FinalLf;
                } else if (byte == b' ' || byte == b'\t') && !headers.is_empty() {
                    self.state = HeaderState::Lws;
                } else if is_token_char(byte) {
                    headers.push((byte as char).to_string(), String::new());
                    self.state = HeaderState::Name;
                } else {
                    return Err(DecodeError::InvalidHeaderName);
                }
            }
            HeaderState::Lws => {
                if byte == b'\r' {
                    self.state = HeaderState::LineLf;
                } else if byte == b' ' || byte == b'\t' {
                    // still trimming the continuation's leading whitespace
                } else if is_ctl(byte) {
                    return Err(DecodeError::InvalidHeaderValue);
                } else if let Some(header) = headers.last_mut() {
                    header.value.push(byte as char);
                    self.state = HeaderState::Value;
                }
            }
            HeaderState::Name => {
                if byte == b':' {
                    self.state = HeaderState::ValueOws;
                } else if is_token_char(byte) {
                    if let Some(header) = headers.last_mut() {
                        header.name.push(byte as char);
                    }
                } else {
                    return Err(DecodeError::InvalidHeaderName);
                }
            }
            HeaderState::ValueOws => {
                if byte == b' ' || byte == b'\t' {
                    // optional whitespace before the value
                } else if byte == b'\r' {
                    self.state = HeaderState::LineLf;
                } else if is_ctl(byte) {
                    return Err(DecodeError::InvalidHeaderValue);
                } else if let Some(header) = headers.last_mut() {
                    header.value.push(byte as char);
                    self.state = HeaderState::Value;
                }
            }
            HeaderState::Value => {
                if byte == b'\r' {
                    self.state = HeaderState::LineLf;
                } else if is_ctl(byte) && byte != b'\t' {
                    return Err(DecodeError::InvalidHeaderValue);
                } else if let Some(header) = headers.last_mut() {
                    header.value.push(byte as char);
                }
            }
            HeaderState::LineLf => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingLineFeed);
                }
                self.state = HeaderState::LineStart;
            }
            HeaderState::FinalLf => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingLineFeed);
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Body framing machine. Chunked framing runs byte-at-a-time over the
/// size lines and bulk-copies chunk data; trailers are consumed up to the
/// terminating blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Complete,
    Exact { remaining: u64 },
    UntilEof,
    ChunkSizeStart,
    ChunkSize { size: u64 },
    ChunkExt { size: u64 },
    ChunkSizeLf { size: u64 },
    ChunkData { remaining: u64 },
    ChunkDataCr,
    ChunkDataLf,
    TrailerStart,
    TrailerLine,
    TrailerLineLf,
    TrailerFinalLf,
}

#[derive(Debug)]
pub(crate) struct BodyReader {
    state: BodyState,
}

impl BodyReader {
    fn empty() -> Self {
        Self {
            state: BodyState::Complete,
        }
    }

    fn exact(length: u64) -> Self {
        if length == 0 {
            Self::empty()
        } else {
            Self {
                state: BodyState::Exact { remaining: length },
            }
        }
    }

    fn chunked() -> Self {
        Self {
            state: BodyState::ChunkSizeStart,
        }
    }

    fn until_eof() -> Self {
        Self {
            state: BodyState::UntilEof,
        }
    }

    fn is_complete(&self) -> bool {
        self.state == BodyState::Complete
    }

    fn is_eof_delimited(&self) -> bool {
        self.state == BodyState::UntilEof
    }

    fn finish_eof(&mut self) -> bool {
        if self.state == BodyState::UntilEof {
            self.state = BodyState::Complete;
            true
        } else {
            false
        }
    }

    fn feed(&mut self, input: &[u8], body: &mut Vec<u8>) -> Result<usize, DecodeError> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                BodyState::Complete => break,
                BodyState::Exact { remaining } => {
                    let take = (input.len() - pos).min(remaining as usize);
                    body.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        BodyState::Complete
                    } else {
                        BodyState::Exact { remaining }
                    };
                }
                BodyState::UntilEof => {
                    body.extend_from_slice(&input[pos..]);
                    pos = input.len();
                }
                BodyState::ChunkSizeStart => {
                    let digit = hex_digit(input[pos]).ok_or(DecodeError::InvalidChunkSize)?;
                    self.state = BodyState::ChunkSize { size: digit as u64 };
                    pos += 1;
                }
                BodyState::ChunkSize { size } => {
                    let byte = input[pos];
                    pos += 1;
                    if let Some(digit) = hex_digit(byte) {
                        let size = size
                            .checked_mul(16)
                            .and_then(|s| s.checked_add(digit as u64))
                            .ok_or(DecodeError::InvalidChunkSize)?;
                        self.state = BodyState::ChunkSize { size };
                    } else if byte == b';' {
                        self.state = BodyState::ChunkExt { size };
                    } else if byte == b'\r' {
                        self.state = BodyState::ChunkSizeLf { size };
                    } else {
                        return Err(DecodeError::InvalidChunkSize);
                    }
                }
                BodyState::ChunkExt { size } => {
                    if input[pos] == b'\r' {
                        self.state = BodyState::ChunkSizeLf { size };
                    }
                    pos += 1;
                }
                BodyState::ChunkSizeLf { size } => {
                    if input[pos] != b'\n' {
                        return Err(DecodeError::InvalidChunkTerminator);
                    }
                    pos += 1;
                    self.state = if size == 0 {
                        BodyState::TrailerStart
                    } else {
                        BodyState::ChunkData { remaining: size }
                    };
                }
                BodyState::ChunkData { remaining } => {
                    let take = (input.len() - pos).min(remaining as usize);
                    body.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        BodyState::ChunkDataCr
                    } else {
                        BodyState::ChunkData { remaining }
                    };
                }
                BodyState::ChunkDataCr => {
                    if input[pos] != b'\r' {
                        return Err(DecodeError::InvalidChunkTerminator);
                    }
                    pos += 1;
                    self.state = BodyState::ChunkDataLf;
                }
                BodyState::ChunkDataLf => {
                    if input[pos] != b'\n' {
                        return Err(DecodeError::InvalidChunkTerminator);
                    }
                    pos += 1;
                    self.state = BodyState::ChunkSizeStart;
                }
                BodyState::TrailerStart => {
                    let byte = input[pos];
                    pos += 1;
                    if byte == b'\r' {
                        self.state = BodyState::TrailerFinalLf;
                    } else if byte == b'\n' {
                        return Err(DecodeError::InvalidTrailer);
                    } else {
                        self.state = BodyState::TrailerLine;
                    }
                }
                BodyState::TrailerLine => {
                    if input[pos] == b'\r' {
                        self.state = BodyState::TrailerLineLf;
                    }
                    pos += 1;
                }
                BodyState::TrailerLineLf => {
                    if input[pos] != b'\n' {
                        return Err(DecodeError::InvalidTrailer);
                    }
                    pos += 1;
                    self.state = BodyState::TrailerStart;
                }
                BodyState::TrailerFinalLf => {
                    if input[pos] != b'\n' {
                        return Err(DecodeError::InvalidTrailer);
                    }
                    pos += 1;
                    self.state = BodyState::Complete;
                }
            }
        }
        Ok(pos)
    }
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Compute body framing once a header section completes. Chunked wins a
/// conflict with Content-Length; the conflict itself is reported so the
/// session can log the protocol warning.
struct Framing {
    transfer_coding: TransferCoding,
    content_length: Option<u64>,
    ambiguous: bool,
}

fn resolve_framing(headers: &Headers) -> Result<Framing, DecodeError> {
    let chunked = headers.has_token("Transfer-Encoding", "chunked");
    let mut content_length = None;
    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Content-Length") {
            let parsed = header
                .value
                .trim()
                .parse::<u64>()
                .map_err(|_| DecodeError::InvalidContentLength)?;
            content_length = Some(parsed);
        }
    }

    let ambiguous = chunked && content_length.is_some();
    Ok(Framing {
        transfer_coding: if chunked {
            TransferCoding::Chunked
        } else {
            TransferCoding::Identity
        },
        content_length: if chunked { None } else { content_length },
        ambiguous,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RequestState {
    #[default]
    Start,
    Method,
    Uri,
    VersionH,
    VersionHt,
    VersionHtt,
    VersionHttp,
    VersionSlash,
    MajorStart,
    Major,
    MinorStart,
    Minor,
    RequestLineLf,
    HeaderSection,
    Body,
    Done,
}

/// Incremental request decoder. `decode` consumes as much of the input as
/// the message needs and returns the consumed count; the count is short of
/// the input length only when the message completed mid-buffer.
#[derive(Debug)]
pub struct RequestDecoder {
    state: RequestState,
    headers: HeaderParser,
    body: BodyReader,
    head_len: usize,
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self {
            state: RequestState::Start,
            headers: HeaderParser::default(),
            body: BodyReader::empty(),
            head_len: 0,
        }
    }

    /// Bytes consumed by the request line and header section so far.
    pub fn head_len(&self) -> usize {
        self.head_len
    }

    /// True before the first byte of a message has been consumed.
    pub fn is_fresh(&self) -> bool {
        self.state == RequestState::Start && self.head_len == 0
    }

    pub fn decode(&mut self, input: &[u8], request: &mut HttpRequest) -> Result<usize, DecodeError> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                RequestState::Done => break,
                RequestState::Body => {
                    pos += self.body.feed(&input[pos..], &mut request.body)?;
                    if self.body.is_complete() {
                        self.finish_body(request);
                        break;
                    }
                }
                RequestState::HeaderSection => {
                    let byte = input[pos];
                    pos += 1;
                    self.head_len += 1;
                    if self.headers.feed(byte, &mut request.headers)? {
                        self.finish_headers(request)?;
                        if self.body.is_complete() {
                            self.finish_body(request);
                            break;
                        }
                        self.state = RequestState::Body;
                    }
                }
                _ => {
                    let byte = input[pos];
                    pos += 1;
                    self.head_len += 1;
                    self.feed_request_line(byte, request)?;
                }
            }
        }
        Ok(pos)
    }

    fn feed_request_line(&mut self, byte: u8, request: &mut HttpRequest) -> Result<(), DecodeError> {
        match self.state {
            RequestState::Start => {
                if !byte.is_ascii_alphabetic() {
                    return Err(DecodeError::InvalidMethod);
                }
                request.method.push(byte as char);
                self.state = RequestState::Method;
            }
            RequestState::Method => {
                if byte == b' ' {
                    self.state = RequestState::Uri;
                } else if byte.is_ascii_alphabetic() {
                    request.method.push(byte as char);
                } else {
                    return Err(DecodeError::InvalidMethod);
                }
            }
            RequestState::Uri => {
                if byte == b' ' {
                    if request.uri.is_empty() {
                        return Err(DecodeError::InvalidUri);
                    }
                    self.state = RequestState::VersionH;
                } else if is_ctl(byte) {
                    return Err(DecodeError::InvalidUri);
                } else {
                    request.uri.push(byte as char);
                }
            }
            RequestState::VersionH => {
                if byte != b'H' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = RequestState::VersionHt;
            }
            RequestState::VersionHt => {
                if byte != b'T' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = RequestState::VersionHtt;
            }
            RequestState::VersionHtt => {
                if byte != b'T' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = RequestState::VersionHttp;
            }
            RequestState::VersionHttp => {
                if byte != b'P' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = RequestState::VersionSlash;
            }
            RequestState::VersionSlash => {
                if byte != b'/' {
                    return Err(DecodeError::InvalidVersion);
                }
                request.major = 0;
                request.minor = 0;
                self.state = RequestState::MajorStart;
            }
            RequestState::MajorStart => {
                if !byte.is_ascii_digit() {
                    return Err(DecodeError::InvalidVersion);
                }
                request.major = accumulate_decimal(request.major, byte)?;
                self.state = RequestState::Major;
            }
            RequestState::Major => {
                if byte == b'.' {
                    self.state = RequestState::MinorStart;
                } else if byte.is_ascii_digit() {
                    request.major = accumulate_decimal(request.major, byte)?;
                } else {
                    return Err(DecodeError::InvalidVersion);
                }
            }
            RequestState::MinorStart => {
                if !byte.is_ascii_digit() {
                    return Err(DecodeError::InvalidVersion);
                }
                request.minor = accumulate_decimal(request.minor, byte)?;
                self.state = RequestState::Minor;
            }
            RequestState::Minor => {
                if byte == b'\r' {
                    self.state = RequestState::RequestLineLf;
                } else if byte.is_ascii_digit() {
                    request.minor = accumulate_decimal(request.minor, byte)?;
                } else {
                    return Err(DecodeError::InvalidVersion);
                }
            }
            RequestState::RequestLineLf => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingLineFeed);
                }
                self.state = RequestState::HeaderSection;
            }
            _ => unreachable!("request-line feeder called in {:?}", self.state),
        }
        Ok(())
    }

    fn finish_headers(&mut self, request: &mut HttpRequest) -> Result<(), DecodeError> {
        request.headers_complete = true;

        if request.is_connect() {
            let (host, port) = parse_authority(&request.uri, 443)?;
            request.host = host;
            request.port = port;
        } else if let Some(rest) = request.uri.strip_prefix("http://") {
            let authority = rest.split('/').next().unwrap_or(rest);
            let (host, port) = parse_authority(authority, 80)?;
            request.host = host;
            request.port = port;
        } else if let Some(rest) = request.uri.strip_prefix("https://") {
            let authority = rest.split('/').next().unwrap_or(rest);
            let (host, port) = parse_authority(authority, 443)?;
            request.host = host;
            request.port = port;
        }

        if request.host.is_empty() {
            if let Some(value) = request.headers.get("Host") {
                let (host, port) = parse_authority(value.trim(), 80)?;
                request.host = host;
                request.port = port;
            }
        }

        let framing = resolve_framing(&request.headers)?;
        request.transfer_coding = framing.transfer_coding;
        request.content_length = framing.content_length;
        request.ambiguous_framing = framing.ambiguous;

        // CONNECT carries no message body; everything after its header
        // section belongs to the tunnel.
        self.body = if request.is_connect() {
            BodyReader::empty()
        } else {
            match request.transfer_coding {
                TransferCoding::Chunked => BodyReader::chunked(),
                TransferCoding::Identity => match request.content_length {
                    Some(length) => BodyReader::exact(length),
                    None => BodyReader::empty(),
                },
            }
        };
        Ok(())
    }

    fn finish_body(&mut self, request: &mut HttpRequest) {
        request.body_complete = true;
        request.deliverable = true;
        self.state = RequestState::Done;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResponseState {
    #[default]
    VersionH,
    VersionHt,
    VersionHtt,
    VersionHttp,
    VersionSlash,
    MajorStart,
    Major,
    MinorStart,
    Minor,
    StatusStart,
    Status,
    Reason,
    StatusLineLf,
    HeaderSection,
    Body,
    Done,
}

/// Incremental response decoder. Responses become deliverable at
/// headers-complete so forwarding can start ahead of the body; a response
/// without framing headers is delimited by peer EOF and is completed via
/// [`ResponseDecoder::finish_eof`].
#[derive(Debug)]
pub struct ResponseDecoder {
    state: ResponseState,
    headers: HeaderParser,
    body: BodyReader,
    head_len: usize,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            state: ResponseState::VersionH,
            headers: HeaderParser::default(),
            body: BodyReader::empty(),
            head_len: 0,
        }
    }

    pub fn head_len(&self) -> usize {
        self.head_len
    }

    pub fn is_fresh(&self) -> bool {
        self.state == ResponseState::VersionH && self.head_len == 0
    }

    pub fn is_eof_delimited(&self) -> bool {
        self.state == ResponseState::Body && self.body.is_eof_delimited()
    }

    /// Terminate a close-delimited body on peer EOF. Returns false when the
    /// response was not relying on connection-close framing.
    pub fn finish_eof(&mut self, response: &mut HttpResponse) -> bool {
        if self.state == ResponseState::Body && self.body.finish_eof() {
            response.body_complete = true;
            self.state = ResponseState::Done;
            true
        } else {
            false
        }
    }

    pub fn decode(
        &mut self,
        input: &[u8],
        response: &mut HttpResponse,
    ) -> Result<usize, DecodeError> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                ResponseState::Done => break,
                ResponseState::Body => {
                    pos += self.body.feed(&input[pos..], &mut response.body)?;
                    if self.body.is_complete() {
                        self.finish_body(response);
                        break;
                    }
                }
                ResponseState::HeaderSection => {
                    let byte = input[pos];
                    pos += 1;
                    self.head_len += 1;
                    if self.headers.feed(byte, &mut response.headers)? {
                        self.finish_headers(response)?;
                        if self.body.is_complete() {
                            self.finish_body(response);
                            break;
                        }
                        self.state = ResponseState::Body;
                    }
                }
                _ => {
                    let byte = input[pos];
                    pos += 1;
                    self.head_len += 1;
                    self.feed_status_line(byte, response)?;
                }
            }
        }
        Ok(pos)
    }

    fn feed_status_line(
        &mut self,
        byte: u8,
        response: &mut HttpResponse,
    ) -> Result<(), DecodeError> {
        match self.state {
            ResponseState::VersionH => {
                if byte != b'H' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = ResponseState::VersionHt;
            }
            ResponseState::VersionHt => {
                if byte != b'T' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = ResponseState::VersionHtt;
            }
            ResponseState::VersionHtt => {
                if byte != b'T' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = ResponseState::VersionHttp;
            }
            ResponseState::VersionHttp => {
                if byte != b'P' {
                    return Err(DecodeError::InvalidVersion);
                }
                self.state = ResponseState::VersionSlash;
            }
            ResponseState::VersionSlash => {
                if byte != b'/' {
                    return Err(DecodeError::InvalidVersion);
                }
                response.major = 0;
                response.minor = 0;
                self.state = ResponseState::MajorStart;
            }
            ResponseState::MajorStart => {
                if !byte.is_ascii_digit() {
                    return Err(DecodeError::InvalidVersion);
                }
                response.major = accumulate_decimal(response.major, byte)?;
                self.state = ResponseState::Major;
            }
            ResponseState::Major => {
                if byte == b'.' {
                    self.state = ResponseState::MinorStart;
                } else if byte.is_ascii_digit() {
                    response.major = accumulate_decimal(response.major, byte)?;
                } else {
                    return Err(DecodeError::InvalidVersion);
                }
            }
            ResponseState::MinorStart => {
                if !byte.is_ascii_digit() {
                    return Err(DecodeError::InvalidVersion);
                }
                response.minor = accumulate_decimal(response.minor, byte)?;
                self.state = ResponseState::Minor;
            }
            ResponseState::Minor => {
                if byte == b' ' {
                    self.state = ResponseState::StatusStart;
                } else if byte.is_ascii_digit() {
                    response.minor = accumulate_decimal(response.minor, byte)?;
                } else {
                    return Err(DecodeError::InvalidVersion);
                }
            }
            ResponseState::StatusStart => {
                if !byte.is_ascii_digit() {
                    return Err(DecodeError::InvalidStatus);
                }
                response.status = (byte - b'0') as u16;
                self.state = ResponseState::Status;
            }
            ResponseState::Status => {
                if byte == b' ' {
                    self.state = ResponseState::Reason;
                } else if byte == b'\r' {
                    self.state = ResponseState::StatusLineLf;
                } else if byte.is_ascii_digit() {
                    response.status = response.status * 10 + (byte - b'0') as u16;
                    if response.status > 999 {
                        return Err(DecodeError::InvalidStatus);
                    }
                } else {
                    return Err(DecodeError::InvalidStatus);
                }
            }
            ResponseState::Reason => {
                if byte == b'\r' {
                    self.state = ResponseState::StatusLineLf;
                } else if is_ctl(byte) && byte != b'\t' {
                    return Err(DecodeError::InvalidReason);
                } else {
                    response.reason.push(byte as char);
                }
            }
            ResponseState::StatusLineLf => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingLineFeed);
                }
                self.state = ResponseState::HeaderSection;
            }
            _ => unreachable!("status-line feeder called in {:?}", self.state),
        }
        Ok(())
    }

    fn finish_headers(&mut self, response: &mut HttpResponse) -> Result<(), DecodeError> {
        response.headers_complete = true;
        response.deliverable = true;

        let framing = resolve_framing(&response.headers)?;
        response.transfer_coding = framing.transfer_coding;
        response.content_length = framing.content_length;
        response.ambiguous_framing = framing.ambiguous;

        self.body = if HttpResponse::bodyless_status(response.status) {
            BodyReader::empty()
        } else {
            match response.transfer_coding {
                TransferCoding::Chunked => BodyReader::chunked(),
                TransferCoding::Identity => match response.content_length {
                    Some(length) => BodyReader::exact(length),
                    None => BodyReader::until_eof(),
                },
            }
        };
        Ok(())
    }

    fn finish_body(&mut self, response: &mut HttpResponse) {
        response.body_complete = true;
        self.state = ResponseState::Done;
    }
}
