use crate::message::{Headers, HttpRequest, HttpResponse, TransferCoding};

/// Terminating chunk plus the empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

fn encode_headers(headers: &Headers, out: &mut Vec<u8>) {
    for header in headers.iter() {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Request line, headers in stored order, blank line, body.
pub fn encode_request(request: &HttpRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + request.body.len());
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.uri.as_bytes());
    out.extend_from_slice(format!(" HTTP/{}.{}\r\n", request.major, request.minor).as_bytes());
    encode_headers(&request.headers, &mut out);
    encode_body(request.transfer_coding, &request.body, &mut out);
    out
}

/// Status line and headers only; used when a response is streamed and the
/// body follows chunk by chunk.
pub fn encode_response_head(response: &HttpResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(
        format!(
            "HTTP/{}.{} {} {}\r\n",
            response.major, response.minor, response.status, response.reason
        )
        .as_bytes(),
    );
    encode_headers(&response.headers, &mut out);
    out
}

/// Full response: head plus body in one buffer.
pub fn encode_response(response: &HttpResponse) -> Vec<u8> {
    let mut out = encode_response_head(response);
    encode_body(response.transfer_coding, &response.body, &mut out);
    out
}

fn encode_body(coding: TransferCoding, body: &[u8], out: &mut Vec<u8>) {
    match coding {
        TransferCoding::Identity => out.extend_from_slice(body),
        TransferCoding::Chunked => {
            if !body.is_empty() {
                out.extend_from_slice(&encode_chunk(body));
            }
            out.extend_from_slice(LAST_CHUNK);
        }
    }
}

/// Frame one body segment as a chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::{encode_chunk, encode_request, encode_response, LAST_CHUNK};
    use crate::decoder::{RequestDecoder, ResponseDecoder};
    use crate::message::{HttpRequest, HttpResponse, TransferCoding};

    #[test]
    fn request_reencodes_with_header_order_preserved() {
        let wire = b"GET / HTTP/1.1\r\nHost: example.com\r\nUser-Agent: t\r\nAccept: */*\r\n\r\n";
        let mut decoder = RequestDecoder::new();
        let mut request = HttpRequest::new();
        decoder.decode(wire, &mut request).expect("decode");

        assert_eq!(encode_request(&request), wire.to_vec());
    }

    #[test]
    fn reencoded_request_reparses_to_equivalent_structure() {
        let wire =
            b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello";
        let mut decoder = RequestDecoder::new();
        let mut first = HttpRequest::new();
        decoder.decode(wire, &mut first).expect("first decode");

        let encoded = encode_request(&first);
        let mut second = HttpRequest::new();
        RequestDecoder::new()
            .decode(&encoded, &mut second)
            .expect("second decode");

        assert_eq!(second.method, first.method);
        assert_eq!(second.uri, first.uri);
        assert_eq!(second.headers, first.headers);
        assert_eq!(second.body, first.body);
    }

    #[test]
    fn chunked_body_is_reframed_as_a_single_chunk() {
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut decoder = ResponseDecoder::new();
        let mut response = HttpResponse::new();
        decoder.decode(wire, &mut response).expect("decode");
        assert_eq!(response.transfer_coding, TransferCoding::Chunked);

        let encoded = encode_response(&response);
        assert_eq!(encoded, wire.to_vec());
    }

    #[test]
    fn chunk_framing_helpers_produce_valid_chunks() {
        assert_eq!(encode_chunk(b"hello"), b"5\r\nhello\r\n".to_vec());
        assert_eq!(encode_chunk(&[0_u8; 16]).len(), 4 + 16 + 2);
        assert_eq!(LAST_CHUNK, b"0\r\n\r\n");
    }

    #[test]
    fn synthetic_response_encodes_as_plain_http() {
        let response = HttpResponse::synthetic(502, "Bad Gateway", b"upstream unreachable");
        let encoded = encode_response(&response);
        let text = String::from_utf8(encoded).expect("ascii");
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Content-Length: 20\r\n"));
        assert!(text.ends_with("\r\n\r\nupstream unreachable"));
    }
}
