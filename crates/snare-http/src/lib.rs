//! Incremental HTTP/1.x codec for the snare proxy.
//!
//! The decoders are byte-fed state machines: callers hand over whatever the
//! socket produced and get back the number of bytes consumed, which falls
//! short of the input only when a message completed mid-buffer. Messages
//! expose explicit `headers_complete` / `body_complete` / `deliverable`
//! marks so the session can start forwarding a response at the header
//! boundary while the body is still streaming.

mod byte_buffer;
mod decoder;
mod encoder;
mod message;

pub use byte_buffer::ByteBuffer;
pub use decoder::{parse_authority, DecodeError, RequestDecoder, ResponseDecoder};
pub use encoder::{
    encode_chunk, encode_request, encode_response, encode_response_head, LAST_CHUNK,
};
pub use message::{origin_form, Header, Headers, HttpRequest, HttpResponse, TransferCoding};
