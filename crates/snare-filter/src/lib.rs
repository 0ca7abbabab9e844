//! Ordered message transformations applied at defined phases of the
//! session state machine: request headers before the request is sent
//! upstream, response headers before forwarding begins, and each body
//! segment as it streams through.

use std::sync::Arc;

use snare_http::{HttpRequest, HttpResponse};

/// What a filter decided about the piece it was shown.
#[derive(Debug)]
pub enum FilterAction {
    /// Leave the message alone (mutations made in place still apply).
    Pass,
    /// Replace the body segment with these bytes.
    Rewrite(Vec<u8>),
    /// Stop the exchange and answer the client with this response.
    ShortCircuit(HttpResponse),
}

pub trait MessageFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_request_headers(&self, request: &mut HttpRequest) -> FilterAction {
        let _ = request;
        FilterAction::Pass
    }

    fn on_response_headers(&self, response: &mut HttpResponse) -> FilterAction {
        let _ = response;
        FilterAction::Pass
    }

    fn on_body_chunk(&self, chunk: &[u8]) -> FilterAction {
        let _ = chunk;
        FilterAction::Pass
    }
}

/// Outcome of running a header phase through the whole chain.
#[derive(Debug)]
pub enum ChainVerdict {
    Forward,
    ShortCircuit(HttpResponse),
}

#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn MessageFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain every session starts with: hop-by-hop proxy header
    /// normalization.
    pub fn with_default_filters() -> Self {
        let mut chain = Self::new();
        chain.push(Arc::new(ProxyHeaderFilter));
        chain
    }

    pub fn push(&mut self, filter: Arc<dyn MessageFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the request-header phase. The first short-circuit wins and
    /// later filters are not consulted.
    pub fn apply_request_headers(&self, request: &mut HttpRequest) -> ChainVerdict {
        for filter in &self.filters {
            match filter.on_request_headers(request) {
                FilterAction::Pass | FilterAction::Rewrite(_) => {}
                FilterAction::ShortCircuit(response) => {
                    return ChainVerdict::ShortCircuit(response);
                }
            }
        }
        ChainVerdict::Forward
    }

    pub fn apply_response_headers(&self, response: &mut HttpResponse) -> ChainVerdict {
        for filter in &self.filters {
            match filter.on_response_headers(response) {
                FilterAction::Pass | FilterAction::Rewrite(_) => {}
                FilterAction::ShortCircuit(synthetic) => {
                    return ChainVerdict::ShortCircuit(synthetic);
                }
            }
        }
        ChainVerdict::Forward
    }

    /// Run one streamed body segment through the chain; rewrites feed the
    /// next filter in order.
    pub fn apply_body_chunk(&self, chunk: Vec<u8>) -> Vec<u8> {
        let mut current = chunk;
        for filter in &self.filters {
            match filter.on_body_chunk(&current) {
                FilterAction::Pass => {}
                FilterAction::Rewrite(replacement) => current = replacement,
                FilterAction::ShortCircuit(_) => {
                    // Bodies are already streaming; a short-circuit here
                    // cannot retract forwarded bytes, so it degrades to
                    // pass-through.
                }
            }
        }
        current
    }
}

/// Rewrites the client-only `Proxy-Connection` header into the standard
/// `Connection` header before the request goes upstream, so origins never
/// see the proxy-specific name.
pub struct ProxyHeaderFilter;

impl MessageFilter for ProxyHeaderFilter {
    fn name(&self) -> &'static str {
        "proxy-header"
    }

    fn on_request_headers(&self, request: &mut HttpRequest) -> FilterAction {
        if let Some(value) = request.headers.remove("Proxy-Connection") {
            if !request.headers.contains("Connection") {
                request.headers.push("Connection", value);
            }
        }
        request.headers.remove("Proxy-Authorization");
        FilterAction::Pass
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use snare_http::{HttpRequest, HttpResponse};

    use super::{ChainVerdict, FilterAction, FilterChain, MessageFilter, ProxyHeaderFilter};

    struct Blocker;

    impl MessageFilter for Blocker {
        fn name(&self) -> &'static str {
            "blocker"
        }

        fn on_request_headers(&self, _request: &mut HttpRequest) -> FilterAction {
            FilterAction::ShortCircuit(HttpResponse::synthetic(403, "Forbidden", b"blocked"))
        }
    }

    struct Tagger;

    impl MessageFilter for Tagger {
        fn name(&self) -> &'static str {
            "tagger"
        }

        fn on_request_headers(&self, request: &mut HttpRequest) -> FilterAction {
            request.headers.push("X-Tagged", "1");
            FilterAction::Pass
        }

        fn on_body_chunk(&self, chunk: &[u8]) -> FilterAction {
            FilterAction::Rewrite(chunk.to_ascii_uppercase())
        }
    }

    #[test]
    fn proxy_connection_is_renamed_to_connection() {
        let mut request = HttpRequest::new();
        request.headers.push("Host", "example.com");
        request.headers.push("Proxy-Connection", "keep-alive");

        let chain = FilterChain::with_default_filters();
        match chain.apply_request_headers(&mut request) {
            ChainVerdict::Forward => {}
            ChainVerdict::ShortCircuit(_) => panic!("default chain must forward"),
        }

        assert!(!request.headers.contains("Proxy-Connection"));
        assert_eq!(request.headers.get("Connection"), Some("keep-alive"));
    }

    #[test]
    fn existing_connection_header_is_not_clobbered() {
        let mut request = HttpRequest::new();
        request.headers.push("Connection", "close");
        request.headers.push("Proxy-Connection", "keep-alive");

        ProxyHeaderFilter.on_request_headers(&mut request);
        assert_eq!(request.headers.get("Connection"), Some("close"));
    }

    #[test]
    fn short_circuit_stops_later_filters() {
        let mut chain = FilterChain::new();
        chain.push(Arc::new(Blocker));
        chain.push(Arc::new(Tagger));

        let mut request = HttpRequest::new();
        match chain.apply_request_headers(&mut request) {
            ChainVerdict::ShortCircuit(response) => assert_eq!(response.status, 403),
            ChainVerdict::Forward => panic!("blocker must short-circuit"),
        }
        assert!(!request.headers.contains("X-Tagged"));
    }

    #[test]
    fn body_chunks_flow_through_rewrites_in_order() {
        let mut chain = FilterChain::new();
        chain.push(Arc::new(Tagger));

        let rewritten = chain.apply_body_chunk(b"hello".to_vec());
        assert_eq!(rewritten, b"HELLO".to_vec());
    }
}
