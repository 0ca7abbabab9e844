use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustls::ClientConfig;
use snare_filter::FilterChain;
use snare_observe::EventSink;
use snare_tls::{build_upstream_client_config, CaError, CertificateAuthority};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::ProxyConfig;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Everything a session needs besides its own sockets. Only the
/// certificate authority is mutable process-wide state; the rest is
/// read-only after startup.
pub struct ProxyShared {
    pub config: ProxyConfig,
    pub authority: Arc<CertificateAuthority>,
    pub upstream_tls: Arc<ClientConfig>,
    pub filters: Arc<FilterChain>,
    pub events: Arc<dyn EventSink>,
    pub registry: SessionRegistry,
    next_session_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl ProxyShared {
    pub fn allocate_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn allocate_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The acceptor: binds the listener, spawns one session task per client,
/// and tears the registry down on shutdown. Construction bootstraps the
/// certificate authority, which is the step allowed to fail.
pub struct ProxyServer {
    shared: Arc<ProxyShared>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, events: Arc<dyn EventSink>) -> Result<Self, CaError> {
        let authority = Arc::new(CertificateAuthority::init(config.authority_config())?);
        let upstream_tls =
            build_upstream_client_config(config.upstream_tls_insecure_skip_verify);
        let shared = Arc::new(ProxyShared {
            config,
            authority,
            upstream_tls,
            filters: Arc::new(FilterChain::with_default_filters()),
            events,
            registry: SessionRegistry::default(),
            next_session_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
        });
        Ok(Self { shared })
    }

    pub fn authority(&self) -> Arc<CertificateAuthority> {
        Arc::clone(&self.shared.authority)
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.registry.active_sessions()
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        let addr = format!(
            "{}:{}",
            self.shared.config.listen_addr, self.shared.config.listen_port
        );
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        tracing::info!(listen = %local, "proxy listening");
        Ok(listener)
    }

    pub async fn run_with_listener(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true).ok();

            let shared = Arc::clone(&self.shared);
            let session_id = shared.allocate_session_id();
            tracing::debug!(session = session_id, %peer, "client accepted");

            let task_shared = Arc::clone(&shared);
            let handle = tokio::spawn(async move {
                Session::new(session_id, stream, peer, Arc::clone(&task_shared))
                    .run()
                    .await;
                task_shared.registry.remove(session_id);
            });
            shared.registry.insert(session_id, handle.abort_handle());
        }
    }

    /// Accept until the shutdown watch flips, then abort what remains.
    /// Sessions cancelled this way stop both connections without peer
    /// notification.
    pub async fn run_until_shutdown(
        &self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> io::Result<()> {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let result = tokio::select! {
            result = self.run_with_listener(listener) => result,
            changed = shutdown_rx.changed() => {
                let _ = changed;
                Ok(())
            }
        };
        self.shared.registry.abort_all();
        result
    }
}
