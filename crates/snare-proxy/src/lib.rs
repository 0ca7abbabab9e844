//! Intercepting HTTP/HTTPS forward proxy.
//!
//! Clients speak plain HTTP/1.x to the listener; CONNECT requests open a
//! TLS-intercepted tunnel backed by leaf certificates minted on the fly by
//! the local certificate authority. Each accepted socket becomes a
//! [`session::Session`] driving the tunnel/forward state machine between a
//! client-facing and a server-facing [`connection::Connection`].

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{ConfigError, ProxyConfig};
pub use connection::{Connection, Role};
pub use error::ProxyError;
pub use registry::SessionRegistry;
pub use server::{ProxyServer, ProxyShared};
pub use session::{Session, SessionContext, SessionState, TUNNEL_ESTABLISHED_REPLY};
pub use transport::Transport;
