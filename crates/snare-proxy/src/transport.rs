use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Uniform façade over a plain TCP stream and its two TLS shapes. The
/// upgrade is one-way: once a side has switched to TLS there is no path
/// back to the raw stream.
pub enum Transport {
    Plain(TcpStream),
    ServerTls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    ClientTls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf).await,
            Self::ServerTls(stream) => stream.read(buf).await,
            Self::ClientTls(stream) => stream.read(buf).await,
        }
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf).await,
            Self::ServerTls(stream) => stream.write(buf).await,
            Self::ClientTls(stream) => stream.write(buf).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await,
            Self::ServerTls(stream) => stream.flush().await,
            Self::ClientTls(stream) => stream.flush().await,
        }
    }

    /// Write-half shutdown: TCP FIN, or TLS close_notify then FIN.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::ServerTls(stream) => stream.shutdown().await,
            Self::ClientTls(stream) => stream.shutdown().await,
        }
    }

    /// Accept-side TLS upgrade, used after the `Connection Established`
    /// reply with the certificate minted for the tunnel target.
    pub async fn into_server_tls(self, config: Arc<ServerConfig>) -> io::Result<Transport> {
        match self {
            Self::Plain(stream) => {
                let acceptor = TlsAcceptor::from(config);
                let tls = acceptor.accept(stream).await?;
                Ok(Self::ServerTls(Box::new(tls)))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transport already upgraded to TLS",
            )),
        }
    }

    /// Connect-side TLS upgrade toward the origin server.
    pub async fn into_client_tls(
        self,
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> io::Result<Transport> {
        match self {
            Self::Plain(stream) => {
                let connector = TlsConnector::from(config);
                let tls = connector.connect(server_name, stream).await?;
                Ok(Self::ClientTls(Box::new(tls)))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transport already upgraded to TLS",
            )),
        }
    }
}
