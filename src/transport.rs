//! Byte stream to one device, and how to open it.

use crate::{
    Result,
    util::{named, rustls::danger::NoCertificateVerification},
};
use futures::future::BoxFuture;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::io::{AsyncRead, AsyncWrite};

pub const DEFAULT_PORT: u16 = 8009;

pub trait TokioAsyncStream: AsyncRead + AsyncWrite + Unpin {}

impl<T> TokioAsyncStream for T
where T: AsyncRead + AsyncWrite + Unpin
{}

pub type BoxedStream = Box<dyn TokioAsyncStream + Send>;

/// Opens a fresh byte stream to the device each time it is called.
///
/// `PlaybackController` calls this whenever it needs a new `MessageChannel`.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>>;
}

/// Connects with TLS to a device address. Device certificates are self-signed and are not
/// verified.
#[derive(Clone, Debug)]
pub struct TlsConnector {
    pub addr: SocketAddr,
}

impl TlsConnector {
    pub fn new(addr: SocketAddr) -> TlsConnector {
        TlsConnector { addr }
    }
}

impl Connector for TlsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream>> {
        Box::pin(async move {
            let stream = tls_connect(self.addr).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

#[tracing::instrument(level = "info",
                      fields(ip = ?addr.ip(),
                             port = addr.port()))]
#[named]
pub async fn tls_connect(addr: SocketAddr)
-> Result<impl TokioAsyncStream + Send>
{
    const FUNCTION_PATH: &str = function_path!();

    let ip: IpAddr = addr.ip();

    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous().with_custom_certificate_verifier(Arc::new(
            NoCertificateVerification::new_ring()))
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));

    let ip_rustls = rustls::pki_types::IpAddr::from(ip);
    let domain = rustls::pki_types::ServerName::IpAddress(ip_rustls);

    let tcp_stream = tokio::net::TcpStream::connect(addr).await?;
    tcp_stream.set_nodelay(true)?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TcpStream connected");

    let tls_stream = connector.connect(domain, tcp_stream).await?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TlsStream connected");

    Ok(tls_stream)
}
