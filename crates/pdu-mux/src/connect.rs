//! Connection plumbing for device transports
//!
//! The engine reaches devices over TCP, telnet-over-TCP, or serial
//! lines. The `Connector` trait is the seam: production code uses
//! `NetConnector`, tests inject a connector that hands out
//! `tokio::io::duplex` streams wired to simulated devices.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use pdu_script::ConnectParams;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

/// Object-safe alias for the byte streams sessions run over
pub trait SessionIo: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> SessionIo for T {}

/// A boxed device stream
pub type BoxedIo = Box<dyn SessionIo>;

/// Opens connections to devices
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to the device described by `params`
    async fn connect(&self, device: &str, params: &ConnectParams) -> io::Result<BoxedIo>;
}

/// The production connector: TCP, telnet (plain TCP at this layer),
/// and serial via tokio_serial
#[derive(Debug, Default)]
pub struct NetConnector;

impl NetConnector {
    /// Create the production connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, device: &str, params: &ConnectParams) -> io::Result<BoxedIo> {
        match params {
            ConnectParams::Tcp { host, port } | ConnectParams::Telnet { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                debug!("Connected to {} at {}", device, params.label());
                Ok(Box::new(stream))
            }
            ConnectParams::Serial { path, baud } => {
                let stream = tokio_serial::new(path, *baud)
                    .timeout(Duration::from_millis(100))
                    .open_native_async()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                debug!("Opened serial line to {} at {}", device, params.label());
                Ok(Box::new(stream))
            }
        }
    }
}
