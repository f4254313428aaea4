use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use smb_core::error::SMBError;
use smb_core::logging::debug;
use smb_core::SMBResult;

/// Any ordered, reliable byte channel a connection can ride on.
pub trait SMBStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SMBStream for T {}

/// Produces fresh transport streams to one server endpoint.
///
/// Called once for the main channel, once per alternate channel and again by
/// the reconnect path whenever a channel has to be rebuilt.
pub trait SMBConnector: Send + Sync + 'static {
    type Stream: SMBStream;

    fn connect(&self) -> impl Future<Output = SMBResult<Self::Stream>> + Send;

    /// Name the server is addressed by in UNC paths.
    fn server_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    server_name: String,
    address: String,
}

impl TcpConnector {
    pub fn new(server_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            address: address.into(),
        }
    }

    /// Direct TCP on port 445.
    pub fn direct(server_name: impl Into<String>) -> Self {
        let server_name = server_name.into();
        let address = format!("{}:445", server_name);
        Self::new(server_name, address)
    }
}

impl SMBConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> SMBResult<TcpStream> {
        let stream = TcpStream::connect(&self.address).await.map_err(SMBError::io_error)?;
        stream.set_nodelay(true).map_err(SMBError::io_error)?;
        debug!(address = %self.address, "transport connected");
        Ok(stream)
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }
}
