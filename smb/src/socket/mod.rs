//! Transport plumbing: producing a byte stream and framing SMB messages on it.

pub mod connector;
pub mod message_stream;

pub use connector::{SMBConnector, SMBStream, TcpConnector};
pub use message_stream::{SMBFrameCodec, SMBFrameReader, SMBFrameWriter, SMBSocketConnection};
