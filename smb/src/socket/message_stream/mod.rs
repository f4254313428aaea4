use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use smb_core::error::SMBError;
use smb_core::logging::trace;
use smb_core::SMBResult;

use crate::socket::SMBStream;

const FRAME_HEADER_SIZE: usize = 4;
/// Direct TCP carries a 24-bit length after a zero type byte.
pub const SMB_MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Splits a byte stream on the 4-byte direct-TCP length prefix.
#[derive(Debug, Clone, Copy)]
pub struct SMBFrameCodec {
    max_frame_size: usize,
}

impl SMBFrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(SMB_MAX_FRAME_SIZE),
        }
    }
}

impl Default for SMBFrameCodec {
    fn default() -> Self {
        Self::new(SMB_MAX_FRAME_SIZE)
    }
}

impl Decoder for SMBFrameCodec {
    type Item = BytesMut;
    type Error = SMBError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, SMBError> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        if src[0] != 0 {
            return Err(SMBError::parse_error("Unexpected session message type"));
        }
        let length = u32::from_be_bytes([0, src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(SMBError::parse_error(format!("Frame of {} bytes exceeds the limit", length)));
        }
        if src.len() < FRAME_HEADER_SIZE + length {
            src.reserve(FRAME_HEADER_SIZE + length - src.len());
            return Ok(None);
        }
        src.advance(FRAME_HEADER_SIZE);
        Ok(Some(src.split_to(length)))
    }
}

impl<'a> Encoder<&'a [u8]> for SMBFrameCodec {
    type Error = SMBError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<(), SMBError> {
        if item.len() > self.max_frame_size {
            return Err(SMBError::precondition_failed("Message too large for a single frame"));
        }
        dst.reserve(FRAME_HEADER_SIZE + item.len());
        dst.extend_from_slice(&(item.len() as u32).to_be_bytes());
        dst.extend_from_slice(item);
        Ok(())
    }
}

pub type SMBFrameReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, SMBFrameCodec>;

/// Next complete frame, or `None` once the peer closed the stream.
pub async fn read_frame(reader: &mut SMBFrameReader) -> SMBResult<Option<BytesMut>> {
    reader.next().await.transpose()
}

pub struct SMBFrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    codec: SMBFrameCodec,
    buffer: BytesMut,
}

impl SMBFrameWriter {
    pub async fn write_frame(&mut self, frame: &[u8]) -> SMBResult<usize> {
        self.buffer.clear();
        self.codec.encode(frame, &mut self.buffer)?;
        self.inner.write_all(&self.buffer).await.map_err(SMBError::io_error)?;
        self.inner.flush().await.map_err(SMBError::io_error)?;
        trace!(len = frame.len(), "frame written");
        Ok(self.buffer.len())
    }

    pub async fn close_stream(&mut self) -> SMBResult<()> {
        self.inner.shutdown().await.map_err(SMBError::io_error)
    }
}

/// A transport stream split into its framed read and write halves.
pub struct SMBSocketConnection {
    name: String,
    read_stream: SMBFrameReader,
    write_stream: SMBFrameWriter,
}

impl SMBSocketConnection {
    pub fn new<S: SMBStream>(name: impl Into<String>, stream: S, codec: SMBFrameCodec) -> Self {
        let (read, write) = tokio::io::split(stream);
        let read: Box<dyn AsyncRead + Send + Unpin> = Box::new(read);
        let write: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write);
        Self {
            name: name.into(),
            read_stream: FramedRead::new(read, codec),
            write_stream: SMBFrameWriter {
                inner: write,
                codec,
                buffer: BytesMut::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_streams(self) -> (SMBFrameReader, SMBFrameWriter) {
        (self.read_stream, self.write_stream)
    }
}
