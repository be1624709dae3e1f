use crate::protocol::mysql::packet::{packet, Packet};

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use winnow::error::ErrMode;

const PACKET_BUFFER_SIZE: usize = 4096;

/// Reads bytes from the transport and yields whole logical packets.
///
/// Reads need not align with frame boundaries: undecoded bytes stay buffered
/// across calls and decoding resumes once more data arrives, so a frame split
/// over several reads (or several frames in one read) both work.
#[derive(Debug)]
pub struct PacketReader<R> {
    bytes: Vec<u8>,
    pub r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader {
            bytes: Vec::with_capacity(PACKET_BUFFER_SIZE),
            r,
        }
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Next logical packet, or `None` on a clean EOF. EOF with a partial
    /// frame still buffered is an error.
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        loop {
            if !self.bytes.is_empty() {
                match packet(&self.bytes) {
                    Ok((rest, (seq, pkt))) => {
                        let consumed = self.bytes.len() - rest.into_inner().len();
                        self.bytes.drain(..consumed);
                        return Ok(Some((seq, pkt)));
                    }
                    Err(ErrMode::Incomplete(_)) | Err(ErrMode::Backtrack(_)) => {}
                    Err(ErrMode::Cut(ctx)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("{ctx:?}"),
                        ));
                    }
                }
            }

            self.bytes.reserve(PACKET_BUFFER_SIZE);
            let read = self.r.read_buf(&mut self.bytes).await?;
            if read == 0 {
                if self.bytes.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} unhandled bytes at EOF", self.bytes.len()),
                ));
            }
        }
    }
}
