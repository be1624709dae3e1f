use crate::protocol::mysql::constants;

use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::io::prelude::*;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffers one outgoing packet payload and frames it on [`end_packet`].
///
/// The sequence id is set by the caller per packet (`set_seq`) and
/// auto-increments across the frames of a split payload.
///
/// [`end_packet`]: PacketWriter::end_packet
#[derive(Debug)]
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Frames the buffered payload, splitting at `MAX_PAYLOAD_LEN`. A payload
    /// that is an exact multiple of the limit (the empty payload included)
    /// ends with an empty frame, per the wire format.
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0u8; constants::PACKET_HEADER_LEN];
        let raw_packet = self.take_buffer();
        let mut offset = 0;
        loop {
            let chunk_len = (raw_packet.len() - offset).min(constants::MAX_PAYLOAD_LEN);
            let chunk = &raw_packet[offset..offset + chunk_len];
            LittleEndian::write_u24(&mut header, chunk_len as u32);
            header[3] = self.seq();
            self.increase_seq();
            self.inner_writer.write_all(&header).await?;
            if !chunk.is_empty() {
                self.inner_writer.write_all(chunk).await?;
            }
            offset += chunk_len;
            if chunk_len < constants::MAX_PAYLOAD_LEN {
                return Ok(());
            }
        }
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}
