//! The two relay directions of an established session. Each direction is its
//! own task over its own packet reader/writer pair; there is no coordination
//! between them beyond both exiting when the session dies.

use crate::error::ProxyError;
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::rewrite::tag_com_query;

use num_traits::FromPrimitive;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Client-to-upstream direction: every COM_QUERY gains the attribution
/// suffix; everything else is re-framed untouched with its sequence id
/// intact.
pub async fn forward_client_to_upstream<R, W>(
    mut reader: PacketReader<R>,
    mut writer: PacketWriter<W>,
    session_id: u64,
    username: Arc<str>,
) where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    if let Err(e) = relay_client_packets(&mut reader, &mut writer, session_id, &username).await {
        warn!("session [{session_id}] client->upstream relay stopped: {e}");
    }
}

async fn relay_client_packets<R, W>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    session_id: u64,
    username: &str,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let Some((seq, packet)) = reader.next_async().await? else {
            info!("session [{session_id}] client closed the connection");
            return Ok(());
        };
        if let Some(com) = packet.first().copied().and_then(CommandCode::from_u8) {
            debug!("session [{session_id}] client sent {com:?}");
        }
        writer.set_seq(seq);
        match tag_com_query(&packet, username)? {
            Some(tagged) => writer.write_all(&tagged)?,
            None => writer.write_all(&packet)?,
        }
        writer.end_packet().await?;
        writer.flush_all().await?;
    }
}

/// Upstream-to-client direction: a verbatim copy, packet by packet.
pub async fn forward_upstream_to_client<R, W>(
    mut reader: PacketReader<R>,
    mut writer: PacketWriter<W>,
    session_id: u64,
) where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    if let Err(e) = relay_upstream_packets(&mut reader, &mut writer, session_id).await {
        warn!("session [{session_id}] upstream->client relay stopped: {e}");
    }
}

async fn relay_upstream_packets<R, W>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    session_id: u64,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let Some((seq, packet)) = reader.next_async().await? else {
            info!("session [{session_id}] upstream closed the connection");
            return Ok(());
        };
        writer.set_seq(seq);
        writer.write_all(&packet)?;
        writer.end_packet().await?;
        writer.flush_all().await?;
    }
}
