use crate::protocol::mysql::constants::AUTH_PLUGIN_DATA_PART_1_LENGTH;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::handshake::{HandshakeResponse, ServerHandshake};
use crate::protocol::mysql::packet::packet_writer::PacketWriter;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::CapabilityFlags;
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    err: ErrorKind,
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(err as u16)?;
    w.write_u8(b'#')?;
    w.write_all(err.sqlstate())?;
    w.write_all(msg)?;
    w.end_packet().await?;
    w.flush_all().await
}

/// Re-emits a decoded server greeting. Field order mirrors the decoder; the
/// plugin-name terminator is always written, even when the decoded legacy
/// payload lacked one.
pub async fn write_server_handshake<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    handshake: &ServerHandshake,
) -> io::Result<()> {
    let caps = handshake.capability_flags.bits().to_le_bytes();

    w.write_u8(handshake.protocol_version)?;
    w.write_all(&handshake.server_version)?;
    w.write_u8(0x00)?;
    w.write_u32::<LittleEndian>(handshake.connection_id)?;
    w.write_all(&handshake.auth_plugin_data[..AUTH_PLUGIN_DATA_PART_1_LENGTH])?;
    w.write_u8(0x00)?; // filler
    w.write_all(&caps[..2])?;
    w.write_u8(handshake.charset)?;
    w.write_u16::<LittleEndian>(handshake.status_flags)?;
    w.write_all(&caps[2..4])?;
    w.write_u8(handshake.auth_plugin_data_len)?;
    w.write_all(&[0u8; 10])?;
    w.write_all(&handshake.auth_plugin_data[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?;
    w.write_all(&handshake.auth_plugin_name)?;
    w.write_u8(0x00)?;
    w.end_packet().await?;
    w.flush_all().await
}

/// Re-emits a handshake response under the same capability bits it was
/// decoded with, so the auth-response length prefix keeps its shape.
pub async fn write_handshake_response<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    response: &HandshakeResponse,
) -> io::Result<()> {
    let caps = response.capability_flags;

    w.write_u32::<LittleEndian>(caps.bits())?;
    w.write_u32::<LittleEndian>(response.max_packet_size)?;
    w.write_u8(response.charset)?;
    w.write_all(&response.reserved)?;
    w.write_all(&response.username)?;
    w.write_u8(0x00)?;
    if caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        w.write_lenenc_str(&response.auth_response)?;
    } else if caps.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        w.write_u8(response.auth_response.len() as u8)?;
        w.write_all(&response.auth_response)?;
    } else {
        w.write_all(&response.auth_response)?;
        w.write_u8(0x00)?;
    }
    if let Some(database) = &response.database {
        w.write_all(database)?;
        w.write_u8(0x00)?;
    }
    if let Some(plugin) = &response.auth_plugin_name {
        w.write_all(plugin)?;
        w.write_u8(0x00)?;
    }
    if let Some(attrs) = &response.connect_attrs {
        w.write_all(attrs)?;
    }
    w.end_packet().await?;
    w.flush_all().await
}
