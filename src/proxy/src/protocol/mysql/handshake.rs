//! Connection-phase packets: the server's protocol-10 greeting and the
//! client's reply. Both sides decode into owned records that re-encode
//! byte-exactly, because the proxy forwards what it parsed.

use crate::error::ProxyError;
use crate::protocol::mysql::constants::AUTH_PLUGIN_DATA_PART_1_LENGTH;

use mysql_common::constants::CapabilityFlags;
use std::borrow::Cow;
use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::token::{literal, take, take_until};
use winnow::{IResult, Parser};

/// The server's Initial Handshake packet (protocol version 10).
///
/// `auth_plugin_data` is the full challenge: 8 bytes from part 1 plus
/// `max(13, auth_plugin_data_len - 8)` bytes from part 2, which on real
/// servers makes 21 bytes whose last byte is a `0x00` terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: Vec<u8>,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_data_len: u8,
    pub auth_plugin_name: Vec<u8>,
}

impl ServerHandshake {
    pub fn decode(payload: &[u8]) -> Result<Self, ProxyError> {
        let Some(&protocol_version) = payload.first() else {
            return Err(ProxyError::FrameMalformed("empty server handshake"));
        };
        if protocol_version != 0x0a {
            return Err(ProxyError::ProtocolUnsupported(protocol_version));
        }
        let (_, (handshake, filler)) = server_handshake_layout(payload)
            .map_err(|_| ProxyError::FrameMalformed("truncated server handshake"))?;
        if filler != 0x00 {
            return Err(ProxyError::FrameMalformed("server handshake filler byte"));
        }
        if handshake
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
            && handshake.auth_plugin_data_len == 0
        {
            return Err(ProxyError::FrameMalformed("zero auth plugin data length"));
        }
        Ok(handshake)
    }

    pub fn server_version_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.server_version)
    }
}

fn server_handshake_layout(i: &[u8]) -> IResult<&[u8], (ServerHandshake, u8)> {
    let (i, protocol_version) = le_u8.parse_peek(i)?;
    let (i, server_version) = take_until(1.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;
    let (i, connection_id) = le_u32.parse_peek(i)?;
    let (i, auth_data_part_1) = take(AUTH_PLUGIN_DATA_PART_1_LENGTH).parse_peek(i)?;
    let (i, filler) = le_u8.parse_peek(i)?;
    let (i, cap_low) = le_u16.parse_peek(i)?;
    let (i, charset) = le_u8.parse_peek(i)?;
    let (i, status_flags) = le_u16.parse_peek(i)?;
    let (i, cap_high) = le_u16.parse_peek(i)?;
    // unknown bits must survive a decode/encode round trip
    let capability_flags =
        CapabilityFlags::from_bits_retain((cap_low as u32) | ((cap_high as u32) << 16));
    // the length slot is present either way; it only carries meaning under
    // CLIENT_PLUGIN_AUTH
    let (i, auth_plugin_data_len) = le_u8.parse_peek(i)?;
    let (i, _reserved) = take(10usize).parse_peek(i)?;

    let mut auth_plugin_data = auth_data_part_1.to_vec();
    let i = if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let part_2_len = 13usize.max((auth_plugin_data_len as usize).saturating_sub(8));
        let (i, part_2) = take(part_2_len).parse_peek(i)?;
        auth_plugin_data.extend_from_slice(part_2);
        i
    } else {
        i
    };

    // Bug#59453: servers before 5.5.10/5.6.2 omit the terminating NUL, so
    // fall back to the rest of the payload.
    let auth_plugin_name = match i.iter().position(|&b| b == 0) {
        Some(pos) => &i[..pos],
        None => i,
    };

    Ok((
        &[][..],
        (
            ServerHandshake {
                protocol_version,
                server_version: server_version.to_vec(),
                connection_id,
                auth_plugin_data,
                capability_flags,
                charset,
                status_flags,
                auth_plugin_data_len,
                auth_plugin_name: auth_plugin_name.to_vec(),
            },
            filler,
        ),
    ))
}

/// The client's Handshake Response packet (4.1 layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    /// 23 reserved bytes, retained verbatim for re-encoding.
    pub reserved: Vec<u8>,
    pub username: Vec<u8>,
    pub auth_response: Vec<u8>,
    pub database: Option<Vec<u8>>,
    pub auth_plugin_name: Option<Vec<u8>>,
    /// Connection attributes, kept as an opaque tail.
    pub connect_attrs: Option<Vec<u8>>,
}

impl HandshakeResponse {
    pub fn decode(payload: &[u8]) -> Result<Self, ProxyError> {
        let (_, response) = handshake_response_layout(payload)
            .map_err(|_| ProxyError::FrameMalformed("truncated handshake response"))?;
        Ok(response)
    }

    pub fn username_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.username)
    }
}

fn handshake_response_layout(i: &[u8]) -> IResult<&[u8], HandshakeResponse> {
    let (i, caps_raw) = le_u32.parse_peek(i)?;
    let capability_flags = CapabilityFlags::from_bits_retain(caps_raw);
    let (i, max_packet_size) = le_u32.parse_peek(i)?;
    let (i, charset) = le_u8.parse_peek(i)?;
    let (i, reserved) = take(23usize).parse_peek(i)?;
    let (i, username) = take_until(0.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;

    let (i, auth_response) = if capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        let (i, len) = read_length_encoded_number(i)?;
        take(len).parse_peek(i)?
    } else if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let (i, len) = le_u8.parse_peek(i)?;
        take(len).parse_peek(i)?
    } else {
        let (i, bytes) = take_until(0.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        (i, bytes)
    };

    let (i, database) =
        if capability_flags.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty() {
            let (i, db) = take_until(0.., "\0").parse_peek(i)?;
            let (i, _) = literal(b"\0").parse_peek(i)?;
            (i, Some(db.to_vec()))
        } else {
            (i, None)
        };

    let (i, auth_plugin_name) =
        if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
            let (i, name) = take_until(0.., "\0").parse_peek(i)?;
            let (i, _) = literal(b"\0").parse_peek(i)?;
            (i, Some(name.to_vec()))
        } else {
            (i, None)
        };

    let connect_attrs =
        if capability_flags.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) && !i.is_empty() {
            Some(i.to_vec())
        } else {
            None
        };

    Ok((
        &[][..],
        HandshakeResponse {
            capability_flags,
            max_packet_size,
            charset,
            reserved: reserved.to_vec(),
            username: username.to_vec(),
            auth_response: auth_response.to_vec(),
            database,
            auth_plugin_name,
            connect_attrs,
        },
    ))
}

/// MySQL length-encoded integer: 1, 3, 4, or 9 bytes on the wire.
pub fn read_length_encoded_number(i: &[u8]) -> IResult<&[u8], u64> {
    let (i, b) = le_u8.parse_peek(i)?;
    let r_size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, b as u64)),
    };
    let mut bytes = [0u8; 8];
    let (i, b) = take(r_size).parse_peek(i)?;
    bytes[..r_size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::packet::packet_writer::PacketWriter;
    use crate::protocol::mysql::packet::writers;

    use std::io::Cursor;

    fn sample_server_hello_payload() -> Vec<u8> {
        let caps: u32 = 0x81ff_f7ff;
        let caps_bytes = caps.to_le_bytes();
        let mut p = Vec::new();
        p.push(0x0a);
        p.extend_from_slice(b"8.0.36\0");
        p.extend_from_slice(&42u32.to_le_bytes());
        p.extend_from_slice(b"abcdefgh");
        p.push(0x00);
        p.extend_from_slice(&caps_bytes[..2]);
        p.push(0xff);
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&caps_bytes[2..]);
        p.push(21);
        p.extend_from_slice(&[0u8; 10]);
        p.extend_from_slice(b"ijklmnopqrst\0");
        p.extend_from_slice(b"mysql_native_password\0");
        p
    }

    fn sample_response_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0x09ff_a68du32.to_le_bytes());
        p.extend_from_slice(&16_777_216u32.to_le_bytes());
        p.push(0x21);
        p.extend_from_slice(&[0u8; 23]);
        p.extend_from_slice(b"default\0");
        p.push(20);
        p.extend_from_slice(&[
            0xf7, 0xd1, 0x6c, 0xe9, 0x0d, 0x2f, 0x34, 0xb0, 0x2f, 0xd8, 0x1d, 0x18, 0xc7, 0xa4,
            0xe8, 0x98, 0x97, 0x67, 0xeb, 0xad,
        ]);
        p.extend_from_slice(b"default\0");
        p.extend_from_slice(b"mysql_native_password\0");
        p
    }

    async fn encode_server_hello(hs: &ServerHandshake, seq: u8) -> Vec<u8> {
        let mut writer = PacketWriter::new(Cursor::new(Vec::new()));
        writer.set_seq(seq);
        writers::write_server_handshake(&mut writer, hs).await.unwrap();
        writer.inner_writer.into_inner()
    }

    async fn encode_response(response: &HandshakeResponse, seq: u8) -> Vec<u8> {
        let mut writer = PacketWriter::new(Cursor::new(Vec::new()));
        writer.set_seq(seq);
        writers::write_handshake_response(&mut writer, response)
            .await
            .unwrap();
        writer.inner_writer.into_inner()
    }

    #[tokio::test]
    async fn server_hello_round_trips() {
        let payload = sample_server_hello_payload();
        let hello = ServerHandshake::decode(&payload).unwrap();

        assert_eq!(hello.protocol_version, 0x0a);
        assert_eq!(hello.server_version_str(), "8.0.36");
        assert_eq!(hello.connection_id, 42);
        assert_eq!(hello.auth_plugin_data, b"abcdefghijklmnopqrst\0");
        assert_eq!(hello.auth_plugin_data_len, 21);
        assert_eq!(hello.charset, 0xff);
        assert_eq!(hello.status_flags, 2);
        assert!(hello
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(hello
            .capability_flags
            .contains(CapabilityFlags::CLIENT_SECURE_CONNECTION));
        assert!(hello
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
        assert_eq!(hello.auth_plugin_name, b"mysql_native_password");

        let encoded = encode_server_hello(&hello, 0).await;
        assert_eq!(&encoded[..4], &[payload.len() as u8, 0, 0, 0]);
        assert_eq!(&encoded[4..], &payload[..]);
    }

    #[tokio::test]
    async fn legacy_plugin_name_without_terminator() {
        let mut payload = sample_server_hello_payload();
        payload.pop(); // drop the plugin-name NUL
        let hello = ServerHandshake::decode(&payload).unwrap();
        assert_eq!(hello.auth_plugin_name, b"mysql_native_password");

        // the re-encoder always restores the terminator
        let encoded = encode_server_hello(&hello, 0).await;
        assert_eq!(&encoded[4..], &sample_server_hello_payload()[..]);
    }

    #[test]
    fn rejects_non_v10_protocol() {
        let mut payload = sample_server_hello_payload();
        payload[0] = 0x09;
        let err = ServerHandshake::decode(&payload).unwrap_err();
        assert!(matches!(err, ProxyError::ProtocolUnsupported(0x09)));
    }

    #[test]
    fn rejects_nonzero_filler() {
        let mut payload = sample_server_hello_payload();
        // filler sits after version string, connection id, and part 1
        let filler_at = 1 + b"8.0.36\0".len() + 4 + 8;
        payload[filler_at] = 0x01;
        let err = ServerHandshake::decode(&payload).unwrap_err();
        assert!(matches!(err, ProxyError::FrameMalformed(_)));
    }

    #[test]
    fn rejects_truncated_hello() {
        let payload = sample_server_hello_payload();
        let err = ServerHandshake::decode(&payload[..20]).unwrap_err();
        assert!(matches!(err, ProxyError::FrameMalformed(_)));
    }

    #[tokio::test]
    async fn client_response_round_trips() {
        let payload = sample_response_payload();
        let response = HandshakeResponse::decode(&payload).unwrap();

        assert_eq!(response.username, b"default");
        assert_eq!(response.max_packet_size, 16_777_216);
        assert_eq!(response.charset, 0x21);
        assert_eq!(response.auth_response.len(), 20);
        assert_eq!(response.database.as_deref(), Some(&b"default"[..]));
        assert_eq!(
            response.auth_plugin_name.as_deref(),
            Some(&b"mysql_native_password"[..])
        );
        assert!(response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA));

        let encoded = encode_response(&response, 1).await;
        assert_eq!(&encoded[..4], &[payload.len() as u8, 0, 0, 1]);
        assert_eq!(&encoded[4..], &payload[..]);
    }

    #[test]
    fn rejects_truncated_response() {
        let payload = sample_response_payload();
        let err = HandshakeResponse::decode(&payload[..30]).unwrap_err();
        assert!(matches!(err, ProxyError::FrameMalformed(_)));
    }

    #[test]
    fn lenenc_number_widths() {
        let (rest, n) = read_length_encoded_number(&[0x14, 0xaa]).unwrap();
        assert_eq!((rest, n), (&[0xaa][..], 20));

        let (_, n) = read_length_encoded_number(&[0xfc, 0x10, 0x27]).unwrap();
        assert_eq!(n, 10_000);

        let (_, n) = read_length_encoded_number(&[0xfd, 0x01, 0x00, 0x01]).unwrap();
        assert_eq!(n, 65_537);

        let (_, n) =
            read_length_encoded_number(&[0xfe, 1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(n, 1);
    }
}
