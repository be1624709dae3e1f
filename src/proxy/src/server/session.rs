//! Per-connection mediation: the proxy is the authoritative endpoint on both
//! sides of the handshake, then degrades into a near-transparent relay.

use crate::error::ProxyError;
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::error_codes::ErrorKind::ER_ACCESS_DENIED_ERROR;
use crate::protocol::mysql::handshake::{HandshakeResponse, ServerHandshake};
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::server::auth::credentials::Credentials;
use crate::server::auth::scramble_native_password;
use crate::server::forwarder;

use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// One client connection end to end: upstream dial, dual handshake with
/// identity substitution, then two detached relay tasks.
pub struct Session {
    id: u64,
    upstream_addr: String,
    credentials: Arc<Credentials>,
}

impl Session {
    pub fn new(id: u64, upstream_addr: String, credentials: Arc<Credentials>) -> Self {
        Self {
            id,
            upstream_addr,
            credentials,
        }
    }

    /// Runs the whole session on a freshly accepted client socket. Returns
    /// once the relay tasks are spawned; they outlive this call and log their
    /// own termination.
    pub async fn run(self, client: TcpStream) -> Result<(), ProxyError> {
        let upstream = TcpStream::connect(&self.upstream_addr)
            .await
            .map_err(ProxyError::UpstreamUnreachable)?;
        debug!(
            "session [{}] dialed upstream {}",
            self.id, self.upstream_addr
        );
        let (upstream_read, upstream_write) = upstream.into_split();
        let (client_read, client_write) = client.into_split();
        let established = self
            .establish(client_read, client_write, upstream_read, upstream_write)
            .await?;
        established.relay();
        Ok(())
    }

    /// Drives the handshake phase over any transport pair: decode the
    /// upstream greeting, forward it, terminate the client's authentication
    /// locally, then answer the same challenge as the service account.
    pub async fn establish<CR, CW, UR, UW>(
        self,
        client_read: CR,
        client_write: CW,
        upstream_read: UR,
        upstream_write: UW,
    ) -> Result<EstablishedSession<CR, CW, UR, UW>, ProxyError>
    where
        CR: AsyncRead + Send + Unpin + 'static,
        CW: AsyncWrite + Send + Unpin + 'static,
        UR: AsyncRead + Send + Unpin + 'static,
        UW: AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.id;
        let mut client_reader = PacketReader::new(client_read);
        let mut client_writer = PacketWriter::new(client_write);
        let mut upstream_reader = PacketReader::new(upstream_read);
        let mut upstream_writer = PacketWriter::new(upstream_write);

        // Upstream greeting: keep the challenge, forward the rest verbatim.
        let (hello_seq, hello_pkt) = upstream_reader
            .next_async()
            .await?
            .ok_or(ProxyError::Eof)?;
        let server_hello = ServerHandshake::decode(&hello_pkt)?;
        info!(
            "session [{id}] upstream hello: server {:?}, conn id {}, plugin {:?}",
            server_hello.server_version_str(),
            server_hello.connection_id,
            String::from_utf8_lossy(&server_hello.auth_plugin_name),
        );
        let nonce = server_hello.auth_plugin_data.clone();
        client_writer.set_seq(hello_seq);
        writers::write_server_handshake(&mut client_writer, &server_hello).await?;

        // Client reply, verified against the local credential table.
        let (auth_seq, auth_pkt) = client_reader
            .next_async()
            .await?
            .ok_or(ProxyError::Eof)?;
        let mut response = HandshakeResponse::decode(&auth_pkt)?;
        let username = response.username_str().into_owned();
        if let Some(plugin) = &response.auth_plugin_name {
            if plugin.as_slice() != AuthNativePassword.as_ref().as_bytes() {
                warn!(
                    "session [{id}] client {username:?} offers plugin {:?}",
                    String::from_utf8_lossy(plugin)
                );
            }
        }
        if let Err(denied) =
            verify_client(&self.credentials, &username, &nonce, &response.auth_response)
        {
            warn!("session [{id}] rejecting {username:?}: {denied}");
            client_writer.set_seq(auth_seq.wrapping_add(1));
            writers::write_err_packet(
                ER_ACCESS_DENIED_ERROR,
                format!("Access denied for user '{username}'").as_bytes(),
                &mut client_writer,
            )
            .await?;
            return Err(denied);
        }
        info!("session [{id}] authenticated {username:?}");

        // Identity substitution: the service account answers the same nonce.
        let service = &self.credentials.service;
        response.username = service.proxy_user.clone().into_bytes();
        response.auth_response =
            scramble_native_password(service.proxy_pass.as_bytes(), &nonce).to_vec();
        upstream_writer.set_seq(auth_seq);
        writers::write_handshake_response(&mut upstream_writer, &response).await?;

        // The upstream's verdict reaches the client unmodified; the header
        // byte is only peeked at for the log line.
        let (verdict_seq, verdict) = upstream_reader
            .next_async()
            .await?
            .ok_or(ProxyError::Eof)?;
        if verdict.is_ok_packet() {
            info!("session [{id}] upstream accepted the service account");
        } else if verdict.is_err_packet() {
            warn!("session [{id}] upstream rejected the service account");
        }
        client_writer.set_seq(verdict_seq);
        client_writer.write_all(&verdict)?;
        client_writer.end_packet().await?;
        client_writer.flush_all().await?;

        Ok(EstablishedSession {
            id,
            username: Arc::from(username),
            client_reader,
            client_writer,
            upstream_reader,
            upstream_writer,
        })
    }
}

fn verify_client(
    credentials: &Credentials,
    username: &str,
    nonce: &[u8],
    auth_response: &[u8],
) -> Result<(), ProxyError> {
    let Some(password) = credentials.users.password_for(username) else {
        return Err(ProxyError::UserUnknown(username.to_string()));
    };
    let expected = scramble_native_password(password.as_bytes(), nonce);
    if expected[..] != *auth_response {
        return Err(ProxyError::AuthMismatch(username.to_string()));
    }
    Ok(())
}

/// Both transports of a session that passed authentication.
#[derive(Debug)]
pub struct EstablishedSession<CR, CW, UR, UW> {
    pub id: u64,
    pub username: Arc<str>,
    pub client_reader: PacketReader<CR>,
    pub client_writer: PacketWriter<CW>,
    pub upstream_reader: PacketReader<UR>,
    pub upstream_writer: PacketWriter<UW>,
}

impl<CR, CW, UR, UW> EstablishedSession<CR, CW, UR, UW>
where
    CR: AsyncRead + Send + Unpin + 'static,
    CW: AsyncWrite + Send + Unpin + 'static,
    UR: AsyncRead + Send + Unpin + 'static,
    UW: AsyncWrite + Send + Unpin + 'static,
{
    /// Spawns the two relay directions, fire-and-forget. Either direction
    /// ending tears the session down: its halves drop, the peer direction
    /// soon hits a closed transport, and both sockets close.
    pub fn relay(self) {
        tokio::spawn(forwarder::forward_client_to_upstream(
            self.client_reader,
            self.upstream_writer,
            self.id,
            Arc::clone(&self.username),
        ));
        tokio::spawn(forwarder::forward_upstream_to_client(
            self.upstream_reader,
            self.client_writer,
            self.id,
        ));
    }
}
