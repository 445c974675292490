//! MySQL connection implementation.
//!
//! A [`MySqlConnection`] is created unconnected by [`MySqlConnection::new`]
//! and opened with [`MySqlConnection::connect`], mirroring the init/connect
//! split of the C client. Queries are sent as raw bytes with
//! [`MySqlConnection::real_query`]; any result set the server produces must
//! then be discarded with [`MySqlConnection::drain`] before the next command.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use slotpool_core::error::{
    ConnectionError, ConnectionErrorKind, ProtocolError, QueryError, QueryErrorKind,
};
use slotpool_core::{Error, Result};
use tracing::{debug, trace};

use crate::auth::{self, caching_sha2};
use crate::config::MySqlConfig;
use crate::protocol::writer::frame_packets;
use crate::protocol::{
    Command, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketHeader, PacketReader, PacketType,
    PacketWriter, capabilities, server_status,
};

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handle created, no socket yet
    Disconnected,
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Performing authentication handshake
    Authenticating,
    /// Ready for commands
    Ready,
    /// A result set (or further results of a multi-statement) is unread
    PendingResult,
    /// An I/O or protocol failure left the session unusable
    Error,
    /// `COM_QUIT` was sent
    Closed,
}

/// Server capabilities received during handshake.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub capabilities: u32,
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin: String,
    pub auth_data: Vec<u8>,
    pub charset: u8,
    pub status_flags: u16,
}

/// MySQL connection.
pub struct MySqlConnection {
    /// TCP stream to the server, `None` until connected
    stream: Option<TcpStream>,
    state: ConnectionState,
    server_caps: Option<ServerCapabilities>,
    /// Capabilities both sides agreed on
    capabilities: u32,
    connection_id: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    /// Plugin and scramble currently in use (changes on auth switch)
    auth_plugin: String,
    auth_seed: Vec<u8>,
    /// Column count of a result set whose metadata has not been read
    pending_columns: Option<usize>,
    config: MySqlConfig,
    /// Current sequence ID for packet framing
    sequence_id: u8,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Create an unconnected handle.
    ///
    /// Fails when the configuration cannot produce a usable connection.
    pub fn new(config: MySqlConfig) -> Result<Self> {
        if config.connect_timeout.is_zero() {
            return Err(init_error("connect timeout must be greater than zero"));
        }
        if config.max_packet_size == 0 {
            return Err(init_error("max packet size must be greater than zero"));
        }

        Ok(Self {
            stream: None,
            state: ConnectionState::Disconnected,
            server_caps: None,
            capabilities: 0,
            connection_id: 0,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            auth_plugin: String::new(),
            auth_seed: Vec::new(),
            pending_columns: None,
            config,
            sequence_id: 0,
        })
    }

    /// Open the network connection and authenticate.
    ///
    /// 1. TCP connection bounded by `connect_timeout`
    /// 2. Receive server handshake
    /// 3. Send handshake response with authentication
    /// 4. Handle auth result (auth switch, caching_sha2 fast/full auth)
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(connection_error(
                ConnectionErrorKind::Connect,
                "Connection already established",
            ));
        }

        self.state = ConnectionState::Connecting;
        match self.establish() {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                debug!(
                    connection_id = self.connection_id,
                    server = self.server_version().unwrap_or_default(),
                    addr = %self.config.socket_addr(),
                    "MySQL connection established"
                );
                Ok(())
            }
            Err(e) => {
                self.stream = None;
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<()> {
        self.stream = Some(open_stream(&self.config)?);
        self.sequence_id = 0;

        let server_caps = self.read_handshake()?;
        self.connection_id = server_caps.connection_id;
        self.status_flags = server_caps.status_flags;
        self.capabilities = self.config.capability_flags() & server_caps.capabilities;
        self.auth_plugin.clone_from(&server_caps.auth_plugin);
        self.auth_seed.clone_from(&server_caps.auth_data);
        self.server_caps = Some(server_caps);
        self.state = ConnectionState::Authenticating;

        self.send_handshake_response()?;
        self.handle_auth_result()?;

        // Past the handshake, reads follow the query timeout instead.
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(self.config.io_timeout)?;
            stream.set_write_timeout(self.config.io_timeout)?;
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for commands.
    pub fn is_ready(&self) -> bool {
        self.stream.is_some() && self.state == ConnectionState::Ready
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_caps
            .as_ref()
            .map(|caps| caps.server_version.as_str())
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Whether the server announced further results for the last query.
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }

    fn read_handshake(&mut self) -> Result<ServerCapabilities> {
        let (payload, _) = self.read_packet()?;

        if payload.first() == Some(&0xFF) {
            // e.g. "Host is blocked" or "Too many connections"
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .ok_or_else(|| protocol_error("Invalid error packet"))?;
            return Err(connection_error(
                ConnectionErrorKind::Connect,
                format!(
                    "Server rejected connection: {} ({})",
                    err.error_message, err.error_code
                ),
            ));
        }

        let mut reader = PacketReader::new(&payload);

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("Missing protocol version"))?;
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "Unsupported protocol version: {}",
                protocol_version
            )));
        }

        let server_version = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("Missing server version"))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("Missing connection ID"))?;
        let auth_data_1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("Missing auth data"))?;

        // Filler
        reader.skip(1);

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("Missing capability flags"))?;
        let charset = reader.read_u8().unwrap_or(self.config.charset);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_u8().map_or(0, usize::from)
        } else {
            0
        };

        // Reserved
        reader.skip(10);

        let mut auth_data = auth_data_1.to_vec();
        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len.saturating_sub(8).max(13);
            let data2 = reader
                .read_bytes(len2)
                .or_else(|| Some(reader.read_rest()))
                .unwrap_or_default();
            auth_data.extend_from_slice(data2.strip_suffix(&[0]).unwrap_or(data2));
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string().unwrap_or_default()
        } else {
            auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        trace!(
            server_version = %server_version,
            connection_id,
            auth_plugin = %auth_plugin,
            "Received server handshake"
        );

        Ok(ServerCapabilities {
            capabilities,
            protocol_version,
            server_version,
            connection_id,
            auth_plugin,
            auth_data,
            charset,
            status_flags,
        })
    }

    fn send_handshake_response(&mut self) -> Result<()> {
        let client_caps = self.capabilities;
        let auth_response = auth::auth_response(
            &self.auth_plugin,
            self.config.password.as_deref().unwrap_or(""),
            &self.auth_seed,
        );

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // Scrambles are at most 32 bytes
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u8(auth_response.len() as u8);
            writer.write_bytes(&auth_response);
        } else {
            writer.write_bytes(&auth_response);
            writer.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.config.database.as_deref().unwrap_or(""));
        }

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&self.auth_plugin);
        }

        if client_caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        self.write_packet(writer.as_bytes())
    }

    fn handle_auth_result(&mut self) -> Result<()> {
        let (payload, _) = self.read_packet()?;

        match payload.first().copied() {
            None => Err(protocol_error("Empty authentication response")),
            Some(0x00) => {
                if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            Some(0xFF) => {
                let err = PacketReader::new(&payload)
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("Invalid error packet"))?;
                Err(auth_error(format!(
                    "Authentication failed: {} ({})",
                    err.error_message, err.error_code
                )))
            }
            Some(0xFE) => self.handle_auth_switch(&payload[1..]),
            Some(caching_sha2::MORE_DATA) => self.handle_more_auth_data(&payload[1..]),
            Some(other) => Err(protocol_error(format!(
                "Unknown auth response: {:02X}",
                other
            ))),
        }
    }

    fn handle_auth_switch(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(data);
        let plugin = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("Missing plugin name in auth switch"))?;
        let seed = reader.read_rest();

        debug!(plugin = %plugin, "Server requested auth switch");
        self.auth_seed = seed.strip_suffix(&[0]).unwrap_or(seed).to_vec();
        self.auth_plugin = plugin;

        let response = auth::auth_response(
            &self.auth_plugin,
            self.config.password.as_deref().unwrap_or(""),
            &self.auth_seed,
        );
        self.write_packet(&response)?;
        self.handle_auth_result()
    }

    fn handle_more_auth_data(&mut self, data: &[u8]) -> Result<()> {
        // sha256_password answers the key request with the PEM itself
        if self.auth_plugin == auth::plugins::SHA256_PASSWORD {
            return self.send_encrypted_password(data);
        }
        match data.first().copied() {
            // The OK packet follows
            Some(caching_sha2::FAST_AUTH_SUCCESS) => self.handle_auth_result(),
            Some(caching_sha2::PERFORM_FULL_AUTH) => self.full_authentication(),
            _ => Err(protocol_error("Unexpected authentication data from server")),
        }
    }

    /// caching_sha2_password full authentication over a plain socket:
    /// request the server's RSA key, then send the encrypted password.
    fn full_authentication(&mut self) -> Result<()> {
        self.write_packet(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
        let (payload, _) = self.read_packet()?;
        let pem = match payload.split_first() {
            Some((&caching_sha2::MORE_DATA, pem)) => pem,
            _ => return Err(auth_error("Server did not send an RSA public key")),
        };
        self.send_encrypted_password(pem)
    }

    /// Send the password encrypted with the server's RSA key (OAEP) and
    /// read the final auth result.
    fn send_encrypted_password(&mut self, pem: &[u8]) -> Result<()> {
        let password = self.config.password.clone().unwrap_or_default();
        let encrypted =
            auth::sha256_password_rsa(&password, &self.auth_seed, pem, true).map_err(auth_error)?;
        self.write_packet(&encrypted)?;
        self.handle_auth_result()
    }

    /// Liveness probe (`COM_PING`).
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.sequence_id = 0;
        self.write_packet(&[Command::Ping as u8])?;

        let (payload, _) = self.read_packet()?;
        match payload.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => {
                let message = PacketReader::new(&payload)
                    .parse_err_packet()
                    .map_or_else(|| "Ping failed".to_string(), |e| e.error_message);
                Err(connection_error(ConnectionErrorKind::Ping, message))
            }
            _ => {
                self.state = ConnectionState::Error;
                Err(connection_error(
                    ConnectionErrorKind::Ping,
                    "Unexpected response to ping",
                ))
            }
        }
    }

    /// Send a text-protocol query (`COM_QUERY`) with the exact bytes given.
    ///
    /// The bytes are not interpreted or escaped, so binary payloads with
    /// embedded NULs are sent unchanged. On success the connection is either
    /// `Ready` or `PendingResult`; in the latter case the result must be
    /// discarded with [`drain`](Self::drain).
    pub fn real_query(&mut self, query: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.sequence_id = 0;

        let mut payload = Vec::with_capacity(query.len() + 1);
        payload.push(Command::Query as u8);
        payload.extend_from_slice(query);
        self.write_packet(&payload)?;

        self.read_query_response()
    }

    /// Read the response header of a query (or of the next result of a
    /// multi-statement query).
    fn read_query_response(&mut self) -> Result<()> {
        let (payload, _) = self.read_packet()?;

        let Some(&first) = payload.first() else {
            self.state = ConnectionState::Error;
            return Err(protocol_error("Empty query response"));
        };

        match PacketType::from_first_byte(first, payload.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("Invalid OK packet"))?;
                self.apply_ok(&ok);
                self.state = self.state_after_result();
                Ok(())
            }
            PacketType::Error => {
                let err = PacketReader::new(&payload)
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("Invalid error packet"))?;
                // An error ends a multi-statement batch
                self.status_flags &= !server_status::SERVER_MORE_RESULTS_EXISTS;
                self.state = ConnectionState::Ready;
                Err(query_error(&err))
            }
            PacketType::LocalInfile => {
                // The server now waits for file contents; the session cannot
                // be reused without answering, so it is marked broken.
                self.state = ConnectionState::Error;
                Err(query_error_msg(
                    QueryErrorKind::Unsupported,
                    "LOCAL INFILE not supported",
                ))
            }
            PacketType::Eof | PacketType::Data => {
                let column_count = PacketReader::new(&payload)
                    .read_lenenc_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| protocol_error("Invalid column count"))?;
                self.pending_columns = Some(column_count);
                self.state = ConnectionState::PendingResult;
                Ok(())
            }
        }
    }

    /// Advance to the next result of a multi-statement query.
    ///
    /// Returns `false` when there are no further results.
    pub fn next_result(&mut self) -> Result<bool> {
        if self.pending_columns.is_some() {
            return Err(out_of_sync());
        }
        if !self.more_results() {
            if self.state == ConnectionState::PendingResult {
                self.state = ConnectionState::Ready;
            }
            return Ok(false);
        }
        self.read_query_response()?;
        Ok(true)
    }

    /// Consume and discard every pending result, including the further
    /// results of a multi-statement query.
    ///
    /// Returns the number of rows discarded. Afterwards the connection is
    /// `Ready` for the next command.
    pub fn drain(&mut self) -> Result<u64> {
        let mut discarded = 0;
        loop {
            if let Some(column_count) = self.pending_columns.take() {
                for _ in 0..column_count {
                    self.read_packet()?;
                }
                self.skip_metadata_eof()?;
                discarded += self.skip_rows()?;
            }
            if !self.next_result()? {
                break;
            }
        }
        trace!(discarded, "Drained pending results");
        Ok(discarded)
    }

    /// Close the connection gracefully with `COM_QUIT`.
    ///
    /// Best effort; the socket is dropped either way.
    pub fn close(mut self) {
        if self.stream.is_some()
            && matches!(
                self.state,
                ConnectionState::Ready | ConnectionState::PendingResult
            )
        {
            self.sequence_id = 0;
            let _ = self.write_packet(&[Command::Quit as u8]);
        }
        self.state = ConnectionState::Closed;
        self.stream = None;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.stream.is_none() {
            return Err(connection_error(
                ConnectionErrorKind::Disconnected,
                "Connection is not established",
            ));
        }
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::PendingResult => Err(out_of_sync()),
            other => Err(connection_error(
                ConnectionErrorKind::Disconnected,
                format!("Connection not ready for commands (state {:?})", other),
            )),
        }
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
    }

    fn state_after_result(&self) -> ConnectionState {
        if self.more_results() {
            ConnectionState::PendingResult
        } else {
            ConnectionState::Ready
        }
    }

    /// Without CLIENT_DEPRECATE_EOF an EOF packet separates metadata from rows.
    fn skip_metadata_eof(&mut self) -> Result<()> {
        if self.capabilities & capabilities::CLIENT_DEPRECATE_EOF == 0 {
            self.read_packet()?;
        }
        Ok(())
    }

    /// Read and discard row packets up to the terminating EOF/OK packet.
    /// Returns the number of rows skipped.
    fn skip_rows(&mut self) -> Result<u64> {
        let mut count = 0;
        loop {
            let (payload, _) = self.read_packet()?;
            match payload.first().copied() {
                // A row starting with 0xFE would need a payload of at least
                // 2^24 bytes, so anything shorter is the terminator.
                Some(0xFE) if payload.len() < MAX_PACKET_SIZE => {
                    let mut reader = PacketReader::new(&payload);
                    if self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0 {
                        let ok = reader
                            .parse_ok_packet()
                            .ok_or_else(|| protocol_error("Invalid result set terminator"))?;
                        self.status_flags = ok.status_flags;
                        self.warnings = ok.warnings;
                    } else {
                        let eof = reader
                            .parse_eof_packet()
                            .ok_or_else(|| protocol_error("Invalid EOF packet"))?;
                        self.status_flags = eof.status_flags;
                        self.warnings = eof.warnings;
                    }
                    break;
                }
                Some(0xFF) => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    self.status_flags &= !server_status::SERVER_MORE_RESULTS_EXISTS;
                    self.state = ConnectionState::Ready;
                    return Err(query_error(&err));
                }
                _ => count += 1,
            }
        }

        self.state = self.state_after_result();
        Ok(count)
    }

    /// Read a complete (possibly multi-frame) packet from the stream.
    fn read_packet(&mut self) -> Result<(Vec<u8>, u8)> {
        let limit = self.config.max_packet_size as usize;
        let Some(stream) = self.stream.as_mut() else {
            return Err(connection_error(
                ConnectionErrorKind::Disconnected,
                "Connection is not established",
            ));
        };

        match read_frames(stream, limit) {
            Ok((payload, sequence_id)) => {
                self.sequence_id = sequence_id.wrapping_add(1);
                Ok((payload, sequence_id))
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Frame and write a payload, advancing the sequence id.
    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (bytes, next_sequence) = frame_packets(payload, self.sequence_id);
        let Some(stream) = self.stream.as_mut() else {
            return Err(connection_error(
                ConnectionErrorKind::Disconnected,
                "Connection is not established",
            ));
        };

        let written = stream.write_all(&bytes).and_then(|()| stream.flush());
        match written {
            Ok(()) => {
                self.sequence_id = next_sequence;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(io_error(e, "Failed to write packet"))
            }
        }
    }
}

/// Resolve the configured address and connect to the first reachable one.
fn open_stream(config: &MySqlConfig) -> Result<TcpStream> {
    let addr = config.socket_addr();
    let candidates = addr.to_socket_addrs().map_err(|e| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Connect,
            message: format!("Failed to resolve {}: {}", addr, e),
            source: Some(Box::new(e)),
        })
    })?;

    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                stream.set_read_timeout(Some(config.connect_timeout))?;
                stream.set_write_timeout(Some(config.connect_timeout))?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    let Some(e) = last_error else {
        return Err(connection_error(
            ConnectionErrorKind::Connect,
            format!("No addresses found for {}", addr),
        ));
    };
    let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Err(Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {}: {}", addr, e),
        source: Some(Box::new(e)),
    }))
}

/// Read one logical packet, joining continuation frames.
///
/// Returns the payload and the sequence id of the last frame.
fn read_frames(stream: &mut TcpStream, limit: usize) -> Result<(Vec<u8>, u8)> {
    let mut payload = Vec::new();
    loop {
        let mut header_buf = [0u8; PacketHeader::SIZE];
        stream
            .read_exact(&mut header_buf)
            .map_err(|e| io_error(e, "Failed to read packet header"))?;
        let header = PacketHeader::from_bytes(&header_buf);
        let frame_len = header.payload_length as usize;

        if payload.len() + frame_len > limit {
            return Err(protocol_error(format!(
                "Packet exceeds max packet size of {} bytes",
                limit
            )));
        }

        let start = payload.len();
        payload.resize(start + frame_len, 0);
        stream
            .read_exact(&mut payload[start..])
            .map_err(|e| io_error(e, "Failed to read packet payload"))?;

        if frame_len < MAX_PACKET_SIZE {
            return Ok((payload, header.sequence_id));
        }
    }
}

// Helper functions for creating errors

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        source: None,
    })
}

fn init_error(msg: impl Into<String>) -> Error {
    connection_error(ConnectionErrorKind::Init, msg)
}

fn auth_error(msg: impl Into<String>) -> Error {
    connection_error(ConnectionErrorKind::Authentication, msg)
}

fn connection_error(kind: ConnectionErrorKind, msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: msg.into(),
        source: None,
    })
}

fn io_error(err: io::Error, context: &str) -> Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
        _ => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("{}: {}", context, err),
            source: Some(Box::new(err)),
        }),
    }
}

fn out_of_sync() -> Error {
    query_error_msg(
        QueryErrorKind::NotReady,
        "Commands out of sync; the pending result must be consumed first",
    )
}

fn query_error(err: &ErrPacket) -> Error {
    let kind = if err.is_duplicate_key() || err.is_foreign_key_violation() {
        QueryErrorKind::Constraint
    } else if err.is_not_found() {
        QueryErrorKind::NotFound
    } else if err.is_permission_denied() {
        QueryErrorKind::Permission
    } else if err.sql_state.starts_with("42") {
        QueryErrorKind::Syntax
    } else {
        QueryErrorKind::Database
    };

    Error::Query(QueryError {
        kind,
        sqlstate: (!err.sql_state.is_empty()).then(|| err.sql_state.clone()),
        code: Some(err.error_code),
        message: err.error_message.clone(),
        source: None,
    })
}

fn query_error_msg(kind: QueryErrorKind, msg: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind,
        sqlstate: None,
        code: None,
        message: msg.into(),
        source: None,
    })
}
