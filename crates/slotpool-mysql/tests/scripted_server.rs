//! Drives `MySqlConnection` against a scripted in-process server that
//! speaks just enough of the protocol for each scenario.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use slotpool_core::error::{ConnectionErrorKind, QueryErrorKind};
use slotpool_core::{Error, QueryError};
use slotpool_mysql::protocol::capabilities::{CLIENT_CONNECT_WITH_DB, DEFAULT_CLIENT_FLAGS};
use slotpool_mysql::protocol::server_status::SERVER_MORE_RESULTS_EXISTS;
use slotpool_mysql::protocol::writer::frame_packets;
use slotpool_mysql::protocol::{PacketHeader, PacketReader, PacketWriter};
use slotpool_mysql::{ConnectionState, MySqlConfig, MySqlConnection};

const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
const MYSQL_TYPE_LONG: u8 = 0x03;

fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) {
    let (bytes, _) = frame_packets(payload, seq);
    stream.write_all(&bytes).unwrap();
}

fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let header = PacketHeader::from_bytes(&header);
    let mut payload = vec![0; header.payload_length as usize];
    stream.read_exact(&mut payload).unwrap();
    (header.sequence_id, payload)
}

#[allow(clippy::cast_possible_truncation)]
fn handshake_payload() -> Vec<u8> {
    let caps = DEFAULT_CLIENT_FLAGS | CLIENT_CONNECT_WITH_DB;
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_string("8.0.36-scripted");
    w.write_u32_le(7);
    w.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
    w.write_u8(0);
    w.write_u16_le((caps & 0xFFFF) as u16);
    w.write_u8(45);
    w.write_u16_le(SERVER_STATUS_AUTOCOMMIT);
    w.write_u16_le((caps >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
    w.write_u8(0);
    w.write_null_string("mysql_native_password");
    w.into_bytes()
}

fn ok_payload(header: u8, affected_rows: u8, status: u16) -> Vec<u8> {
    let [lo, hi] = status.to_le_bytes();
    vec![header, affected_rows, 0x00, lo, hi, 0x00, 0x00]
}

fn column_def(name: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for part in ["def", "test", "mytable", "mytable", name, name] {
        w.write_lenenc_string(part);
    }
    w.write_lenenc_int(0x0c);
    w.write_u16_le(63);
    w.write_u32_le(11);
    w.write_u8(MYSQL_TYPE_LONG);
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}

fn text_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for value in values {
        match value {
            Some(bytes) => w.write_lenenc_bytes(bytes),
            None => w.write_u8(0xFB),
        }
    }
    w.into_bytes()
}

/// Send a one-column result set starting at `seq`; returns the next seq.
fn send_result_set(stream: &mut TcpStream, mut seq: u8, rows: &[Option<&[u8]>], status: u16) -> u8 {
    write_packet(stream, seq, &[0x01]);
    seq += 1;
    write_packet(stream, seq, &column_def("id"));
    seq += 1;
    for row in rows {
        write_packet(stream, seq, &text_row(&[*row]));
        seq += 1;
    }
    write_packet(stream, seq, &ok_payload(0xFE, 0, status));
    seq + 1
}

/// Send the handshake and check the client's response; returns the
/// response payload.
fn accept_client(stream: &mut TcpStream) -> Vec<u8> {
    write_packet(stream, 0, &handshake_payload());
    let (seq, response) = read_packet(stream);
    assert_eq!(seq, 1);
    response
}

fn config_for(listener: &TcpListener) -> MySqlConfig {
    let port = listener.local_addr().unwrap().port();
    MySqlConfig::new()
        .host("127.0.0.1")
        .port(port)
        .user("pool")
        .password("secret")
        .database("test")
        .connect_timeout(Duration::from_secs(5))
        .io_timeout(Some(Duration::from_secs(5)))
}

#[test]
fn connect_ping_query_and_drain() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_for(&listener);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let response = accept_client(&mut stream);
        let mut reader = PacketReader::new(&response);
        let caps = reader.read_u32_le().unwrap();
        assert_ne!(caps & CLIENT_CONNECT_WITH_DB, 0);
        reader.skip(4 + 1 + 23);
        assert_eq!(reader.read_null_string().as_deref(), Some("pool"));
        assert_eq!(reader.read_lenenc_bytes().map(<[u8]>::len), Some(20));
        assert_eq!(reader.read_null_string().as_deref(), Some("test"));
        assert_eq!(
            reader.read_null_string().as_deref(),
            Some("mysql_native_password")
        );
        write_packet(&mut stream, 2, &ok_payload(0x00, 0, SERVER_STATUS_AUTOCOMMIT));

        // COM_PING
        assert_eq!(read_packet(&mut stream), (0, vec![0x0e]));
        write_packet(&mut stream, 1, &ok_payload(0x00, 0, SERVER_STATUS_AUTOCOMMIT));

        // Single result set
        let (_, query) = read_packet(&mut stream);
        assert_eq!(query, b"\x03SELECT * from mytable;");
        send_result_set(
            &mut stream,
            1,
            &[Some(&b"1"[..]), None],
            SERVER_STATUS_AUTOCOMMIT,
        );

        // Raw bytes reach the server unchanged
        let (_, query) = read_packet(&mut stream);
        assert_eq!(query, b"\x03INSERT INTO blobs VALUES ('a\0b')");
        write_packet(&mut stream, 1, &ok_payload(0x00, 1, SERVER_STATUS_AUTOCOMMIT));

        // Multi-statement: two result sets
        let (_, query) = read_packet(&mut stream);
        assert_eq!(query, b"\x03SELECT 1; SELECT 2");
        let seq = send_result_set(
            &mut stream,
            1,
            &[Some(&b"1"[..])],
            SERVER_STATUS_AUTOCOMMIT | SERVER_MORE_RESULTS_EXISTS,
        );
        send_result_set(&mut stream, seq, &[Some(&b"2"[..])], SERVER_STATUS_AUTOCOMMIT);

        // Server-side error
        let (_, query) = read_packet(&mut stream);
        assert_eq!(query, b"\x03SELEKT 1");
        let mut err = vec![0xFF, 0x28, 0x04, b'#'];
        err.extend_from_slice(b"42000");
        err.extend_from_slice(b"You have an error in your SQL syntax");
        write_packet(&mut stream, 1, &err);

        // COM_QUIT
        assert_eq!(read_packet(&mut stream), (0, vec![0x01]));
    });

    let mut conn = MySqlConnection::new(config).unwrap();
    conn.connect().unwrap();
    assert!(conn.is_ready());
    assert_eq!(conn.connection_id(), 7);
    assert_eq!(conn.server_version(), Some("8.0.36-scripted"));

    conn.ping().unwrap();

    conn.real_query(b"SELECT * from mytable;").unwrap();
    assert_eq!(conn.state(), ConnectionState::PendingResult);
    let err = conn.ping().unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError {
            kind: QueryErrorKind::NotReady,
            ..
        })
    ));

    assert_eq!(conn.drain().unwrap(), 2);
    assert!(conn.is_ready());

    conn.real_query(b"INSERT INTO blobs VALUES ('a\0b')").unwrap();
    assert_eq!(conn.affected_rows(), 1);
    assert!(conn.is_ready());
    assert_eq!(conn.drain().unwrap(), 0);

    conn.real_query(b"SELECT 1; SELECT 2").unwrap();
    assert_eq!(conn.state(), ConnectionState::PendingResult);
    assert_eq!(conn.drain().unwrap(), 2);
    assert!(!conn.more_results());
    assert!(conn.is_ready());

    let err = conn.real_query(b"SELEKT 1").unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            ..
        })
    ));
    assert!(conn.is_ready());

    conn.close();
    server.join().unwrap();
}

#[test]
fn rejected_credentials_fail_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_for(&listener);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_client(&mut stream);
        let mut err = vec![0xFF, 0x15, 0x04, b'#'];
        err.extend_from_slice(b"28000");
        err.extend_from_slice(b"Access denied for user 'pool'");
        write_packet(&mut stream, 2, &err);
    });

    let mut conn = MySqlConnection::new(config).unwrap();
    let err = conn.connect().unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ref c) if c.kind == ConnectionErrorKind::Authentication
    ));
    assert!(err.to_string().contains("Access denied"));
    assert_eq!(conn.state(), ConnectionState::Error);
    assert!(!conn.is_ready());

    server.join().unwrap();
}

#[test]
fn ping_fails_after_server_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_for(&listener);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_client(&mut stream);
        write_packet(&mut stream, 2, &ok_payload(0x00, 0, SERVER_STATUS_AUTOCOMMIT));
    });

    let mut conn = MySqlConnection::new(config).unwrap();
    conn.connect().unwrap();
    server.join().unwrap();

    let err = conn.ping().unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(conn.state(), ConnectionState::Error);
    assert!(conn.real_query(b"SELECT 1").is_err());
}

#[test]
fn auth_switch_is_followed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_for(&listener);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_client(&mut stream);

        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_clear_password\0");
        write_packet(&mut stream, 2, &switch);

        let (seq, response) = read_packet(&mut stream);
        assert_eq!(seq, 3);
        assert_eq!(response, b"secret\0");
        write_packet(&mut stream, 4, &ok_payload(0x00, 0, SERVER_STATUS_AUTOCOMMIT));
    });

    let mut conn = MySqlConnection::new(config).unwrap();
    conn.connect().unwrap();
    assert!(conn.is_ready());
    server.join().unwrap();
}

#[test]
fn sha256_password_encrypts_with_server_key() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_for(&listener);
    let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
    let pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let seed: Vec<u8> = (40..60).collect();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accept_client(&mut stream);

        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"sha256_password\0");
        switch.extend_from_slice(&seed);
        switch.push(0);
        write_packet(&mut stream, 2, &switch);

        // Without TLS the client first asks for the public key
        assert_eq!(read_packet(&mut stream), (3, vec![0x01]));
        let mut key = vec![0x01];
        key.extend_from_slice(pem.as_bytes());
        write_packet(&mut stream, 4, &key);

        let (seq, encrypted) = read_packet(&mut stream);
        assert_eq!(seq, 5);
        let plain = private_key.decrypt(Oaep::new::<Sha1>(), &encrypted).unwrap();
        let expected: Vec<u8> = b"secret\0"
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ seed[i % seed.len()])
            .collect();
        assert_eq!(plain, expected);
        write_packet(&mut stream, 6, &ok_payload(0x00, 0, SERVER_STATUS_AUTOCOMMIT));
    });

    let mut conn = MySqlConnection::new(config).unwrap();
    conn.connect().unwrap();
    assert!(conn.is_ready());
    server.join().unwrap();
}
