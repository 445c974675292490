//! Blocking MySQL client for slotpool.
//!
//! This crate speaks the MySQL client/server protocol over a plain
//! `std::net::TcpStream`. It covers what a pooled slot needs and no more:
//!
//! - Packet framing with sequence numbers and 16MB splitting
//! - Authentication (mysql_native_password, caching_sha2_password incl. RSA
//!   full authentication, mysql_clear_password, auth switch)
//! - `COM_PING` liveness probes
//! - `COM_QUERY` with raw byte payloads (embedded NULs are sent as-is)
//! - Draining result sets, including multi-statement results
//!
//! # Example
//!
//! ```rust,ignore
//! use slotpool_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::new(config)?;
//! conn.connect()?;
//! conn.real_query(b"SELECT 1")?;
//! conn.drain()?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;

pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection};
