//! Core types shared by the slotpool crates.
//!
//! The pool, the MySQL driver and the command-line driver all report
//! failures through [`Error`]. Only pool construction failures are fatal;
//! every per-query failure is recovered at the slot level.

pub mod error;

pub use error::{
    ConnectionError, ConnectionErrorKind, Error, PoolError, PoolErrorKind, ProtocolError,
    QueryError, QueryErrorKind, Result,
};
