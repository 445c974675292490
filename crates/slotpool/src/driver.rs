//! Seam between the pool and the database client.
//!
//! The executor only needs five operations from a connection, modelled on
//! the C client's init/connect/ping/query/free-result cycle. [`MySqlDriver`]
//! provides them with [`MySqlConnection`]; tests plug in scripted doubles.

use slotpool_core::Result;
use slotpool_mysql::{MySqlConfig, MySqlConnection};

use crate::config::PoolConfig;

/// One physical connection as seen by the executor.
pub trait DriverConnection: Send {
    /// Open the network connection and authenticate.
    fn connect(&mut self) -> Result<()>;

    /// Liveness probe on an established connection.
    fn ping(&mut self) -> Result<()>;

    /// Send a query given as raw bytes.
    fn real_query(&mut self, query: &[u8]) -> Result<()>;

    /// Consume and discard every pending result; returns the rows discarded.
    fn drain(&mut self) -> Result<u64>;

    /// Release the connection. Best effort.
    fn close(self)
    where
        Self: Sized;
}

/// Creates unconnected handles for empty slots.
pub trait Driver: Send + Sync {
    type Conn: DriverConnection;

    /// Create a handle; it is connected separately.
    fn init(&self) -> Result<Self::Conn>;
}

/// Driver backed by [`MySqlConnection`].
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    config: MySqlConfig,
}

impl MySqlDriver {
    pub fn new(config: &PoolConfig) -> Self {
        Self::from_mysql_config(config.to_mysql_config())
    }

    pub fn from_mysql_config(config: MySqlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }
}

impl Driver for MySqlDriver {
    type Conn = MySqlConnection;

    fn init(&self) -> Result<MySqlConnection> {
        MySqlConnection::new(self.config.clone())
    }
}

impl DriverConnection for MySqlConnection {
    fn connect(&mut self) -> Result<()> {
        MySqlConnection::connect(self)
    }

    fn ping(&mut self) -> Result<()> {
        MySqlConnection::ping(self)
    }

    fn real_query(&mut self, query: &[u8]) -> Result<()> {
        MySqlConnection::real_query(self, query)
    }

    fn drain(&mut self) -> Result<u64> {
        MySqlConnection::drain(self)
    }

    fn close(self) {
        MySqlConnection::close(self);
    }
}
