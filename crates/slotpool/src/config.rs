//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use slotpool_core::{Error, PoolErrorKind, Result};
use slotpool_mysql::MySqlConfig;

/// Default MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Default number of slots.
pub const DEFAULT_SIZE: usize = 4;

/// Default bound on establishing one connection, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Capacity of the host field in bytes, terminator included.
pub const HOST_CAPACITY: usize = 128;

/// Capacity of the user, password and database fields in bytes,
/// terminator included.
pub const FIELD_CAPACITY: usize = 64;

/// Connection pool configuration.
///
/// Captured once when the pool is built and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of slots (fixed for the pool's lifetime)
    pub size: usize,
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    /// Bound on TCP connect plus authentication, in seconds
    pub connect_timeout_secs: u64,
    /// Read/write timeout for queries; `None` inherits the OS default
    pub read_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            host: String::new(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            port: DEFAULT_PORT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration for a pool of `size` slots.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn read_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.read_timeout_secs = secs;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    /// Check the size and the fixed field capacities.
    ///
    /// A field must leave room for its terminator, so `host` holds at most
    /// 127 bytes and the other strings at most 63.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::pool(
                PoolErrorKind::InvalidSize,
                "pool size must be at least 1",
            ));
        }

        let fields = [
            ("host", &self.host, HOST_CAPACITY),
            ("user", &self.user, FIELD_CAPACITY),
            ("password", &self.password, FIELD_CAPACITY),
            ("database", &self.database, FIELD_CAPACITY),
        ];
        for (name, value, capacity) in fields {
            if value.len() >= capacity {
                return Err(Error::pool(
                    PoolErrorKind::ConfigTooLarge,
                    format!(
                        "{} is {} bytes, the limit is {}",
                        name,
                        value.len(),
                        capacity - 1
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Driver-level configuration for one slot's connection.
    pub fn to_mysql_config(&self) -> MySqlConfig {
        MySqlConfig::new()
            .host(self.host.as_str())
            .port(self.port)
            .user(self.user.as_str())
            .password(self.password.as_str())
            .database(self.database.as_str())
            .connect_timeout(self.connect_timeout())
            .io_timeout(self.read_timeout())
            .attribute("program_name", "slotpool")
    }
}
