//! Constructor-supplied configuration for the transport layer

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for [`TcpRemoteSender`](crate::TcpRemoteSender)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSenderConfig {
    /// Number of times to retry a failed connect (total attempts is one more)
    pub connect_retry_count: u32,
    /// Pause between connect attempts
    pub connect_retry_interval: Duration,
    /// How long to wait for the acknowledgement byte after a send
    pub acknowledgement_receive_timeout: Duration,
    /// Polling interval while waiting for the acknowledgement byte
    pub acknowledgement_receive_retry_interval: Duration,
}

impl Default for TcpSenderConfig {
    fn default() -> Self {
        Self {
            connect_retry_count: 10,
            connect_retry_interval: Duration::from_millis(1000),
            acknowledgement_receive_timeout: Duration::from_millis(5000),
            acknowledgement_receive_retry_interval: Duration::from_millis(10),
        }
    }
}

impl TcpSenderConfig {
    pub fn with_connect_retry(mut self, count: u32, interval: Duration) -> Self {
        self.connect_retry_count = count;
        self.connect_retry_interval = interval;
        self
    }

    pub fn with_acknowledgement_timeout(mut self, timeout: Duration, retry_interval: Duration) -> Self {
        self.acknowledgement_receive_timeout = timeout;
        self.acknowledgement_receive_retry_interval = retry_interval;
        self
    }

    /// Reject zero polling intervals, which would spin without sleeping
    pub fn validate(&self) -> Result<()> {
        if self.acknowledgement_receive_retry_interval.is_zero() {
            return Err(Error::invalid_argument(
                "Acknowledgement receive retry interval must be greater than 0.",
                Some("acknowledgement_receive_retry_interval"),
            ));
        }
        Ok(())
    }
}

/// Settings for [`TcpRemoteReceiver`](crate::TcpRemoteReceiver)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpReceiverConfig {
    /// Number of times to retry accepting a connection (total attempts is one more)
    pub connect_retry_count: u32,
    /// Pause between accept attempts
    pub connect_retry_interval: Duration,
    /// Polling interval while waiting for frame bytes
    pub receive_retry_interval: Duration,
}

impl Default for TcpReceiverConfig {
    fn default() -> Self {
        Self {
            connect_retry_count: 10,
            connect_retry_interval: Duration::from_millis(1000),
            receive_retry_interval: Duration::from_millis(10),
        }
    }
}

impl TcpReceiverConfig {
    pub fn with_connect_retry(mut self, count: u32, interval: Duration) -> Self {
        self.connect_retry_count = count;
        self.connect_retry_interval = interval;
        self
    }

    pub fn with_receive_retry_interval(mut self, interval: Duration) -> Self {
        self.receive_retry_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.receive_retry_interval.is_zero() {
            return Err(Error::invalid_argument(
                "Receive retry interval must be greater than 0.",
                Some("receive_retry_interval"),
            ));
        }
        Ok(())
    }
}

/// Settings for the compression decorators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Chunk size used when inflating received messages
    pub decompression_buffer_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            decompression_buffer_size: 1024,
        }
    }
}

impl CompressionConfig {
    pub fn with_decompression_buffer_size(mut self, size: usize) -> Self {
        self.decompression_buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.decompression_buffer_size == 0 {
            return Err(Error::invalid_argument(
                "Decompression buffer size must be greater than 0.",
                Some("decompression_buffer_size"),
            ));
        }
        Ok(())
    }
}
