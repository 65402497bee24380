//! Compressing decorators for senders and receivers
//!
//! Messages are gzip-compressed and then base64-encoded so the result is
//! still a text message any transport can carry.

use crate::config::CompressionConfig;
use crate::metrics::{null_metric_logger, AmountMetric, CountMetric, IntervalMetric, MetricLogger};
use crate::transport::{CancelHandle, RemoteReceiver, RemoteSender};
use crate::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::sync::Arc;

/// Gzip then base64-encode a message; empty input stays empty
pub fn compress(message: &str) -> Result<String> {
    if message.is_empty() {
        return Ok(String::new());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(message.as_bytes())
        .map_err(|e| Error::compression("Failed to compress message.", e))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::compression("Failed to compress message.", e))?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Base64-decode then inflate a message, `buffer_size` bytes at a time.
///
/// Blank input decompresses to an empty string.
pub fn decompress(message: &str, buffer_size: usize) -> Result<String> {
    let message = message.trim();
    if message.is_empty() {
        return Ok(String::new());
    }
    if buffer_size == 0 {
        return Err(Error::invalid_argument(
            "Decompression buffer size must be greater than 0.",
            Some("buffer_size"),
        ));
    }

    let compressed = general_purpose::STANDARD
        .decode(message)
        .map_err(|e| Error::compression("Failed to decode base64 message.", e))?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut buffer = vec![0u8; buffer_size];
    let mut output = Vec::new();
    loop {
        let n = decoder
            .read(&mut buffer)
            .map_err(|e| Error::compression("Failed to decompress message.", e))?;
        if n == 0 {
            break;
        }
        output.extend_from_slice(&buffer[..n]);
    }

    String::from_utf8(output)
        .map_err(|e| Error::compression("Decompressed message is not valid UTF-8.", e))
}

/// Receiver decorator that decompresses every message
pub struct RemoteReceiverDecompressor<R> {
    inner: R,
    config: CompressionConfig,
    metric_logger: Arc<dyn MetricLogger>,
}

impl<R: RemoteReceiver> RemoteReceiverDecompressor<R> {
    pub fn new(inner: R, config: CompressionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            config,
            metric_logger: null_metric_logger(),
        })
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: RemoteReceiver> RemoteReceiver for RemoteReceiverDecompressor<R> {
    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        self.inner.disconnect()
    }

    fn receive(&mut self) -> Result<String> {
        let received = self.inner.receive()?;

        self.metric_logger.begin(IntervalMetric::MessageDecompressTime);
        match decompress(&received, self.config.decompression_buffer_size) {
            Ok(message) => {
                self.metric_logger.end(IntervalMetric::MessageDecompressTime);
                if !received.is_empty() {
                    self.metric_logger.increment(CountMetric::MessageDecompressed);
                    self.metric_logger
                        .add(AmountMetric::CompressedBytesReceived, received.len() as u64);
                }
                Ok(message)
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MessageDecompressTime);
                Err(e)
            }
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    fn cancel_receive(&self) {
        self.inner.cancel_receive();
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

/// Sender decorator that compresses every message
pub struct RemoteSenderCompressor<S> {
    inner: S,
    metric_logger: Arc<dyn MetricLogger>,
}

impl<S: RemoteSender> RemoteSenderCompressor<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            metric_logger: null_metric_logger(),
        }
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RemoteSender> RemoteSender for RemoteSenderCompressor<S> {
    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        self.inner.disconnect()
    }

    fn send(&mut self, message: &str) -> Result<()> {
        self.metric_logger.begin(IntervalMetric::MessageCompressTime);
        let compressed = match compress(message) {
            Ok(compressed) => compressed,
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MessageCompressTime);
                return Err(e);
            }
        };
        self.metric_logger.end(IntervalMetric::MessageCompressTime);
        self.metric_logger.increment(CountMetric::MessageCompressed);
        self.metric_logger
            .add(AmountMetric::CompressedBytesSent, compressed.len() as u64);

        self.inner.send(&compressed)
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}
