//! Framed, acknowledged TCP sender

use crate::config::TcpSenderConfig;
use crate::frame::{self, ACK};
use crate::metrics::{null_metric_logger, CountMetric, IntervalMetric, MetricLogger};
use crate::transport::RemoteSender;
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected,
    Disposed,
}

/// Outcome of one write-and-acknowledge attempt that did not succeed
enum Failure {
    /// Reconnect and resend the same frame
    Retry(Error),
    Fatal(Error),
}

/// TCP client side of a framed message channel.
///
/// Every message is written as a frame carrying a sequence number and is
/// only considered sent once the receiver answers with an acknowledgement
/// byte. A lost acknowledgement or a dropped connection causes one
/// reconnect followed by a resend of the identical frame; the receiver
/// discards the copy if the first one had already arrived.
///
/// Sequence numbers start at 1 and keep increasing for the lifetime of the
/// sender, including across reconnects.
pub struct TcpRemoteSender {
    addr: SocketAddr,
    config: TcpSenderConfig,
    metric_logger: Arc<dyn MetricLogger>,
    state: State,
    stream: Option<TcpStream>,
    next_sequence_number: u32,
}

impl TcpRemoteSender {
    pub fn new(addr: SocketAddr, config: TcpSenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            addr,
            config,
            metric_logger: null_metric_logger(),
            state: State::Disconnected,
            stream: None,
            next_sequence_number: 1,
        })
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.state == State::Disposed {
            return Err(Error::disposed("TcpRemoteSender"));
        }
        Ok(())
    }

    /// Connect with up to `connect_retry_count` retries
    fn connect_with_retry(&self) -> Result<TcpStream> {
        let attempts = self.config.connect_retry_count.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match TcpStream::connect(self.addr) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(|e| {
                        Error::io(format!("Failed to configure connection to {}.", self.addr), e)
                    })?;
                    tracing::debug!(addr = %self.addr, attempt, "Connected to remote receiver");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(addr = %self.addr, attempt, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                thread::sleep(self.config.connect_retry_interval);
            }
        }

        let message = format!("Failed to connect to {} after {} attempts.", self.addr, attempts);
        Err(match last_error {
            Some(e) => Error::connection(message, e),
            None => Error::connection_msg(message),
        })
    }

    fn reconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        match self.connect_with_retry() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.metric_logger
                    .increment(CountMetric::TcpRemoteSenderReconnected);
                tracing::info!(addr = %self.addr, "🔄 Reconnected to remote receiver");
                Ok(())
            }
            Err(e) => {
                self.state = State::Disconnected;
                Err(e)
            }
        }
    }

    fn send_frame(&mut self, sequence_number: u32, frame: &[u8]) -> Result<()> {
        let reason = match self.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(Failure::Fatal(e)) => return Err(e),
            Err(Failure::Retry(reason)) => reason,
        };

        tracing::warn!(
            addr = %self.addr,
            sequence_number,
            reason = %reason,
            "Message not acknowledged, reconnecting and resending"
        );
        self.reconnect()?;

        match self.try_send(frame) {
            Ok(()) => Ok(()),
            Err(Failure::Fatal(e)) => Err(e),
            Err(Failure::Retry(e)) => Err(Error::transport(
                format!(
                    "Failed to send message with sequence number {sequence_number} to {} after reconnecting.",
                    self.addr
                ),
                e,
            )),
        }
    }

    fn try_send(&mut self, frame: &[u8]) -> std::result::Result<(), Failure> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Failure::Retry(Error::connection_msg("No open connection.")));
        };
        check_no_pending_data(stream)?;

        if let Err(e) = stream.write_all(frame).and_then(|()| stream.flush()) {
            if is_disconnect(&e) || stream.peer_addr().is_err() {
                return Err(Failure::Retry(Error::io("Failed to write message frame.", e)));
            }
            return Err(Failure::Fatal(Error::transport(
                "Writing the message frame failed while the connection still reports itself open.",
                e,
            )));
        }

        self.wait_for_acknowledgement()
    }

    fn wait_for_acknowledgement(&mut self) -> std::result::Result<(), Failure> {
        let timeout = self.config.acknowledgement_receive_timeout;
        let poll = self.config.acknowledgement_receive_retry_interval;
        let Some(stream) = self.stream.as_mut() else {
            return Err(Failure::Retry(Error::connection_msg("No open connection.")));
        };
        stream
            .set_read_timeout(Some(poll))
            .map_err(|e| Failure::Fatal(Error::io("Failed to set acknowledgement poll interval.", e)))?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 2];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(Failure::Retry(Error::connection_msg(
                        "Connection closed while waiting for acknowledgement.",
                    )))
                }
                Ok(1) if buf[0] == ACK => return Ok(()),
                Ok(1) => {
                    return Err(Failure::Fatal(Error::protocol(
                        "Unexpected acknowledgement byte.",
                        Some(format!("{ACK:#04x}")),
                        Some(format!("{:#04x}", buf[0])),
                    )))
                }
                Ok(n) => {
                    return Err(Failure::Fatal(Error::protocol(
                        "Received more than one acknowledgement byte.",
                        Some("1 byte".to_string()),
                        Some(format!("{n} bytes")),
                    )))
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if Instant::now() >= deadline {
                        return Err(Failure::Retry(Error::timeout(
                            "acknowledgement receive",
                            timeout.as_millis() as u64,
                        )));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(Failure::Retry(Error::io(
                        "Failed to read acknowledgement.",
                        e,
                    )))
                }
            }
        }
    }
}

/// Fail if the receiver sent anything before the next frame was written.
///
/// The only byte a receiver sends is the acknowledgement of the frame just
/// written, so data already waiting here is a surplus acknowledgement that
/// would otherwise be mistaken for the next frame's.
fn check_no_pending_data(stream: &TcpStream) -> std::result::Result<(), Failure> {
    stream
        .set_nonblocking(true)
        .map_err(|e| Failure::Fatal(Error::io("Failed to configure connection.", e)))?;
    let mut byte = [0u8; 1];
    let peeked = stream.peek(&mut byte);
    stream
        .set_nonblocking(false)
        .map_err(|e| Failure::Fatal(Error::io("Failed to configure connection.", e)))?;

    match peeked {
        Ok(0) => Err(Failure::Retry(Error::connection_msg(
            "Connection closed by the receiver.",
        ))),
        Ok(_) => Err(Failure::Fatal(Error::protocol(
            "Surplus acknowledgement data received before sending the next frame.",
            Some("no pending data".to_string()),
            Some(format!("{:#04x}", byte[0])),
        ))),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) if is_disconnect(&e) => Err(Failure::Retry(Error::io(
            "Connection lost before writing message frame.",
            e,
        ))),
        Err(e) => Err(Failure::Fatal(Error::io(
            "Failed to check connection for pending data.",
            e,
        ))),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

impl RemoteSender for TcpRemoteSender {
    fn connect(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state == State::Connected {
            return Err(Error::invalid_operation("Connect has already been called."));
        }

        self.stream = Some(self.connect_with_retry()?);
        self.state = State::Connected;
        tracing::info!(addr = %self.addr, "🔌 TcpRemoteSender connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state == State::Connected {
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            self.state = State::Disconnected;
            tracing::info!(addr = %self.addr, "TcpRemoteSender disconnected");
        }
        Ok(())
    }

    fn send(&mut self, message: &str) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state != State::Connected {
            return Err(Error::invalid_operation(
                "Connect must be called before sending messages.",
            ));
        }

        let sequence_number = self.next_sequence_number;
        // Wraparound reuses numbers; the receiver only compares against the last one.
        self.next_sequence_number = sequence_number.wrapping_add(1);
        let frame = frame::encode(sequence_number, message);

        self.metric_logger.begin(IntervalMetric::MessageSendTime);
        match self.send_frame(sequence_number, &frame) {
            Ok(()) => {
                self.metric_logger.end(IntervalMetric::MessageSendTime);
                self.metric_logger.increment(CountMetric::MessageSent);
                tracing::debug!(addr = %self.addr, sequence_number, bytes = frame.len(), "Message sent");
                Ok(())
            }
            Err(e) => {
                self.metric_logger.cancel_begin(IntervalMetric::MessageSendTime);
                tracing::error!(addr = %self.addr, sequence_number, error = %e, "❌ Failed to send message");
                Err(e)
            }
        }
    }

    fn dispose(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = State::Disposed;
    }
}

impl std::fmt::Debug for TcpRemoteSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRemoteSender")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("next_sequence_number", &self.next_sequence_number)
            .finish()
    }
}
