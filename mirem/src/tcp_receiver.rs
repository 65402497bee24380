//! Framed, acknowledged TCP receiver

use crate::config::TcpReceiverConfig;
use crate::frame::{self, ACK, ETX, HEADER_LEN, STX};
use crate::metrics::{null_metric_logger, CountMetric, IntervalMetric, MetricLogger};
use crate::transport::{CancelHandle, RemoteReceiver};
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;

const BODY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected,
    Disposed,
}

/// Why a frame read stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// The connection was replaced; read the frame again from the start
    Restart,
    Cancelled,
}

/// TCP listener side of a framed message channel.
///
/// Reads one frame per [`receive`](RemoteReceiver::receive), validates its
/// delimiters and answers with an acknowledgement byte. A frame repeating
/// the sequence number of the previously delivered one is acknowledged but
/// not delivered again.
///
/// Whenever a new connection is pending on the listener the current
/// connection is abandoned, together with any partially read frame, and
/// reading restarts on the new one. The sender only reconnects after it has
/// given up on the old connection.
pub struct TcpRemoteReceiver {
    addr: SocketAddr,
    config: TcpReceiverConfig,
    metric_logger: Arc<dyn MetricLogger>,
    state: State,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    last_sequence_number: Option<u32>,
    cancel: CancelHandle,
}

impl TcpRemoteReceiver {
    pub fn new(addr: SocketAddr, config: TcpReceiverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            addr,
            config,
            metric_logger: null_metric_logger(),
            state: State::Disconnected,
            listener: None,
            stream: None,
            last_sequence_number: None,
            cancel: CancelHandle::new(),
        })
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Address the listener is bound to, while connected
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn port(&self) -> u16 {
        self.local_addr().map_or(self.addr.port(), |a| a.port())
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.state == State::Disposed {
            return Err(Error::disposed("TcpRemoteReceiver"));
        }
        Ok(())
    }

    fn configure(&self, stream: TcpStream) -> Result<TcpStream> {
        stream
            .set_nonblocking(true)
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|e| Error::io("Failed to configure accepted connection.", e))?;
        Ok(stream)
    }

    /// Accept with up to `connect_retry_count` retries.
    ///
    /// Returns `None` if `cancellable` and a cancellation arrives first.
    fn accept_with_retry(&self, cancellable: bool) -> Result<Option<TcpStream>> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(Error::invalid_operation("The receiver is not listening."));
        };
        let attempts = self.config.connect_retry_count.saturating_add(1);

        for attempt in 1..=attempts {
            if cancellable && self.cancel.take() {
                return Ok(None);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(port = self.port(), %peer, attempt, "Accepted connection");
                    return self.configure(stream).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::debug!(port = self.port(), attempt, error = %e, "Accept attempt failed");
                }
            }
            if attempt < attempts {
                thread::sleep(self.config.connect_retry_interval);
            }
        }

        Err(Error::connection_msg(format!(
            "Failed to receive connection on port {} after {} attempts.",
            self.port(),
            attempts
        )))
    }

    /// Drop the current connection and wait for the sender to come back
    fn reconnect(&mut self) -> Result<Interrupt> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        tracing::info!(port = self.port(), "🔄 Waiting for the sender to reconnect");

        match self.accept_with_retry(true)? {
            Some(stream) => {
                self.stream = Some(stream);
                self.metric_logger
                    .increment(CountMetric::TcpRemoteReceiverReconnected);
                Ok(Interrupt::Restart)
            }
            None => Ok(Interrupt::Cancelled),
        }
    }

    /// Switch to a pending connection if there is one
    fn switch_to_pending(&mut self) -> Result<bool> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(false);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                let stream = self.configure(stream)?;
                if let Some(old) = self.stream.replace(stream) {
                    let _ = old.shutdown(Shutdown::Both);
                }
                self.metric_logger
                    .increment(CountMetric::TcpRemoteReceiverReconnected);
                tracing::info!(port = self.port(), %peer, "🔄 Switched to newly pending connection");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                tracing::warn!(port = self.port(), error = %e, "Checking for pending connections failed");
                Ok(false)
            }
        }
    }

    /// Fill `buf` from the current connection, polling while no data is available
    fn fill(&mut self, buf: &mut [u8]) -> Result<ControlFlow<Interrupt>> {
        if self.switch_to_pending()? {
            return Ok(ControlFlow::Break(Interrupt::Restart));
        }

        let poll = self.config.receive_retry_interval;
        let mut filled = 0;
        while filled < buf.len() {
            if self.cancel.take() {
                return Ok(ControlFlow::Break(Interrupt::Cancelled));
            }
            let Some(stream) = self.stream.as_mut() else {
                return self.reconnect().map(ControlFlow::Break);
            };
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    tracing::debug!(port = self.port(), "Connection closed by the sender");
                    return self.reconnect().map(ControlFlow::Break);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.switch_to_pending()? {
                        return Ok(ControlFlow::Break(Interrupt::Restart));
                    }
                    thread::sleep(poll);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(port = self.port(), error = %e, "Reading from connection failed");
                    return self.reconnect().map(ControlFlow::Break);
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn read_frame(&mut self) -> Result<ControlFlow<Interrupt, (u32, Vec<u8>)>> {
        let mut delimiter = [0u8; 1];
        if let ControlFlow::Break(i) = self.fill(&mut delimiter)? {
            return Ok(ControlFlow::Break(i));
        }
        if delimiter[0] != STX {
            return Err(Error::protocol(
                "First byte of frame is not the start delimiter.",
                Some(format!("{STX:#04x}")),
                Some(format!("{:#04x}", delimiter[0])),
            ));
        }

        let mut header = [0u8; HEADER_LEN];
        if let ControlFlow::Break(i) = self.fill(&mut header[..4])? {
            return Ok(ControlFlow::Break(i));
        }
        if let ControlFlow::Break(i) = self.fill(&mut header[4..])? {
            return Ok(ControlFlow::Break(i));
        }
        let (sequence_number, length) = frame::decode_header(&header);
        let length = usize::try_from(length).map_err(|_| {
            Error::protocol(
                "Frame body length exceeds addressable memory.",
                None,
                Some(length.to_string()),
            )
        })?;

        let mut body = Vec::with_capacity(length.min(BODY_CHUNK));
        while body.len() < length {
            let start = body.len();
            let end = length.min(start + BODY_CHUNK);
            body.resize(end, 0);
            if let ControlFlow::Break(i) = self.fill(&mut body[start..end])? {
                return Ok(ControlFlow::Break(i));
            }
        }

        if let ControlFlow::Break(i) = self.fill(&mut delimiter)? {
            return Ok(ControlFlow::Break(i));
        }
        if delimiter[0] != ETX {
            return Err(Error::protocol(
                "Last byte of frame is not the end delimiter.",
                Some(format!("{ETX:#04x}")),
                Some(format!("{:#04x}", delimiter[0])),
            ));
        }

        // The sender waits for the acknowledgement, so nothing may follow yet.
        if let Some(stream) = self.stream.as_ref() {
            let mut probe = [0u8; 1];
            if let Ok(n) = stream.peek(&mut probe) {
                if n > 0 {
                    return Err(Error::protocol(
                        "Surplus bytes follow the end delimiter.",
                        Some("no data".to_string()),
                        Some(format!("{:#04x}", probe[0])),
                    ));
                }
            }
        }

        Ok(ControlFlow::Continue((sequence_number, body)))
    }

    fn write_acknowledgement(&mut self) -> io::Result<()> {
        let poll = self.config.receive_retry_interval;
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        loop {
            match stream.write(&[ACK]) {
                Ok(1) => return Ok(()),
                Ok(_) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Read frames until one is deliverable; `None` when cancelled
    fn receive_message(&mut self) -> Result<Option<String>> {
        loop {
            let (sequence_number, body) = match self.read_frame()? {
                ControlFlow::Continue(frame) => frame,
                ControlFlow::Break(Interrupt::Restart) => continue,
                ControlFlow::Break(Interrupt::Cancelled) => return Ok(None),
            };
            let message = String::from_utf8(body).map_err(|e| {
                Error::protocol(
                    "Frame body is not valid UTF-8.",
                    Some("UTF-8 text".to_string()),
                    Some(e.to_string()),
                )
            })?;

            if let Err(e) = self.write_acknowledgement() {
                tracing::warn!(
                    port = self.port(),
                    sequence_number,
                    error = %e,
                    "Failed to acknowledge frame, waiting for resend"
                );
                if self.reconnect()? == Interrupt::Cancelled {
                    return Ok(None);
                }
                continue;
            }

            if self.last_sequence_number == Some(sequence_number) {
                self.metric_logger
                    .increment(CountMetric::TcpRemoteReceiverDuplicateSequenceNumber);
                tracing::debug!(port = self.port(), sequence_number, "Discarding duplicate frame");
                continue;
            }
            self.last_sequence_number = Some(sequence_number);

            tracing::debug!(port = self.port(), sequence_number, bytes = message.len(), "Message received");
            return Ok(Some(message));
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.listener = None;
        self.last_sequence_number = None;
    }
}

impl RemoteReceiver for TcpRemoteReceiver {
    fn connect(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state == State::Connected {
            return Err(Error::invalid_operation("Connect has already been called."));
        }

        let listener = TcpListener::bind(self.addr)
            .map_err(|e| Error::io(format!("Failed to listen on {}.", self.addr), e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::io("Failed to configure listener.", e))?;
        self.listener = Some(listener);

        match self.accept_with_retry(false) {
            Ok(stream) => {
                self.stream = stream;
                self.state = State::Connected;
                tracing::info!(port = self.port(), "🔌 TcpRemoteReceiver connected");
                Ok(())
            }
            Err(e) => {
                self.listener = None;
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.state == State::Connected {
            self.close();
            self.state = State::Disconnected;
            tracing::info!(addr = %self.addr, "TcpRemoteReceiver disconnected");
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<String> {
        self.ensure_not_disposed()?;
        if self.state != State::Connected {
            return Err(Error::invalid_operation(
                "Connect must be called before receiving messages.",
            ));
        }
        // Only a cancellation raised during this call interrupts it.
        self.cancel.take();

        self.metric_logger.begin(IntervalMetric::MessageReceiveTime);
        match self.receive_message() {
            Ok(Some(message)) => {
                self.metric_logger.end(IntervalMetric::MessageReceiveTime);
                self.metric_logger.increment(CountMetric::MessageReceived);
                Ok(message)
            }
            Ok(None) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MessageReceiveTime);
                tracing::debug!(port = self.port(), "Receive cancelled");
                Ok(String::new())
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::MessageReceiveTime);
                tracing::error!(port = self.port(), error = %e, "❌ Failed to receive message");
                Err(e)
            }
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn dispose(&mut self) {
        self.close();
        self.state = State::Disposed;
    }
}

impl std::fmt::Debug for TcpRemoteReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRemoteReceiver")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("last_sequence_number", &self.last_sequence_number)
            .finish()
    }
}
