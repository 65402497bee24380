//! Transport layer - string message senders and receivers

use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sends string messages to a remote receiver
pub trait RemoteSender: Send {
    /// Establish the connection; calling it twice is an error
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// Deliver one message, blocking until the peer has acknowledged it
    fn send(&mut self, message: &str) -> Result<()>;

    /// Release resources; every later call fails with a disposed error
    fn dispose(&mut self);
}

/// Receives string messages from a remote sender
pub trait RemoteReceiver: Send {
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// Block until a message arrives.
    ///
    /// Returns an empty string when the wait was cancelled through
    /// [`cancel_handle`](Self::cancel_handle). A sender may also deliver a
    /// genuinely empty message, and the two cannot be told apart from the
    /// return value; callers that need to distinguish them must keep their
    /// own stop flag, as the invocation receive loop does.
    ///
    /// A cancellation raised while no `receive` is running is discarded
    /// when the next call starts.
    fn receive(&mut self) -> Result<String>;

    /// Handle that interrupts a blocked `receive` from any thread
    fn cancel_handle(&self) -> CancelHandle;

    fn cancel_receive(&self) {
        self.cancel_handle().cancel();
    }

    fn dispose(&mut self);
}

/// Shared flag used to interrupt a blocking receive
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Observe and clear a pending cancellation
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// In-memory sender/receiver pair for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::Error;
    use std::sync::mpsc;
    use std::time::Duration;

    pub struct MockSender {
        tx: mpsc::Sender<String>,
        connected: bool,
    }

    pub struct MockReceiver {
        rx: mpsc::Receiver<String>,
        cancel: CancelHandle,
        connected: bool,
    }

    /// A connected one-way channel
    pub fn channel() -> (MockSender, MockReceiver) {
        let (tx, rx) = mpsc::channel();
        (
            MockSender {
                tx,
                connected: false,
            },
            MockReceiver {
                rx,
                cancel: CancelHandle::new(),
                connected: false,
            },
        )
    }

    impl RemoteSender for MockSender {
        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }

        fn send(&mut self, message: &str) -> Result<()> {
            if !self.connected {
                return Err(Error::invalid_operation("mock sender is not connected"));
            }
            self.tx
                .send(message.to_string())
                .map_err(|_| Error::connection_msg("mock transport send failed"))
        }

        fn dispose(&mut self) {
            self.connected = false;
        }
    }

    impl RemoteReceiver for MockReceiver {
        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }

        fn receive(&mut self) -> Result<String> {
            if !self.connected {
                return Err(Error::invalid_operation("mock receiver is not connected"));
            }
            self.cancel.take();
            loop {
                if self.cancel.take() {
                    return Ok(String::new());
                }
                match self.rx.recv_timeout(Duration::from_millis(5)) {
                    Ok(message) => return Ok(message),
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(Error::connection_msg("mock transport recv failed"))
                    }
                }
            }
        }

        fn cancel_handle(&self) -> CancelHandle {
            self.cancel.clone()
        }

        fn dispose(&mut self) {
            self.connected = false;
        }
    }
}
