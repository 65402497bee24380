//! Remote method invocation over a sender/receiver pair

use crate::invocation::MethodInvocation;
use crate::metrics::{null_metric_logger, CountMetric, IntervalMetric, MetricLogger};
use crate::serializer::InvocationSerializer;
use crate::transport::{CancelHandle, RemoteReceiver, RemoteSender};
use crate::value::Value;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

/// Caller side: sends invocations and waits for their return values.
///
/// The sender carries invocations to the remote side and the receiver
/// carries return values back; both must already be connected.
pub struct MethodInvocationRemoteSender {
    serializer: Arc<dyn InvocationSerializer>,
    sender: Box<dyn RemoteSender>,
    receiver: Box<dyn RemoteReceiver>,
    metric_logger: Arc<dyn MetricLogger>,
}

impl MethodInvocationRemoteSender {
    pub fn new(
        serializer: Arc<dyn InvocationSerializer>,
        sender: Box<dyn RemoteSender>,
        receiver: Box<dyn RemoteReceiver>,
    ) -> Self {
        Self {
            serializer,
            sender,
            receiver,
            metric_logger: null_metric_logger(),
        }
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    /// Invoke a method with a return type and return its (possibly null) result
    pub fn invoke_method(&mut self, invocation: &MethodInvocation) -> Result<Option<Value>> {
        if invocation.is_void() {
            return Err(Error::invalid_operation(format!(
                "Method '{}' has no return type; use invoke_void_method.",
                invocation.name()
            )));
        }

        self.metric_logger.begin(IntervalMetric::RemoteMethodSendTime);
        let result = match self.exchange(invocation) {
            Ok(response) => self
                .serializer
                .deserialize_return_value(&response)
                .map_err(|e| Error::invocation("Failed to deserialize return value.", e)),
            Err(e) => Err(e),
        };
        self.record(invocation, result)
    }

    /// Invoke a void method; succeeds only on the literal void return value
    pub fn invoke_void_method(&mut self, invocation: &MethodInvocation) -> Result<()> {
        if !invocation.is_void() {
            return Err(Error::invalid_operation(format!(
                "Method '{}' has a return type; use invoke_method.",
                invocation.name()
            )));
        }

        self.metric_logger.begin(IntervalMetric::RemoteMethodSendTime);
        let result = match self.exchange(invocation) {
            Ok(response) if response == self.serializer.void_return_value() => Ok(()),
            Ok(response) => Err(Error::invocation_msg(format!(
                "Received a non-void response to void method '{}': {response}",
                invocation.name()
            ))),
            Err(e) => Err(e),
        };
        self.record(invocation, result)
    }

    /// Serialize, send and wait for the raw response
    fn exchange(&mut self, invocation: &MethodInvocation) -> Result<String> {
        let serialized = self
            .serializer
            .serialize(invocation)
            .map_err(|e| Error::invocation("Failed to serialize method invocation.", e))?;
        self.sender
            .send(&serialized)
            .map_err(|e| Error::invocation("Failed to send method invocation.", e))?;
        self.receiver
            .receive()
            .map_err(|e| Error::invocation("Failed to receive return value.", e))
    }

    fn record<T>(&self, invocation: &MethodInvocation, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                self.metric_logger.end(IntervalMetric::RemoteMethodSendTime);
                self.metric_logger.increment(CountMetric::RemoteMethodSent);
                tracing::debug!(method = invocation.name(), "Remote method invoked");
            }
            Err(e) => {
                self.metric_logger
                    .cancel_begin(IntervalMetric::RemoteMethodSendTime);
                tracing::error!(method = invocation.name(), error = %e, "❌ Remote method invocation failed");
            }
        }
        result
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<MethodInvocation>>>>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Callee side: receives invocations on a background thread and sends
/// return values back.
///
/// Received invocations are delivered to every channel handed out by
/// [`subscribe`](Self::subscribe). A handler answers each one with
/// [`send_return_value`](Self::send_return_value) or
/// [`send_void_return`](Self::send_void_return).
pub struct MethodInvocationRemoteReceiver {
    serializer: Arc<dyn InvocationSerializer>,
    sender: Mutex<Box<dyn RemoteSender>>,
    receiver: Arc<Mutex<Box<dyn RemoteReceiver>>>,
    receiver_cancel: CancelHandle,
    subscribers: Subscribers,
    shutdown_signal: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
    metric_logger: Arc<dyn MetricLogger>,
}

impl MethodInvocationRemoteReceiver {
    pub fn new(
        serializer: Arc<dyn InvocationSerializer>,
        sender: Box<dyn RemoteSender>,
        receiver: Box<dyn RemoteReceiver>,
    ) -> Self {
        let receiver_cancel = receiver.cancel_handle();
        Self {
            serializer,
            sender: Mutex::new(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            receiver_cancel,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            metric_logger: null_metric_logger(),
        }
    }

    pub fn with_metric_logger(mut self, metric_logger: Arc<dyn MetricLogger>) -> Self {
        self.metric_logger = metric_logger;
        self
    }

    /// Channel of received invocations.
    ///
    /// Use `blocking_recv` from plain threads or `recv().await` inside an
    /// async runtime. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<MethodInvocation>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| Error::runtime_msg("Subscriber list lock poisoned."))?
            .push(tx);
        Ok(rx)
    }

    /// Start the background receive loop
    pub fn receive(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::runtime_msg("Worker lock poisoned."))?;
        if worker.is_some() {
            return Err(Error::invalid_operation(
                "Receive has already been called; call cancel_receive first.",
            ));
        }

        self.shutdown_signal.store(false, Ordering::SeqCst);
        let receive_loop = ReceiveLoop {
            serializer: self.serializer.clone(),
            receiver: self.receiver.clone(),
            subscribers: self.subscribers.clone(),
            shutdown_signal: self.shutdown_signal.clone(),
            metric_logger: self.metric_logger.clone(),
        };
        let handle = thread::Builder::new()
            .name("mirem-invocation-receiver".to_string())
            .spawn(move || receive_loop.run())
            .map_err(|e| Error::io("Failed to start the receive thread.", e))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the receive loop and wait for it to exit.
    ///
    /// Returns the error that stopped the loop early, if any.
    pub fn cancel_receive(&self) -> Result<()> {
        self.shutdown_signal.store(true, Ordering::SeqCst);
        self.receiver_cancel.cancel();

        let handle = self
            .worker
            .lock()
            .map_err(|_| Error::runtime_msg("Worker lock poisoned."))?
            .take();
        let result = match handle {
            Some(handle) => {
                // Each receive discards cancellations raised before it started.
                while !handle.is_finished() {
                    self.receiver_cancel.cancel();
                    thread::sleep(CANCEL_POLL_INTERVAL);
                }
                handle
                    .join()
                    .map_err(|_| Error::runtime_msg("The receive thread panicked."))?
            }
            None => Ok(()),
        };
        self.receiver_cancel.take();
        tracing::info!("🛑 Method invocation receive loop stopped");
        result
    }

    pub fn is_receiving(&self) -> bool {
        self.worker
            .lock()
            .map(|w| w.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Send the return value of the current invocation; `None` is a null value
    pub fn send_return_value(&self, value: Option<&Value>) -> Result<()> {
        let serialized = self
            .serializer
            .serialize_return_value(value)
            .map_err(|e| Error::invocation("Failed to send return value.", e))?;
        self.send(&serialized)
            .map_err(|e| Error::invocation("Failed to send return value.", e))
    }

    pub fn send_void_return(&self) -> Result<()> {
        let serialized = self.serializer.void_return_value().to_string();
        self.send(&serialized)
            .map_err(|e| Error::invocation("Failed to send void return value.", e))
    }

    fn send(&self, message: &str) -> Result<()> {
        self.sender
            .lock()
            .map_err(|_| Error::runtime_msg("Sender lock poisoned."))?
            .send(message)
    }
}

impl Drop for MethodInvocationRemoteReceiver {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::SeqCst);
        self.receiver_cancel.cancel();
    }
}

/// State moved onto the background thread
struct ReceiveLoop {
    serializer: Arc<dyn InvocationSerializer>,
    receiver: Arc<Mutex<Box<dyn RemoteReceiver>>>,
    subscribers: Subscribers,
    shutdown_signal: Arc<AtomicBool>,
    metric_logger: Arc<dyn MetricLogger>,
}

impl ReceiveLoop {
    fn run(self) -> Result<()> {
        tracing::debug!("🔄 Starting method invocation receive loop");
        while !self.shutdown_signal.load(Ordering::SeqCst) {
            let received = self
                .receiver
                .lock()
                .map_err(|_| Error::runtime_msg("Receiver lock poisoned."))?
                .receive();
            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "❌ Receive loop stopped by a receive failure");
                    return Err(Error::invocation("Failed to receive method invocation.", e));
                }
            };
            if message.is_empty() {
                // Cancelled; the loop condition decides whether to stop.
                continue;
            }

            let invocation = match self.serializer.deserialize(&message) {
                Ok(invocation) => invocation,
                Err(e) => {
                    tracing::error!(error = %e, "❌ Receive loop stopped by an undecodable invocation");
                    return Err(Error::invocation(
                        "Failed to deserialize method invocation.",
                        e,
                    ));
                }
            };
            self.metric_logger.increment(CountMetric::RemoteMethodReceived);
            tracing::debug!(method = invocation.name(), "📨 Received method invocation");
            self.dispatch(invocation)?;
        }
        tracing::debug!("🔚 Method invocation receive loop ended");
        Ok(())
    }

    fn dispatch(&self, invocation: MethodInvocation) -> Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| Error::runtime_msg("Subscriber list lock poisoned."))?;
        subscribers.retain(|tx| tx.send(invocation.clone()).is_ok());
        if subscribers.is_empty() {
            tracing::warn!(method = invocation.name(), "No subscriber for received invocation");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{MethodInvocationSerializer, VOID_RETURN_VALUE};
    use crate::transport::mock;
    use crate::value::NativeType;
    use std::error::Error as _;

    struct Pair {
        caller: MethodInvocationRemoteSender,
        callee: MethodInvocationRemoteReceiver,
    }

    fn connected_pair() -> Pair {
        let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());
        let (mut request_tx, mut request_rx) = mock::channel();
        let (mut response_tx, mut response_rx) = mock::channel();
        request_tx.connect().unwrap();
        request_rx.connect().unwrap();
        response_tx.connect().unwrap();
        response_rx.connect().unwrap();

        Pair {
            caller: MethodInvocationRemoteSender::new(
                serializer.clone(),
                Box::new(request_tx),
                Box::new(response_rx),
            ),
            callee: MethodInvocationRemoteReceiver::new(
                serializer,
                Box::new(response_tx),
                Box::new(request_rx),
            ),
        }
    }

    #[test]
    fn test_invoke_method_round_trip() {
        let Pair { mut caller, callee } = connected_pair();
        let mut invocations = callee.subscribe().unwrap();
        callee.receive().unwrap();

        let handler = thread::spawn(move || {
            let invocation = invocations.blocking_recv().unwrap();
            let sum: i32 = invocation
                .parameters()
                .unwrap()
                .iter()
                .map(|p| match p {
                    Some(Value::Integer(v)) => *v,
                    _ => 0,
                })
                .sum();
            callee.send_return_value(Some(&Value::Integer(sum))).unwrap();
            callee
        });

        let invocation =
            MethodInvocation::with_parameters("Add", [2i32, 40], Some(NativeType::Integer)).unwrap();
        assert_eq!(
            caller.invoke_method(&invocation).unwrap(),
            Some(Value::Integer(42))
        );

        let callee = handler.join().unwrap();
        callee.cancel_receive().unwrap();
        assert!(!callee.is_receiving());
    }

    #[test]
    fn test_invoke_void_method_round_trip() {
        let Pair { mut caller, callee } = connected_pair();
        let mut invocations = callee.subscribe().unwrap();
        callee.receive().unwrap();

        let handler = thread::spawn(move || {
            let invocation = invocations.blocking_recv().unwrap();
            assert_eq!(invocation.name(), "Reset");
            callee.send_void_return().unwrap();
            callee
        });

        caller
            .invoke_void_method(&MethodInvocation::void("Reset").unwrap())
            .unwrap();
        handler.join().unwrap().cancel_receive().unwrap();
    }

    #[test]
    fn test_return_type_mismatch_is_usage_error() {
        let Pair { mut caller, .. } = connected_pair();

        let void = MethodInvocation::void("Reset").unwrap();
        assert!(matches!(
            caller.invoke_method(&void),
            Err(Error::InvalidOperation { .. })
        ));

        let typed = MethodInvocation::new("Get", None, Some(NativeType::Bool)).unwrap();
        assert!(matches!(
            caller.invoke_void_method(&typed),
            Err(Error::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_void_call_rejects_non_void_response() {
        let Pair { mut caller, callee } = connected_pair();
        let mut invocations = callee.subscribe().unwrap();
        callee.receive().unwrap();

        let handler = thread::spawn(move || {
            invocations.blocking_recv().unwrap();
            callee.send_return_value(Some(&Value::Bool(true))).unwrap();
            callee
        });

        let err = caller
            .invoke_void_method(&MethodInvocation::void("Reset").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("non-void response"), "{err}");
        handler.join().unwrap().cancel_receive().unwrap();
    }

    #[test]
    fn test_null_return_value_is_void_document() {
        let Pair {
            caller: _caller,
            callee,
        } = connected_pair();
        let serializer = MethodInvocationSerializer::new();
        assert_eq!(
            serializer.serialize_return_value(None).unwrap(),
            VOID_RETURN_VALUE
        );
        callee.send_return_value(None).unwrap();
    }

    #[test]
    fn test_receive_twice_rejected_and_cancel_is_idempotent() {
        let Pair {
            caller: _caller,
            callee,
        } = connected_pair();
        callee.receive().unwrap();
        assert!(matches!(
            callee.receive(),
            Err(Error::InvalidOperation { .. })
        ));

        callee.cancel_receive().unwrap();
        callee.cancel_receive().unwrap();

        callee.receive().unwrap();
        assert!(callee.is_receiving());
        callee.cancel_receive().unwrap();
    }

    #[test]
    fn test_send_failure_wrapped_with_stage_message() {
        let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());
        let (request_tx, _request_rx) = mock::channel();
        let (_response_tx, response_rx) = mock::channel();
        let mut caller =
            MethodInvocationRemoteSender::new(serializer, Box::new(request_tx), Box::new(response_rx));

        let invocation =
            MethodInvocation::with_parameters("Add", [1i32], Some(NativeType::Integer)).unwrap();
        let err = caller.invoke_method(&invocation).unwrap_err();
        assert!(err.to_string().contains("Failed to send method invocation"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_empty_message_skipped_by_receive_loop() {
        let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());
        let (mut request_tx, mut request_rx) = mock::channel();
        let (response_tx, _response_rx) = mock::channel();
        request_tx.connect().unwrap();
        request_rx.connect().unwrap();
        let callee = MethodInvocationRemoteReceiver::new(
            serializer.clone(),
            Box::new(response_tx),
            Box::new(request_rx),
        );
        let mut invocations = callee.subscribe().unwrap();
        callee.receive().unwrap();

        request_tx.send("").unwrap();
        let reset = MethodInvocation::void("Reset").unwrap();
        request_tx.send(&serializer.serialize(&reset).unwrap()).unwrap();

        assert_eq!(invocations.blocking_recv().unwrap().name(), "Reset");
        assert!(callee.is_receiving());
        callee.cancel_receive().unwrap();
    }

    #[test]
    fn test_undecodable_invocation_stops_loop_with_error() {
        let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());
        let (mut request_tx, mut request_rx) = mock::channel();
        let (response_tx, _response_rx) = mock::channel();
        request_tx.connect().unwrap();
        request_rx.connect().unwrap();
        let callee = MethodInvocationRemoteReceiver::new(
            serializer,
            Box::new(response_tx),
            Box::new(request_rx),
        );

        callee.receive().unwrap();
        request_tx.send("<NotAnInvocation/>").unwrap();
        while callee.is_receiving() {
            thread::sleep(std::time::Duration::from_millis(5));
        }

        let err = callee.cancel_receive().unwrap_err();
        assert!(err.to_string().contains("Failed to deserialize method invocation"));
    }
}
