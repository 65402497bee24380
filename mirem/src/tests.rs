//! Integration tests for mirem core functionality
//! Runs method invocations end to end over loopback TCP channels

use crate::*;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn sender_config() -> TcpSenderConfig {
    TcpSenderConfig::default()
        .with_connect_retry(100, Duration::from_millis(20))
        .with_acknowledgement_timeout(Duration::from_secs(2), Duration::from_millis(5))
}

fn receiver_config() -> TcpReceiverConfig {
    TcpReceiverConfig::default()
        .with_connect_retry(100, Duration::from_millis(20))
        .with_receive_retry_interval(Duration::from_millis(2))
}

/// A connected one-way TCP channel
fn tcp_channel(metrics: Arc<InMemoryMetricLogger>) -> (TcpRemoteSender, TcpRemoteReceiver) {
    let addr = free_addr();
    let receiver_metrics = metrics.clone();
    let accepting = thread::spawn(move || {
        let mut receiver = TcpRemoteReceiver::new(addr, receiver_config())
            .unwrap()
            .with_metric_logger(receiver_metrics);
        receiver.connect().unwrap();
        receiver
    });

    let mut sender = TcpRemoteSender::new(addr, sender_config())
        .unwrap()
        .with_metric_logger(metrics);
    sender.connect().unwrap();
    (sender, accepting.join().unwrap())
}

fn sum_handler(
    callee: MethodInvocationRemoteReceiver,
    mut invocations: tokio::sync::mpsc::UnboundedReceiver<MethodInvocation>,
    calls: usize,
) -> thread::JoinHandle<MethodInvocationRemoteReceiver> {
    thread::spawn(move || {
        for _ in 0..calls {
            let invocation = invocations.blocking_recv().unwrap();
            match invocation.name() {
                "Add" => {
                    let sum: i64 = invocation
                        .parameters()
                        .unwrap_or_default()
                        .iter()
                        .map(|p| match p {
                            Some(Value::LongInteger(v)) => *v,
                            _ => 0,
                        })
                        .sum();
                    callee
                        .send_return_value(Some(&Value::LongInteger(sum)))
                        .unwrap();
                }
                "Echo" => {
                    let first = invocation.parameters().unwrap()[0].clone();
                    callee.send_return_value(first.as_ref()).unwrap();
                }
                _ => callee.send_void_return().unwrap(),
            }
        }
        callee
    })
}

#[test]
fn test_tcp_method_invocation_round_trip() {
    init_tracing();
    let metrics = Arc::new(InMemoryMetricLogger::new());
    let serializer: Arc<dyn InvocationSerializer> = Arc::new(
        MethodInvocationSerializer::new().with_metric_logger(metrics.clone()),
    );

    let (request_tx, request_rx) = tcp_channel(metrics.clone());
    let (response_tx, response_rx) = tcp_channel(metrics.clone());

    let mut caller = MethodInvocationRemoteSender::new(
        serializer.clone(),
        Box::new(request_tx),
        Box::new(response_rx),
    )
    .with_metric_logger(metrics.clone());
    let callee = MethodInvocationRemoteReceiver::new(
        serializer,
        Box::new(response_tx),
        Box::new(request_rx),
    )
    .with_metric_logger(metrics.clone());
    let invocations = callee.subscribe().unwrap();
    callee.receive().unwrap();
    let handler = sum_handler(callee, invocations, 4);

    let add = MethodInvocation::with_parameters(
        "Add",
        [i64::MAX - 10, 7, 3],
        Some(NativeType::LongInteger),
    )
    .unwrap();
    assert_eq!(
        caller.invoke_method(&add).unwrap(),
        Some(Value::LongInteger(i64::MAX))
    );

    let text = "Tab\tand <markup> & \"quotes\"\r\n".to_string();
    let echo = MethodInvocation::with_parameters("Echo", [text.clone()], Some(NativeType::String))
        .unwrap();
    assert_eq!(caller.invoke_method(&echo).unwrap(), Some(Value::String(text)));

    let echo_null =
        MethodInvocation::new("Echo", Some(vec![None]), Some(NativeType::String)).unwrap();
    assert_eq!(caller.invoke_method(&echo_null).unwrap(), None);

    caller
        .invoke_void_method(&MethodInvocation::void("Reset").unwrap())
        .unwrap();

    let callee = handler.join().unwrap();
    callee.cancel_receive().unwrap();

    assert_eq!(metrics.count(CountMetric::RemoteMethodSent), 4);
    assert_eq!(metrics.count(CountMetric::RemoteMethodReceived), 4);
    assert_eq!(metrics.count(CountMetric::MessageSent), 8);
    assert_eq!(metrics.count(CountMetric::MessageReceived), 8);
    assert_eq!(
        metrics.count(CountMetric::TcpRemoteReceiverDuplicateSequenceNumber),
        0
    );
}

#[test]
fn test_compressed_tcp_round_trip() {
    init_tracing();
    let metrics = Arc::new(InMemoryMetricLogger::new());
    let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());
    let compression = CompressionConfig::default().with_decompression_buffer_size(16);

    let (request_tx, request_rx) = tcp_channel(metrics.clone());
    let (response_tx, response_rx) = tcp_channel(metrics.clone());

    let mut caller = MethodInvocationRemoteSender::new(
        serializer.clone(),
        Box::new(RemoteSenderCompressor::new(request_tx)),
        Box::new(RemoteReceiverDecompressor::new(response_rx, compression.clone()).unwrap()),
    );
    let callee = MethodInvocationRemoteReceiver::new(
        serializer,
        Box::new(RemoteSenderCompressor::new(response_tx)),
        Box::new(RemoteReceiverDecompressor::new(request_rx, compression).unwrap()),
    );
    let invocations = callee.subscribe().unwrap();
    callee.receive().unwrap();
    let handler = sum_handler(callee, invocations, 1);

    let values: Vec<Option<Value>> = (0..50).map(|i| Some(Value::Double(f64::from(i) / 8.0))).collect();
    let echo = MethodInvocation::new(
        "Echo",
        Some(vec![Some(Value::array(NativeType::Double, values.clone()))]),
        Some(NativeType::array_of(NativeType::Double)),
    )
    .unwrap();
    assert_eq!(
        caller.invoke_method(&echo).unwrap(),
        Some(Value::array(NativeType::Double, values))
    );

    handler.join().unwrap().cancel_receive().unwrap();
}

#[tokio::test]
async fn test_async_subscription() {
    init_tracing();
    let metrics = Arc::new(InMemoryMetricLogger::new());
    let serializer: Arc<dyn InvocationSerializer> = Arc::new(MethodInvocationSerializer::new());

    let (request_tx, request_rx) = tcp_channel(metrics.clone());
    let (response_tx, response_rx) = tcp_channel(metrics);

    let callee = MethodInvocationRemoteReceiver::new(
        serializer.clone(),
        Box::new(response_tx),
        Box::new(request_rx),
    );
    let mut invocations = callee.subscribe().unwrap();
    callee.receive().unwrap();

    let caller = thread::spawn(move || {
        let mut caller =
            MethodInvocationRemoteSender::new(serializer, Box::new(request_tx), Box::new(response_rx));
        caller.invoke_method(
            &MethodInvocation::with_parameters("Negate", [true], Some(NativeType::Bool)).unwrap(),
        )
    });

    let invocation = tokio::time::timeout(Duration::from_secs(5), invocations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invocation.name(), "Negate");
    callee.send_return_value(Some(&Value::Bool(false))).unwrap();

    assert_eq!(caller.join().unwrap().unwrap(), Some(Value::Bool(false)));
    callee.cancel_receive().unwrap();
}

#[test]
fn test_cancel_unblocks_idle_receive_loop() {
    init_tracing();
    let metrics = Arc::new(InMemoryMetricLogger::new());
    let (_request_tx, request_rx) = tcp_channel(metrics.clone());
    let (response_tx, _response_rx) = tcp_channel(metrics);

    let callee = MethodInvocationRemoteReceiver::new(
        Arc::new(MethodInvocationSerializer::new()),
        Box::new(response_tx),
        Box::new(request_rx),
    );
    callee.receive().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(callee.is_receiving());

    callee.cancel_receive().unwrap();
    assert!(!callee.is_receiving());
}
