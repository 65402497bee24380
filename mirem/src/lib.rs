//! # mirem - Method invocation remoting
//!
//! Invoke named methods with typed parameters on a remote process over a
//! reliable, framed TCP channel.
//!
//! The crate has two layers:
//!
//! - **Transport**: [`TcpRemoteSender`] / [`TcpRemoteReceiver`] carry string
//!   messages as acknowledged, sequence-numbered frames, reconnecting and
//!   resending when a connection drops. [`RemoteSenderCompressor`] and
//!   [`RemoteReceiverDecompressor`] wrap any sender or receiver with gzip.
//! - **Invocation**: [`MethodInvocationSerializer`] turns a
//!   [`MethodInvocation`] and its return value into a self-describing XML
//!   document; [`MethodInvocationRemoteSender`] and
//!   [`MethodInvocationRemoteReceiver`] run calls over a sender/receiver pair.
//!
//! ## Quick Start
//!
//! ### Caller
//!
//! ```rust,no_run
//! use mirem::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let mut requests = TcpRemoteSender::new("127.0.0.1:55000".parse().unwrap(), TcpSenderConfig::default())?;
//!     let mut responses = TcpRemoteReceiver::new("127.0.0.1:55001".parse().unwrap(), TcpReceiverConfig::default())?;
//!     requests.connect()?;
//!     responses.connect()?;
//!
//!     let serializer = Arc::new(MethodInvocationSerializer::new());
//!     let mut caller = MethodInvocationRemoteSender::new(serializer, Box::new(requests), Box::new(responses));
//!
//!     let invocation = MethodInvocation::with_parameters("Add", [10i32, 5], Some(NativeType::Integer))?;
//!     assert_eq!(caller.invoke_method(&invocation)?, Some(Value::Integer(15)));
//!     Ok(())
//! }
//! ```
//!
//! ### Callee
//!
//! ```rust,no_run
//! use mirem::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let mut requests = TcpRemoteReceiver::new("127.0.0.1:55000".parse().unwrap(), TcpReceiverConfig::default())?;
//!     let mut responses = TcpRemoteSender::new("127.0.0.1:55001".parse().unwrap(), TcpSenderConfig::default())?;
//!     requests.connect()?;
//!     responses.connect()?;
//!
//!     let serializer = Arc::new(MethodInvocationSerializer::new());
//!     let callee = MethodInvocationRemoteReceiver::new(serializer, Box::new(responses), Box::new(requests));
//!     let mut invocations = callee.subscribe()?;
//!     callee.receive()?;
//!
//!     while let Some(invocation) = invocations.blocking_recv() {
//!         let sum = invocation
//!             .parameters()
//!             .unwrap_or_default()
//!             .iter()
//!             .map(|p| match p {
//!                 Some(Value::Integer(v)) => *v,
//!                 _ => 0,
//!             })
//!             .sum::<i32>();
//!         callee.send_return_value(Some(&Value::Integer(sum)))?;
//!     }
//!     callee.cancel_receive()
//! }
//! ```
//!
//! Each direction of a call pair uses its own TCP connection, so the two
//! sides connect in opposite roles.

pub mod builtin;
pub mod compression;
pub mod config;
pub mod error;
pub mod frame;
pub mod invocation;
pub mod metrics;
pub mod operation_map;
pub mod rpc;
pub mod serializer;
pub mod tcp_receiver;
pub mod tcp_sender;
pub mod transport;
pub mod value;
pub mod xml;

#[cfg(test)]
mod tests;


// Re-exports
pub use compression::{RemoteReceiverDecompressor, RemoteSenderCompressor};
pub use config::{CompressionConfig, TcpReceiverConfig, TcpSenderConfig};
pub use error::{Error, Result};
pub use invocation::MethodInvocation;
pub use metrics::{
    AmountMetric, CountMetric, InMemoryMetricLogger, IntervalMetric, MetricLogger,
    NullMetricLogger,
};
pub use operation_map::SerializerOperationMap;
pub use rpc::{MethodInvocationRemoteReceiver, MethodInvocationRemoteSender};
pub use serializer::{InvocationSerializer, MethodInvocationSerializer, VOID_RETURN_VALUE};
pub use tcp_receiver::TcpRemoteReceiver;
pub use tcp_sender::TcpRemoteSender;
pub use transport::{CancelHandle, RemoteReceiver, RemoteSender};
pub use value::{ArrayValue, CustomValue, NativeType, Value, XmlSerializable};
pub use xml::XmlWriter;

// Re-export the parser used by XmlSerializable implementations
pub use roxmltree;
