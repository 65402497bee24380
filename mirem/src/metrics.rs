//! Metric events emitted by the remoting components
//!
//! Metric logging is fire-and-forget: implementations must not fail and
//! never influence control flow.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events that are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountMetric {
    MessageSent,
    MessageReceived,
    TcpRemoteSenderReconnected,
    TcpRemoteReceiverReconnected,
    TcpRemoteReceiverDuplicateSequenceNumber,
    MessageCompressed,
    MessageDecompressed,
    MethodInvocationSerialized,
    MethodInvocationDeserialized,
    ReturnValueSerialized,
    ReturnValueDeserialized,
    RemoteMethodSent,
    RemoteMethodReceived,
}

/// Quantities that are summed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmountMetric {
    SerializedMethodInvocationSize,
    SerializedReturnValueSize,
    CompressedBytesSent,
    CompressedBytesReceived,
}

/// Timed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalMetric {
    MessageSendTime,
    MessageReceiveTime,
    RemoteMethodSendTime,
    MethodInvocationSerializeTime,
    MethodInvocationDeserializeTime,
    ReturnValueSerializeTime,
    ReturnValueDeserializeTime,
    MessageCompressTime,
    MessageDecompressTime,
}

/// Sink for metric events
pub trait MetricLogger: Send + Sync + 'static {
    fn increment(&self, metric: CountMetric);

    fn add(&self, metric: AmountMetric, amount: u64);

    fn begin(&self, metric: IntervalMetric);

    fn end(&self, metric: IntervalMetric);

    /// Discard a started interval without recording it
    fn cancel_begin(&self, metric: IntervalMetric);
}

/// Metric logger that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricLogger;

impl MetricLogger for NullMetricLogger {
    fn increment(&self, _metric: CountMetric) {}

    fn add(&self, _metric: AmountMetric, _amount: u64) {}

    fn begin(&self, _metric: IntervalMetric) {}

    fn end(&self, _metric: IntervalMetric) {}

    fn cancel_begin(&self, _metric: IntervalMetric) {}
}

/// Shared handle to the default (null) metric logger
pub fn null_metric_logger() -> Arc<dyn MetricLogger> {
    Arc::new(NullMetricLogger)
}

/// Metric logger aggregating totals in memory
///
/// Intervals are keyed by metric only, so overlapping intervals of the same
/// metric are not supported; a second `begin` restarts the clock.
#[derive(Debug, Default)]
pub struct InMemoryMetricLogger {
    counts: DashMap<CountMetric, u64>,
    amounts: DashMap<AmountMetric, u64>,
    started: DashMap<IntervalMetric, Instant>,
    intervals: DashMap<IntervalMetric, (u64, Duration)>,
}

impl InMemoryMetricLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, metric: CountMetric) -> u64 {
        self.counts.get(&metric).map(|v| *v).unwrap_or(0)
    }

    pub fn amount(&self, metric: AmountMetric) -> u64 {
        self.amounts.get(&metric).map(|v| *v).unwrap_or(0)
    }

    /// Number of completed intervals and their accumulated duration
    pub fn interval(&self, metric: IntervalMetric) -> (u64, Duration) {
        self.intervals
            .get(&metric)
            .map(|v| *v)
            .unwrap_or((0, Duration::ZERO))
    }
}

impl MetricLogger for InMemoryMetricLogger {
    fn increment(&self, metric: CountMetric) {
        *self.counts.entry(metric).or_insert(0) += 1;
    }

    fn add(&self, metric: AmountMetric, amount: u64) {
        *self.amounts.entry(metric).or_insert(0) += amount;
    }

    fn begin(&self, metric: IntervalMetric) {
        self.started.insert(metric, Instant::now());
    }

    fn end(&self, metric: IntervalMetric) {
        if let Some((_, start)) = self.started.remove(&metric) {
            let mut total = self.intervals.entry(metric).or_insert((0, Duration::ZERO));
            total.0 += 1;
            total.1 += start.elapsed();
        } else {
            tracing::warn!(?metric, "Interval metric ended without a matching begin");
        }
    }

    fn cancel_begin(&self, metric: IntervalMetric) {
        self.started.remove(&metric);
    }
}
