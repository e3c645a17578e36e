use rand::Rng;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::frame::BrokerError;

/// Errors surfaced by the connection and its workers.
#[derive(Error, Debug)]
pub enum StompError {
    /// I/O failure at the byte-stream layer, including write deadline expiry
    /// (`io::ErrorKind::TimedOut`).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// No bytes arrived within twice the negotiated inbound heart-beat
    /// interval.
    #[error("no heartbeat received within {0:?}")]
    HeartbeatTimeout(Duration),
    /// The decoder rejected the bytes on the wire.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The broker sent an ERROR frame. Terminal: brokers close the connection
    /// after an ERROR and the session is not retried.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    /// A MESSAGE arrived for a subscription id that is not in the registry.
    #[error("message received for unknown subscription {0:?}")]
    UnknownSubscription(String),
    /// A subscription sink did not drain within the grace interval.
    #[error("subscription {0:?} did not drain its messages in time")]
    SlowConsumer(String),
    /// Operation attempted on a closed connection.
    #[error("connection closed")]
    Closed,
}

impl StompError {
    /// Whether the session manager may re-establish the link after this
    /// error. Only link-level failures qualify; protocol violations and
    /// broker rejections are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StompError::Transport(_) | StompError::HeartbeatTimeout(_)
        )
    }

    /// Classify an `io::Error` coming up through the framed transport:
    /// `InvalidData` is how the codec reports protocol violations, anything
    /// else is a transport failure.
    pub(crate) fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            StompError::MalformedFrame(err.to_string())
        } else {
            StompError::Transport(err)
        }
    }
}

/// Decides whether (and when) to retry after a link failure.
///
/// Called with the attempt number (starting at 1), the previously slept
/// backoff, and the error that broke the link. Returns whether to retry and
/// the duration to sleep before the attempt.
pub type RetryPolicy = Box<dyn Fn(u32, Duration, &StompError) -> (bool, Duration) + Send + Sync>;

/// Base slot for [`exponential_backoff`], 100 ms.
pub const BACKOFF_SLOT: Duration = Duration::from_millis(100);

/// The default retry policy: exponential random backoff.
///
/// Attempt `n` (clamped to 10) sleeps a uniform random number of slots in
/// `[1, 2^n - 1]`, multiplicatively decreasing the reconnect rate until the
/// link recovers or the caller gives up by other means. Never refuses.
pub fn exponential_backoff(attempt: u32, _last: Duration, _err: &StompError) -> (bool, Duration) {
    let k = attempt.clamp(1, 10);
    let slots = rand::rng().random_range(1..(1u64 << k));
    (true, BACKOFF_SLOT * slots as u32)
}
