//! Stream wrapper that reports how much of an upload body has been sent.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Called with the cumulative number of bytes handed to the transport.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

pub struct ProgressStream<S> {
    inner: S,
    bytes_sent: u64,
    last_report: Instant,
    report_interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, callback: ProgressCallback) -> Self {
        Self::with_interval(inner, callback, Duration::from_secs(1))
    }

    pub fn with_interval(inner: S, callback: ProgressCallback, report_interval: Duration) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            last_report: Instant::now(),
            report_interval,
            callback,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_sent += chunk.len() as u64;

                let now = Instant::now();
                if now.duration_since(self.last_report) >= self.report_interval {
                    (self.callback)(self.bytes_sent);
                    self.last_report = now;
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                // always report the final count
                (self.callback)(self.bytes_sent);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
