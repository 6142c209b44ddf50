//! Idle heartbeats while the backend call is pending, and frame delivery.

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// SSE comment line; conformant parsers ignore it.
pub const HEARTBEAT: &str = ":ka\n\n";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

enum Step<T> {
    Tick,
    Ready(T),
}

/// Yield [`HEARTBEAT`] every `interval` until `pending` resolves, then yield
/// its frames. No heartbeat follows the first real frame.
pub fn with_heartbeat<F, I>(pending: F, interval: Duration) -> impl Stream<Item = Bytes>
where
    F: Future<Output = I>,
    I: IntoIterator<Item = Bytes>,
{
    async_stream::stream! {
        tokio::pin!(pending);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                frames = &mut pending => Step::Ready(frames),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Tick => yield Bytes::from_static(HEARTBEAT.as_bytes()),
                Step::Ready(frames) => {
                    for frame in frames {
                        yield frame;
                    }
                    break;
                }
            }
        }
    }
}

/// Write `frames` to `sink` in order, one whole frame per write.
///
/// Stops at the first failed write and drops the rest of the stream, which
/// also abandons a backend call that is still pending. Returns the number of
/// frames delivered.
pub async fn deliver<S, K>(frames: S, mut sink: K) -> Result<usize, K::Error>
where
    S: Stream<Item = Bytes>,
    K: Sink<Bytes> + Unpin,
{
    futures::pin_mut!(frames);
    let mut delivered = 0;

    while let Some(frame) = frames.next().await {
        sink.send(frame).await?;
        delivered += 1;
    }

    sink.close().await?;
    Ok(delivered)
}
