use crate::core::events::EngineEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Byte counter for one download operation.
#[derive(Debug)]
pub struct ProgressAggregator {
    downloaded: AtomicU64,
    total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total: u64,
    pub percent: f64,
    pub speed_bps: u64,
    pub eta: Option<Duration>,
}

impl ProgressAggregator {
    pub fn new(total: u64) -> Self {
        Self { downloaded: AtomicU64::new(0), total }
    }

    pub fn add(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// 100 only once every byte is accounted for; float rounding never reaches it early.
    pub fn percent(&self) -> f64 {
        percent_of(self.downloaded(), self.total)
    }

    pub fn snapshot(&self, elapsed: Duration) -> ProgressSnapshot {
        let downloaded = self.downloaded();
        let secs = elapsed.as_secs_f64().max(0.001);
        let speed = (downloaded as f64 / secs) as u64;
        let eta = if speed > 0 && downloaded < self.total {
            Some(Duration::from_secs_f64((self.total - downloaded) as f64 / speed as f64))
        } else {
            None
        };
        ProgressSnapshot {
            downloaded,
            total: self.total,
            percent: percent_of(downloaded, self.total),
            speed_bps: speed,
            eta,
        }
    }
}

fn percent_of(downloaded: u64, total: u64) -> f64 {
    if total == 0 || downloaded >= total {
        return 100.0;
    }
    let p = 100.0 * downloaded as f64 / total as f64;
    p.clamp(0.0, 99.99)
}

/// Counts a range's bytes against its high-water mark, so a retried range only
/// reports bytes beyond what an earlier attempt already counted.
#[derive(Debug)]
pub struct RangeProgress<'a> {
    aggregator: &'a ProgressAggregator,
    reported: u64,
}

impl<'a> RangeProgress<'a> {
    pub fn new(aggregator: &'a ProgressAggregator) -> Self {
        Self { aggregator, reported: 0 }
    }

    /// `written` is the number of bytes of this range written by the current attempt.
    pub fn observe(&mut self, written: u64) {
        if written > self.reported {
            self.aggregator.add(written - self.reported);
            self.reported = written;
        }
    }
}

/// Background task publishing `EngineEvent::Progress` samples until stopped.
pub struct ProgressReporter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        aggregator: Arc<ProgressAggregator>,
        interval: Duration,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let stop = CancellationToken::new();
        let stop2 = stop.clone();
        let interval = interval.max(Duration::from_millis(1));
        let started = Instant::now();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop2.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                publish(&aggregator, started, &events);
            }
            // closing sample so subscribers see the final count
            publish(&aggregator, started, &events);
        });

        Self { stop, handle }
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "progress reporter task ended abnormally");
        }
    }
}

fn publish(aggregator: &ProgressAggregator, started: Instant, events: &broadcast::Sender<EngineEvent>) {
    let s = aggregator.snapshot(started.elapsed());
    let _ = events.send(EngineEvent::Progress {
        downloaded: s.downloaded,
        total: s.total,
        percent: s.percent,
        speed_bps: s.speed_bps,
        eta: s.eta,
    });
}
