use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    engine::EngineMessage, InferenceTransport, RequestOrigin, TaggedResponse, TelemetryBatch,
};

/// Monotonic clock the engine timestamps samples with.
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    epoch: Instant,
}

impl EngineClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Hands out request sequence numbers shared by both schedulers. The first
/// number issued is 1.
#[derive(Debug, Clone, Default)]
pub struct RequestSequencer {
    next: Arc<AtomicU64>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // The first tick is one full period out so the first upload carries a
    // complete window.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Flushes the window every `period` and uploads it, empty or not. Requests
/// run in their own tasks; a slow one never delays the next tick.
pub(crate) async fn run_upload_scheduler<T: InferenceTransport>(
    period: Duration,
    inbox: mpsc::Sender<EngineMessage>,
    transport: Arc<T>,
    sequencer: RequestSequencer,
) {
    let mut ticker = ticker(period);

    loop {
        ticker.tick().await;

        let (reply, flushed) = oneshot::channel::<TelemetryBatch>();
        if inbox.send(EngineMessage::Flush(reply)).await.is_err() {
            break;
        }
        let Ok(batch) = flushed.await else {
            break;
        };

        let seq = sequencer.issue();
        tracing::debug!(seq, samples = batch.len(), "upload tick");
        let transport = Arc::clone(&transport);
        let inbox = inbox.clone();
        tokio::spawn(async move {
            let outcome = transport.upload(batch).await;
            let _ = inbox
                .send(EngineMessage::Response(TaggedResponse {
                    seq,
                    origin: RequestOrigin::Upload,
                    outcome,
                }))
                .await;
        });
    }

    tracing::debug!("upload scheduler stopped");
}

/// Asks the service for its latest verdict every `period`, without payload.
pub(crate) async fn run_poll_scheduler<T: InferenceTransport>(
    period: Duration,
    inbox: mpsc::Sender<EngineMessage>,
    transport: Arc<T>,
    sequencer: RequestSequencer,
) {
    let mut ticker = ticker(period);

    loop {
        ticker.tick().await;
        if inbox.is_closed() {
            break;
        }

        let seq = sequencer.issue();
        tracing::debug!(seq, "poll tick");
        let transport = Arc::clone(&transport);
        let inbox = inbox.clone();
        tokio::spawn(async move {
            let outcome = transport.poll().await;
            let _ = inbox
                .send(EngineMessage::Response(TaggedResponse {
                    seq,
                    origin: RequestOrigin::Poll,
                    outcome,
                }))
                .await;
        });
    }

    tracing::debug!("poll scheduler stopped");
}
