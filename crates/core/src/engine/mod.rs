//! Single owner of the sample window, playback state and display state.
//!
//! The actor task is the only place these are mutated. Motion deliveries,
//! scheduler flushes, network completions and control calls all arrive as
//! messages on one channel and are handled one at a time. Network
//! requests run in their own tasks and report back through the same channel,
//! so a slow request never stalls sampling.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    timeline::{run_poll_scheduler, run_upload_scheduler},
    AppConfig, AudioSink, CoverRequest, DisplayState, EngineClock, InferenceTransport,
    JumpBeatError, MotionDelivery, PlaybackController, PlaybackState, ReconcileOutcome,
    Reconciler, RequestSequencer, ResourceResolver, Result, Sample, SampleBuffer, TaggedResponse,
    TelemetryBatch,
};

const INBOX_CAPACITY: usize = 1024;

pub(crate) enum EngineMessage {
    Motion(Sample),
    Flush(oneshot::Sender<TelemetryBatch>),
    Response(TaggedResponse),
    Cover { seq: u64, fetched: Result<Vec<u8>> },
    SetMuted(bool),
    Inspect(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

/// Point-in-time view of engine internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub buffered_samples: usize,
    pub playback: PlaybackState,
    pub display: DisplayState,
    pub last_applied: Option<u64>,
}

/// Running engine: the actor plus its schedulers.
#[derive(Debug)]
pub struct Engine {
    handle: EngineHandle,
    actor: JoinHandle<()>,
    schedulers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Warms up playback and starts the actor and schedulers on the current
    /// tokio runtime.
    pub fn spawn<T, S>(config: &AppConfig, transport: Arc<T>, sink: S) -> Result<Self>
    where
        T: InferenceTransport,
        S: AudioSink,
    {
        config.validate()?;
        let resolver = ResourceResolver::new(config.network.base_url()?);

        let mut playback = PlaybackController::new(sink);
        if let Err(err) = playback.warm_up(&config.playback.placeholder) {
            tracing::warn!(error = %err, "audio warm-up failed, first track may start late");
        }
        playback.set_muted(config.playback.start_muted);

        let (inbox, messages) = mpsc::channel(INBOX_CAPACITY);
        let (display_tx, display_rx) = watch::channel(DisplayState::default());
        let clock = EngineClock::start();

        let actor = EngineActor {
            messages,
            inbox: inbox.downgrade(),
            buffer: SampleBuffer::new(config.window.duration()),
            clear_on_flush: config.window.clear_on_flush,
            reconciler: Reconciler::new(config.reconcile.ordering, resolver),
            playback,
            display: display_tx,
            transport: Arc::clone(&transport),
            clock,
        };
        let actor = tokio::spawn(actor.run());

        let sequencer = RequestSequencer::new();
        let mut schedulers = vec![tokio::spawn(run_upload_scheduler(
            config.network.upload_period(),
            inbox.clone(),
            Arc::clone(&transport),
            sequencer.clone(),
        ))];
        if config.network.poll_enabled {
            schedulers.push(tokio::spawn(run_poll_scheduler(
                config.network.poll_period(),
                inbox.clone(),
                transport,
                sequencer,
            )));
        }

        tracing::info!(
            window_ms = config.window.duration_ms,
            upload_ms = config.network.upload_period_ms,
            poll = config.network.poll_enabled,
            "engine started"
        );

        Ok(Self {
            handle: EngineHandle {
                inbox,
                display: display_rx,
                clock,
            },
            actor,
            schedulers,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stops the schedulers, lets the actor drain what it already received
    /// and waits for it to exit. In-flight requests are abandoned.
    pub async fn shutdown(mut self) {
        for scheduler in &self.schedulers {
            scheduler.abort();
        }
        let _ = self.handle.inbox.send(EngineMessage::Shutdown).await;
        if let Err(err) = (&mut self.actor).await {
            tracing::error!(error = %err, "engine actor ended abnormally");
        }
    }
}

/// Dropping the engine without `shutdown` stops it on the spot. Handles that
/// outlive it report [`JumpBeatError::EngineStopped`].
impl Drop for Engine {
    fn drop(&mut self) {
        for scheduler in &self.schedulers {
            scheduler.abort();
        }
        self.actor.abort();
    }
}

/// Cloneable entry point for producers and readers.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inbox: mpsc::Sender<EngineMessage>,
    display: watch::Receiver<DisplayState>,
    clock: EngineClock,
}

impl EngineHandle {
    /// Accelerometer callback. Never blocks; errors and empty deliveries are
    /// ignored, and readings are dropped if the engine falls behind.
    pub fn record(&self, delivery: MotionDelivery) -> Result<()> {
        let acceleration = match delivery {
            Ok(Some(acceleration)) => acceleration,
            Ok(None) => return Ok(()),
            Err(err) => {
                tracing::trace!(error = %err, "ignoring motion delivery");
                return Ok(());
            }
        };

        let sample = Sample::new(acceleration, self.clock.elapsed());
        match self.inbox.try_send(EngineMessage::Motion(sample)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("engine inbox full, dropping motion sample");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(JumpBeatError::EngineStopped),
        }
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.send(EngineMessage::SetMuted(muted)).await
    }

    /// Receiver that is notified whenever the display state changes.
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    pub async fn inspect(&self) -> Result<EngineSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.send(EngineMessage::Inspect(reply)).await?;
        snapshot.await.map_err(|_| JumpBeatError::EngineStopped)
    }

    async fn send(&self, message: EngineMessage) -> Result<()> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| JumpBeatError::EngineStopped)
    }
}

struct EngineActor<T, S> {
    messages: mpsc::Receiver<EngineMessage>,
    inbox: mpsc::WeakSender<EngineMessage>,
    buffer: SampleBuffer,
    clear_on_flush: bool,
    reconciler: Reconciler,
    playback: PlaybackController<S>,
    display: watch::Sender<DisplayState>,
    transport: Arc<T>,
    clock: EngineClock,
}

impl<T: InferenceTransport, S: AudioSink> EngineActor<T, S> {
    async fn run(mut self) {
        while let Some(message) = self.messages.recv().await {
            match message {
                EngineMessage::Motion(sample) => self.buffer.append(sample),
                EngineMessage::Flush(reply) => {
                    let _ = reply.send(self.flush());
                }
                EngineMessage::Response(response) => self.reconcile(response),
                EngineMessage::Cover { seq, fetched } => {
                    let reconciler = &mut self.reconciler;
                    self.display
                        .send_if_modified(|display| reconciler.apply_cover(seq, fetched, display));
                }
                EngineMessage::SetMuted(muted) => self.playback.set_muted(muted),
                EngineMessage::Inspect(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                EngineMessage::Shutdown => break,
            }
        }

        tracing::info!("engine stopped");
    }

    /// An empty window is still uploaded; the service answers it with a
    /// zero cadence.
    fn flush(&mut self) -> TelemetryBatch {
        self.buffer.evict(self.clock.elapsed());
        let batch = self.buffer.to_batch();
        if self.clear_on_flush {
            self.buffer.clear();
        }
        batch
    }

    fn reconcile(&mut self, response: TaggedResponse) {
        let reconciler = &mut self.reconciler;
        let playback = &mut self.playback;
        let mut cover = None;

        self.display.send_if_modified(|display| {
            match reconciler.reconcile(response, playback, display) {
                ReconcileOutcome::Applied(changes) => {
                    let changed = changes.display_changed();
                    cover = changes.cover_request;
                    changed
                }
                ReconcileOutcome::Stale { .. } | ReconcileOutcome::Rejected => false,
            }
        });

        if let Some(request) = cover {
            self.fetch_cover(request);
        }
    }

    fn fetch_cover(&self, request: CoverRequest) {
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            let CoverRequest { seq, url } = request;
            let fetched = transport.fetch_cover(url).await;
            let _ = inbox.send(EngineMessage::Cover { seq, fetched }).await;
        });
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            buffered_samples: self.buffer.len(),
            playback: self.playback.state().clone(),
            display: self.display.borrow().clone(),
            last_applied: self.reconciler.last_applied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use reqwest::Url;

    use super::*;
    use crate::audio::tests::{RecordingSink, SinkCall};
    use crate::{Acceleration, MotionSourceError, ServerUpdate};

    type Scripted = (Duration, Result<ServerUpdate>);

    /// Transport answering from queues, after a per-response delay.
    #[derive(Default)]
    struct ScriptedTransport {
        uploads: Mutex<VecDeque<Scripted>>,
        polls: Mutex<VecDeque<Scripted>>,
        covers: Mutex<HashMap<String, Vec<u8>>>,
        batches: Mutex<Vec<TelemetryBatch>>,
    }

    impl ScriptedTransport {
        fn upload_answers(self, answers: Vec<Scripted>) -> Self {
            self.uploads.lock().unwrap().extend(answers);
            self
        }

        fn poll_answers(self, answers: Vec<Scripted>) -> Self {
            self.polls.lock().unwrap().extend(answers);
            self
        }

        fn cover(self, url: &str, bytes: &[u8]) -> Self {
            self.covers
                .lock()
                .unwrap()
                .insert(url.to_string(), bytes.to_vec());
            self
        }

        fn batches(&self) -> Vec<TelemetryBatch> {
            self.batches.lock().unwrap().clone()
        }

        async fn answer(queue: &Mutex<VecDeque<Scripted>>) -> Result<ServerUpdate> {
            let next = queue.lock().unwrap().pop_front();
            match next {
                Some((delay, outcome)) => {
                    tokio::time::sleep(delay).await;
                    outcome
                }
                None => Err(JumpBeatError::Status(503)),
            }
        }
    }

    #[async_trait]
    impl InferenceTransport for ScriptedTransport {
        async fn upload(&self, batch: TelemetryBatch) -> Result<ServerUpdate> {
            self.batches.lock().unwrap().push(batch);
            Self::answer(&self.uploads).await
        }

        async fn poll(&self) -> Result<ServerUpdate> {
            Self::answer(&self.polls).await
        }

        async fn fetch_cover(&self, url: Url) -> Result<Vec<u8>> {
            let bytes = self.covers.lock().unwrap().get(url.as_str()).cloned();
            bytes.ok_or_else(|| JumpBeatError::Status(404))
        }
    }

    fn config(poll_enabled: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.base_url = "http://server:5001".to_string();
        config.network.poll_enabled = poll_enabled;
        config
    }

    fn update(body: &str) -> Result<ServerUpdate> {
        ServerUpdate::from_slice(body.as_bytes())
    }

    fn instantly() -> Duration {
        Duration::ZERO
    }

    fn reading(z: f64) -> MotionDelivery {
        Ok(Some(Acceleration::new(0.0, 0.0, z)))
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_window_and_applies_response() {
        let transport = Arc::new(ScriptedTransport::default().upload_answers(vec![(
            instantly(),
            update(r#"{"jumps_per_minute": 132, "song_path": "a.mp3", "song_name": "Alpha"}"#),
        )]));
        let sink = RecordingSink::default();
        let engine = Engine::spawn(&config(false), Arc::clone(&transport), sink.clone()).unwrap();
        let handle = engine.handle();

        sleep_ms(1_000).await;
        handle.record(reading(-1.0)).unwrap();
        handle.record(Err(MotionSourceError("no data".into()))).unwrap();
        handle.record(Ok(None)).unwrap();
        handle.record(reading(1.0)).unwrap();
        handle.record(reading(-0.5)).unwrap();
        sleep_ms(4_500).await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        let z: Vec<f64> = batches[0].points().iter().map(|p| p.z).collect();
        assert_eq!(z, vec![-1.0, 1.0, -0.5]);

        let display = handle.display();
        assert_eq!(display.tempo, 132);
        assert_eq!(display.track_name, "Alpha");
        assert_eq!(sink.plays(), vec!["http://server:5001/a.mp3"]);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_track_plays_once_across_ticks() {
        let transport = Arc::new(ScriptedTransport::default().upload_answers(vec![
            (instantly(), update(r#"{"jumps_per_minute": 132, "song_path": "a.mp3"}"#)),
            (instantly(), update(r#"{"jumps_per_minute": 140, "song_path": "a.mp3"}"#)),
        ]));
        let sink = RecordingSink::default();
        let engine = Engine::spawn(&config(false), Arc::clone(&transport), sink.clone()).unwrap();
        let handle = engine.handle();

        sleep_ms(1_000).await;
        handle.record(reading(0.1)).unwrap();
        sleep_ms(5_000).await;
        handle.record(reading(0.2)).unwrap();
        sleep_ms(4_500).await;

        assert_eq!(transport.batches().len(), 2);
        assert_eq!(handle.display().tempo, 140);
        assert_eq!(sink.plays().len(), 1);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_to_older_window_is_discarded() {
        let transport = Arc::new(ScriptedTransport::default().upload_answers(vec![
            (Duration::from_secs(7), update(r#"{"jumps_per_minute": 100}"#)),
            (instantly(), update(r#"{"jumps_per_minute": 150}"#)),
        ]));
        let engine =
            Engine::spawn(&config(false), Arc::clone(&transport), RecordingSink::default())
                .unwrap();
        let handle = engine.handle();

        sleep_ms(1_000).await;
        handle.record(reading(0.1)).unwrap();
        sleep_ms(5_000).await;
        handle.record(reading(0.2)).unwrap();
        // Second answer lands at 10 s, the first one at 12 s.
        sleep_ms(7_000).await;

        let snapshot = handle.inspect().await.unwrap();
        assert_eq!(snapshot.display.tempo, 150);
        assert_eq!(snapshot.last_applied, Some(2));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_keeps_previous_tempo() {
        let transport = Arc::new(ScriptedTransport::default().upload_answers(vec![
            (instantly(), update(r#"{"jumps_per_minute": 150}"#)),
            (instantly(), update(r#"{"jumps_per_minute": }"#)),
        ]));
        let engine =
            Engine::spawn(&config(false), Arc::clone(&transport), RecordingSink::default())
                .unwrap();
        let handle = engine.handle();
        let mut changes = handle.subscribe();

        sleep_ms(1_000).await;
        handle.record(reading(0.1)).unwrap();
        sleep_ms(4_500).await;
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        handle.record(reading(0.2)).unwrap();
        sleep_ms(5_000).await;

        assert_eq!(transport.batches().len(), 2);
        assert_eq!(handle.display().tempo, 150);
        assert!(!changes.has_changed().unwrap());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poll_results_merge_through_the_same_path() {
        let transport = Arc::new(ScriptedTransport::default().poll_answers(vec![
            (instantly(), update(r#"{"jumps_per_minute": 120, "song_path": "b.mp3"}"#)),
            (instantly(), update(r#"{"jumps_per_minute": 124, "song_path": "b.mp3"}"#)),
        ]));
        let sink = RecordingSink::default();
        let mut config = config(true);
        config.network.upload_period_ms = 60_000;
        let engine = Engine::spawn(&config, Arc::clone(&transport), sink.clone()).unwrap();
        let handle = engine.handle();

        sleep_ms(10_500).await;

        assert!(transport.batches().is_empty());
        let snapshot = handle.inspect().await.unwrap();
        assert_eq!(snapshot.display.tempo, 124);
        assert_eq!(snapshot.playback.current_track_path.as_deref(), Some("b.mp3"));
        assert_eq!(snapshot.last_applied, Some(2));
        assert_eq!(sink.plays(), vec!["http://server:5001/b.mp3"]);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cover_bytes_arrive_after_update() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .upload_answers(vec![
                    (
                        instantly(),
                        update(r#"{"jumps_per_minute": 90, "song_cover_path": "covers/a.png"}"#),
                    ),
                    (
                        instantly(),
                        update(r#"{"jumps_per_minute": 95, "song_cover_path": "covers/missing.png"}"#),
                    ),
                ])
                .cover("http://server:5001/covers/a.png", &[0x89, 0x50]),
        );
        let engine =
            Engine::spawn(&config(false), Arc::clone(&transport), RecordingSink::default())
                .unwrap();
        let handle = engine.handle();

        sleep_ms(1_000).await;
        handle.record(reading(0.1)).unwrap();
        sleep_ms(4_500).await;
        assert_eq!(handle.display().cover_image, Some(vec![0x89, 0x50]));

        handle.record(reading(0.1)).unwrap();
        sleep_ms(5_000).await;
        let display = handle.display();
        assert_eq!(display.tempo, 95);
        assert_eq!(display.cover_image, Some(vec![0x89, 0x50]));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_unless_cleared_on_flush() {
        for (clear_on_flush, expected) in [(false, 1), (true, 0)] {
            let mut config = config(false);
            config.window.clear_on_flush = clear_on_flush;
            let transport = Arc::new(ScriptedTransport::default());
            let engine =
                Engine::spawn(&config, Arc::clone(&transport), RecordingSink::default()).unwrap();
            let handle = engine.handle();

            sleep_ms(4_000).await;
            handle.record(reading(0.3)).unwrap();
            sleep_ms(1_500).await;

            assert_eq!(transport.batches().len(), 1);
            let snapshot = handle.inspect().await.unwrap();
            assert_eq!(snapshot.buffered_samples, expected);

            engine.shutdown().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_and_mute_reach_the_sink() {
        let mut config = config(false);
        config.playback.placeholder = "silence.mp3".to_string();
        let sink = RecordingSink::default();
        let engine =
            Engine::spawn(&config, Arc::new(ScriptedTransport::default()), sink.clone()).unwrap();
        let handle = engine.handle();

        handle.set_muted(true).await.unwrap();
        let snapshot = handle.inspect().await.unwrap();

        assert!(snapshot.playback.is_muted);
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Preload("silence.mp3".into()),
                SinkCall::Muted(true)
            ]
        );

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_window_is_still_uploaded() {
        let transport = Arc::new(ScriptedTransport::default().upload_answers(vec![
            (instantly(), update(r#"{"jumps_per_minute": 120}"#)),
            (instantly(), update(r#"{"jumps_per_minute": 0}"#)),
            (instantly(), update(r#"{"jumps_per_minute": 0}"#)),
        ]));
        let engine =
            Engine::spawn(&config(false), Arc::clone(&transport), RecordingSink::default())
                .unwrap();
        let handle = engine.handle();

        sleep_ms(1_000).await;
        handle.record(reading(0.4)).unwrap();
        sleep_ms(4_500).await;
        assert_eq!(handle.display().tempo, 120);

        // The sensor went quiet; the 1 s sample has left the window by 10 s.
        sleep_ms(10_000).await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 1);
        assert!(batches[1].is_empty());
        assert!(batches[2].is_empty());
        assert_eq!(handle.display().tempo, 0);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn default_config_warms_up_the_sink() {
        let sink = RecordingSink::default();
        let engine = Engine::spawn(
            &AppConfig::default(),
            Arc::new(ScriptedTransport::default()),
            sink.clone(),
        )
        .unwrap();

        assert_eq!(
            sink.calls(),
            vec![SinkCall::Preload(crate::DEFAULT_PLACEHOLDER.to_string())]
        );

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_engine_stops_its_tasks() {
        let transport = Arc::new(ScriptedTransport::default());
        let engine = Engine::spawn(&config(true), Arc::clone(&transport), RecordingSink::default())
            .unwrap();
        let handle = engine.handle();

        drop(engine);
        sleep_ms(20_000).await;

        assert!(transport.batches().is_empty());
        assert!(matches!(
            handle.record(reading(1.0)),
            Err(JumpBeatError::EngineStopped)
        ));
        assert!(matches!(
            handle.inspect().await,
            Err(JumpBeatError::EngineStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_reports_stopped_engine() {
        let engine = Engine::spawn(
            &config(true),
            Arc::new(ScriptedTransport::default()),
            RecordingSink::default(),
        )
        .unwrap();
        let handle = engine.handle();

        engine.shutdown().await;

        assert!(matches!(
            handle.record(reading(1.0)),
            Err(JumpBeatError::EngineStopped)
        ));
        assert!(matches!(
            handle.inspect().await,
            Err(JumpBeatError::EngineStopped)
        ));
    }
}
