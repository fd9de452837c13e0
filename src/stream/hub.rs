//! Shared capture loop for the `shared` device policy.
//!
//! One `StreamPump` owns the camera and broadcasts every encoded frame to all
//! subscribers. The loop starts with the first subscriber and stops at the
//! next iteration after the last one has gone. Each subscriber has a small
//! bounded queue; a viewer that falls behind misses frames instead of
//! stalling the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::multipart::FrameSink;
use super::pump::{PumpReport, PumpSettings, StreamPump};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::EncodedImage;
use crate::ingest::FrameSource;
use crate::pipeline::Pipeline;

/// Frames buffered per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_QUEUE: usize = 2;

pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

struct HubInner {
    subscribers: Vec<(u64, SyncSender<Arc<EncodedImage>>)>,
    next_id: u64,
    /// The loop accepts new subscribers.
    running: bool,
    /// A loop thread exists and has not yet closed its source. Stays set
    /// while a stopped loop winds down.
    active: bool,
    generation: u64,
    worker: Option<JoinHandle<PumpReport>>,
}

struct HubShared {
    state: Mutex<HubInner>,
    /// Signalled when a loop has released the device.
    released: Condvar,
}

impl HubShared {
    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait_released<'a>(&self, guard: MutexGuard<'a, HubInner>) -> MutexGuard<'a, HubInner> {
        self.released
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct FrameHub {
    factory: SourceFactory,
    pipeline: Arc<Pipeline>,
    settings: PumpSettings,
    shutdown: Arc<AtomicBool>,
    shared: Arc<HubShared>,
}

impl FrameHub {
    pub fn new(
        factory: SourceFactory,
        pipeline: Arc<Pipeline>,
        settings: PumpSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            factory,
            pipeline,
            settings,
            shutdown,
            shared: Arc::new(HubShared {
                state: Mutex::new(HubInner {
                    subscribers: Vec::new(),
                    next_id: 0,
                    running: false,
                    active: false,
                    generation: 0,
                    worker: None,
                }),
                released: Condvar::new(),
            }),
        }
    }

    /// Join the running loop, starting it if needed. A caller that arrives
    /// while a stopped loop still holds the device waits for the release and
    /// then joins or starts the next loop. Fails with the source's open error
    /// when the loop cannot start.
    pub fn subscribe(&self) -> PipelineResult<Subscription> {
        let mut inner = self.shared.lock();
        while !inner.running && inner.active {
            inner = self.shared.wait_released(inner);
        }
        if inner.running {
            return Ok(self.attach(&mut inner));
        }
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PipelineError::DeviceUnavailable(
                "shared capture loop is shutting down".into(),
            ));
        }
        // The previous loop has closed its source; only the thread exit is left.
        if let Some(worker) = inner.worker.take() {
            if worker.join().is_err() {
                log::error!("frame hub worker panicked");
            }
        }
        self.start_loop(&mut inner)
    }

    /// Wait for the next frame the loop produces.
    pub fn next_frame(&self, timeout: Duration) -> PipelineResult<Arc<EncodedImage>> {
        let subscription = self.subscribe()?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PipelineError::CaptureFailed(format!(
                    "no frame from the shared capture loop within {:?}",
                    timeout
                )));
            }
            match subscription.next(remaining) {
                Relayed::Frame(frame) => return Ok(frame),
                Relayed::Idle => continue,
                Relayed::Ended => {
                    return Err(PipelineError::DeviceUnavailable(
                        "shared capture loop ended".into(),
                    ))
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Wait for the current loop, if any, to exit. Returns its report.
    pub fn join(&self) -> Option<PumpReport> {
        let worker = self.shared.lock().worker.take()?;
        worker.join().ok()
    }

    fn attach(&self, inner: &mut HubInner) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        log::debug!("frame hub: subscriber {} joined ({} total)", id, inner.subscribers.len());
        Subscription {
            id,
            rx,
            shared: self.shared.clone(),
        }
    }

    fn start_loop(&self, inner: &mut HubInner) -> PipelineResult<Subscription> {
        let mut pump = StreamPump::new(
            (self.factory)(),
            self.pipeline.clone(),
            self.settings.clone(),
            self.shutdown.clone(),
        );
        pump.start()?;

        inner.generation += 1;
        inner.running = true;
        inner.active = true;
        let generation = inner.generation;

        // The worker cannot look at the hub until the caller's lock is
        // released, so attaching after the spawn is still in time.
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("frame-hub".to_string())
            .spawn(move || {
                let _exit = LoopExit {
                    shared: shared.clone(),
                    generation,
                };
                // Dropped before `_exit`, so the source is closed first.
                let mut pump = pump;
                let mut sink = HubSink { shared, generation };
                pump.run(&mut sink)
            });
        match spawned {
            Ok(handle) => {
                inner.worker = Some(handle);
                log::info!("frame hub: shared capture loop started");
                Ok(self.attach(inner))
            }
            Err(err) => {
                // The closure, and with it the pump, is gone: the source is closed.
                inner.running = false;
                inner.active = false;
                Err(PipelineError::DeviceUnavailable(format!(
                    "failed to spawn capture thread: {}",
                    err
                )))
            }
        }
    }
}

/// Marks the loop's device as released when the worker finishes, however
/// it finishes.
struct LoopExit {
    shared: Arc<HubShared>,
    generation: u64,
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.generation == self.generation {
            inner.running = false;
            inner.active = false;
            inner.subscribers.clear();
        }
        drop(inner);
        self.shared.released.notify_all();
    }
}

/// Fans one pump's output out to the current subscribers.
struct HubSink {
    shared: Arc<HubShared>,
    generation: u64,
}

impl HubSink {
    /// Stop taking viewers once the last one has gone.
    fn stop_if_unwatched(inner: &mut HubInner) -> bool {
        if inner.subscribers.is_empty() {
            if inner.running {
                inner.running = false;
                log::info!("frame hub: no viewers left, stopping capture");
            }
            return true;
        }
        false
    }
}

impl FrameSink for HubSink {
    fn push(&mut self, image: &EncodedImage) -> PipelineResult<()> {
        let mut inner = self.shared.lock();
        if inner.generation != self.generation || !inner.running {
            return Err(PipelineError::ClientDisconnected);
        }
        let frame = Arc::new(image.clone());
        inner.subscribers.retain(|(id, tx)| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("frame hub: subscriber {} lagging, frame {} dropped", id, image.sequence());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if Self::stop_if_unwatched(&mut inner) {
            return Err(PipelineError::ClientDisconnected);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.generation != self.generation || !inner.running {
            return true;
        }
        Self::stop_if_unwatched(&mut inner)
    }
}

/// Result of waiting on a subscription.
#[derive(Debug)]
pub enum Relayed {
    Frame(Arc<EncodedImage>),
    /// Nothing arrived within the timeout.
    Idle,
    /// The capture loop has stopped.
    Ended,
}

/// A viewer's place in the hub. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<Arc<EncodedImage>>,
    shared: Arc<HubShared>,
}

impl Subscription {
    pub fn next(&self, timeout: Duration) -> Relayed {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Relayed::Frame(frame),
            Err(RecvTimeoutError::Timeout) => Relayed::Idle,
            Err(RecvTimeoutError::Disconnected) => Relayed::Ended,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.subscribers.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotator;
    use crate::detect::{ClassNames, Detector, StubBackend};
    use crate::encode::JpegEncoder;
    use crate::ingest::scripted::{Counters, FlakyDetector, ScriptedSource};
    use crate::ingest::DeviceLock;
    use crate::stream::pump::ExitReason;

    const WAIT: Duration = Duration::from_secs(5);

    fn hub_with(factory: SourceFactory, detector: Arc<dyn Detector>) -> FrameHub {
        let pipeline = Arc::new(Pipeline::new(detector, Annotator::default(), JpegEncoder::default()));
        let settings = PumpSettings {
            min_frame_interval: Duration::from_millis(5),
            capture_retry_delay: Duration::ZERO,
            ..PumpSettings::default()
        };
        FrameHub::new(factory, pipeline, settings, Arc::default())
    }

    fn hub_over(frames: usize, counters: &Counters) -> FrameHub {
        let counters = counters.clone();
        let factory: SourceFactory = Arc::new(move || {
            Box::new(ScriptedSource::frames(frames).sharing(&counters)) as Box<dyn FrameSource>
        });
        hub_with(factory, Arc::new(StubBackend::centered(0, 0.87, ClassNames::default())))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn two_subscribers_share_one_device() -> anyhow::Result<()> {
        let counters = Counters::default();
        let hub = hub_over(10_000, &counters);
        let first = hub.subscribe()?;
        let second = hub.subscribe()?;
        assert!(matches!(first.next(WAIT), Relayed::Frame(_)));
        assert!(matches!(second.next(WAIT), Relayed::Frame(_)));
        assert_eq!(counters.opens(), 1);
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        drop(second);
        let report = hub.join().ok_or_else(|| anyhow::anyhow!("no worker"))?;
        assert_eq!(report.exit, ExitReason::ClientDisconnected);
        assert_eq!(counters.releases(), 1);
        assert!(!hub.is_running());
        Ok(())
    }

    #[test]
    fn end_of_stream_ends_subscriptions_and_loop_restarts() -> anyhow::Result<()> {
        let counters = Counters::default();
        let hub = hub_over(2, &counters);
        let sub = hub.subscribe()?;
        let mut ended = false;
        for _ in 0..10 {
            if let Relayed::Ended = sub.next(WAIT) {
                ended = true;
                break;
            }
        }
        assert!(ended);
        drop(sub);

        let again = hub.subscribe()?;
        assert!(matches!(again.next(WAIT), Relayed::Frame(_)));
        assert_eq!(counters.opens(), 2);
        drop(again);
        hub.join();
        assert_eq!(counters.releases(), 2);
        Ok(())
    }

    #[test]
    fn next_frame_takes_one_frame_from_the_loop() -> anyhow::Result<()> {
        let counters = Counters::default();
        let hub = hub_over(10_000, &counters);
        let frame = hub.next_frame(WAIT)?;
        assert_eq!(&frame.as_bytes()[..2], &[0xFF, 0xD8]);
        hub.join();
        assert_eq!(counters.releases(), 1);
        Ok(())
    }

    #[test]
    fn start_failure_is_returned_to_the_subscriber() {
        let factory: SourceFactory = Arc::new(|| Box::new(ScriptedSource::failing_open()) as Box<dyn FrameSource>);
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(StubBackend::default()),
            Annotator::default(),
            JpegEncoder::default(),
        ));
        let hub = FrameHub::new(factory, pipeline, PumpSettings::default(), Arc::default());
        assert!(matches!(
            hub.subscribe(),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        assert!(!hub.is_running());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn loop_without_viewers_stops_even_if_no_frame_is_ever_pushed() -> anyhow::Result<()> {
        let counters = Counters::default();
        let factory: SourceFactory = {
            let counters = counters.clone();
            Arc::new(move || {
                Box::new(ScriptedSource::frames(1_000_000).sharing(&counters)) as Box<dyn FrameSource>
            })
        };
        let hub = hub_with(factory, Arc::new(FlakyDetector::always()));
        drop(hub.subscribe()?);

        assert!(wait_until(|| counters.releases() == 1));
        let report = hub.join().ok_or_else(|| anyhow::anyhow!("no worker"))?;
        assert_eq!(report.exit, ExitReason::ClientDisconnected);
        assert_eq!(report.frames_sent, 0);
        assert!(!hub.is_running());
        Ok(())
    }

    #[test]
    fn viewers_arriving_during_wind_down_share_the_next_loop() -> anyhow::Result<()> {
        let counters = Counters::default();
        let device = DeviceLock::new();
        let factory: SourceFactory = {
            let (counters, device) = (counters.clone(), device.clone());
            Arc::new(move || {
                Box::new(
                    ScriptedSource::frames(1_000_000)
                        .sharing(&counters)
                        .claiming(&device)
                        .slow_close(Duration::from_millis(300)),
                ) as Box<dyn FrameSource>
            })
        };
        let hub = Arc::new(hub_with(factory, Arc::new(FlakyDetector::always())));
        drop(hub.subscribe()?);
        assert!(wait_until(|| !hub.is_running()));

        // Both arrive while the first loop is still closing its source.
        let arrivals: Vec<_> = (0..2)
            .map(|_| {
                let hub = hub.clone();
                thread::spawn(move || hub.subscribe())
            })
            .collect();
        let mut viewers = Vec::new();
        for arrival in arrivals {
            let joined = arrival
                .join()
                .map_err(|_| anyhow::anyhow!("subscriber thread panicked"))?;
            viewers.push(joined?);
        }
        assert_eq!(counters.opens(), 2);
        assert_eq!(hub.subscriber_count(), 2);

        drop(viewers);
        assert!(wait_until(|| counters.releases() == 2));
        hub.join();
        assert!(!device.is_held());
        Ok(())
    }
}
