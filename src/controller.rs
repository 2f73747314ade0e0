//! Start/stop/single-sample state machine around a [`SampleSource`].
//!
//! At most one background worker exists per controller. The worker owns the
//! session (counter, remaining budget, buffer) outright; the only state shared
//! with the foreground is the `running` flag.

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::model::{Reading, Sample, TrackedProcess};
use crate::monitor::{SampleSource, SystemSampleSource};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on samples taken in one session.
pub const MAX_SAMPLES: u32 = 1000;
pub const DEFAULT_INTERVAL_SECS: f64 = 1.0;
pub const MIN_INTERVAL_SECS: f64 = 0.1;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
pub type SampleCallback = Box<dyn FnMut(&Sample) -> std::result::Result<(), CallbackError> + Send>;

/// How a session hands out its samples. Chosen once per `start`.
pub enum Delivery {
    Buffered,
    Streaming(SampleCallback),
}

impl Delivery {
    pub fn streaming<F>(callback: F) -> Self
    where
        F: FnMut(&Sample) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        Self::Streaming(Box::new(callback))
    }
}

/// Applies the default and the lower clamp to a requested interval in seconds.
pub fn effective_interval(requested: Option<f64>) -> Duration {
    let secs = match requested {
        Some(v) if !v.is_nan() => v.max(MIN_INTERVAL_SECS),
        _ => DEFAULT_INTERVAL_SECS,
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Receives the final buffer of one session, exactly once.
///
/// The buffer is empty for streaming sessions.
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<Vec<Sample>>,
}

impl Completion {
    pub fn wait(self) -> Vec<Sample> {
        self.rx.recv().unwrap_or_default()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<Sample>> {
        match self.rx.recv_timeout(timeout) {
            Ok(buffer) => Some(buffer),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Vec::new()),
        }
    }

    pub fn try_wait(&self) -> Option<Vec<Sample>> {
        match self.rx.try_recv() {
            Ok(buffer) => Some(buffer),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Vec::new()),
        }
    }
}

/// Per-session state, created by `start` and moved into the worker.
struct Session {
    started_at: Instant,
    interval: Duration,
    sample_number: u64,
    remaining: u32,
    buffer: Vec<Sample>,
    delivery: Delivery,
}

struct Worker {
    source: Arc<dyn SampleSource>,
    tracked: Arc<[TrackedProcess]>,
    running: Arc<AtomicBool>,
    done: Sender<Vec<Sample>>,
}

impl Worker {
    fn run(self, mut session: Session) -> Vec<Sample> {
        tracing::info!(
            interval_secs = session.interval.as_secs_f64(),
            streaming = matches!(session.delivery, Delivery::Streaming(_)),
            "sampling started"
        );

        while self.running.load(Ordering::SeqCst) && session.remaining > 0 {
            session.sample_number += 1;
            let sample = take_sample(
                self.source.as_ref(),
                &self.tracked,
                session.sample_number,
                session.started_at.elapsed().as_secs_f64(),
            );
            tracing::debug!(sample = sample.sample_number, time = sample.elapsed_secs, "sample taken");

            match &mut session.delivery {
                Delivery::Streaming(callback) => deliver(callback, &sample),
                Delivery::Buffered => session.buffer.push(sample),
            }

            session.remaining -= 1;
            if session.remaining == 0 {
                tracing::info!(samples = session.sample_number, "sample limit reached");
                break;
            }
            self.pause(session.interval);
        }

        tracing::info!(samples = session.sample_number, "sampling finished");
        // Clear the flag before signalling so a waiter can start again right away
        self.running.store(false, Ordering::SeqCst);
        let _ = self.done.send(session.buffer.clone());
        session.buffer
    }

    /// Sleeps for `interval` unless `stop` clears the flag and unparks us first.
    fn pause(&self, interval: Duration) {
        let deadline = Instant::now().checked_add(interval);
        while self.running.load(Ordering::SeqCst) {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        }
    }
}

fn take_sample(
    source: &dyn SampleSource,
    tracked: &[TrackedProcess],
    sample_number: u64,
    elapsed_secs: f64,
) -> Sample {
    let reading = match panic::catch_unwind(AssertUnwindSafe(|| source.read(tracked))) {
        Ok(Ok(reading)) => reading,
        Ok(Err(e)) => {
            tracing::warn!(sample = sample_number, "sample source failed, reporting sentinels: {e}");
            Reading::unavailable(tracked)
        }
        Err(_) => {
            tracing::warn!(sample = sample_number, "sample source panicked, reporting sentinels");
            Reading::unavailable(tracked)
        }
    };
    Sample::new(sample_number, elapsed_secs, reading)
}

fn deliver(callback: &mut SampleCallback, sample: &Sample) {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(sample))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(sample = sample.sample_number, "sample callback failed: {e}"),
        Err(_) => tracing::warn!(sample = sample.sample_number, "sample callback panicked"),
    }
}

pub struct SamplingController {
    source: Arc<dyn SampleSource>,
    tracked: Arc<[TrackedProcess]>,
    running: Arc<AtomicBool>,
    sample_limit: u32,
    worker: Mutex<Option<JoinHandle<Vec<Sample>>>>,
    last_buffer: Mutex<Vec<Sample>>,
    started_at: Mutex<Option<Instant>>,
}

impl SamplingController {
    pub fn new(source: Arc<dyn SampleSource>, tracked: Vec<TrackedProcess>) -> Self {
        Self {
            source,
            tracked: tracked.into(),
            running: Arc::new(AtomicBool::new(false)),
            sample_limit: MAX_SAMPLES,
            worker: Mutex::new(None),
            last_buffer: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// A controller over the live machine, tracking the configured processes.
    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self::new(Arc::new(SystemSampleSource::new()), config.tracked.clone())
    }

    /// Lowers the per-session sample budget. Never raises it above [`MAX_SAMPLES`].
    pub fn with_sample_limit(mut self, limit: u32) -> Self {
        self.sample_limit = limit.clamp(1, MAX_SAMPLES);
        self
    }

    pub fn tracked(&self) -> &[TrackedProcess] {
        &self.tracked
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begins a session on a background worker and returns immediately.
    ///
    /// Fails with [`ProfilerError::AlreadyRunning`] while a session is active,
    /// leaving that session untouched.
    pub fn start(&self, interval: Option<f64>, delivery: Delivery) -> Result<Completion> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        // Only `start` raises the flag, and it does so under the slot lock
        if self.running.load(Ordering::SeqCst) {
            return Err(ProfilerError::AlreadyRunning);
        }

        // The previous worker has seen the flag down (budget spent, or stopped
        // from its own callback) but may not have exited yet
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }
        self.running.store(true, Ordering::SeqCst);
        self.last_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let started_at = Instant::now();
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(started_at);

        let session = Session {
            started_at,
            interval: effective_interval(interval),
            sample_number: 0,
            remaining: self.sample_limit,
            buffer: Vec::new(),
            delivery,
        };
        let (done, rx) = mpsc::channel();
        let worker = Worker {
            source: Arc::clone(&self.source),
            tracked: Arc::clone(&self.tracked),
            running: Arc::clone(&self.running),
            done,
        };

        let spawned = thread::Builder::new()
            .name("browser-profiler-sampler".to_string())
            .spawn(move || worker.run(session));
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(Completion { rx })
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ProfilerError::Spawn(e))
            }
        }
    }

    /// Ends the active session, if any, and returns its buffer.
    ///
    /// Waits for the worker to notice, which takes at most one in-flight
    /// sample. When idle this returns the last session's buffer, or nothing if
    /// no session ever ran.
    ///
    /// Called from a streaming callback, this only lowers the flag: the
    /// worker finishes after the callback returns and is joined by the next
    /// `start` or `stop`.
    pub fn stop(&self) -> Vec<Sample> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        self.running.store(false, Ordering::SeqCst);

        let on_worker = slot
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id());
        if on_worker {
            return self
                .last_buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
        }

        if let Some(handle) = slot.take() {
            handle.thread().unpark();
            match handle.join() {
                Ok(buffer) => {
                    *self.last_buffer.lock().unwrap_or_else(PoisonError::into_inner) = buffer;
                }
                Err(_) => tracing::error!("sampling worker panicked"),
            }
        }

        self.last_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes one sample synchronously without touching any session state.
    ///
    /// `elapsed_secs` counts from the active session's start, or is zero when
    /// idle. The sample number is always zero, which no session sample uses,
    /// so one-off samples never collide with the session's sequence.
    pub fn sample_once(&self) -> Result<Sample> {
        let elapsed = if self.is_running() {
            self.started_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let reading = self.source.read(&self.tracked)?;
        Ok(Sample::new(0, elapsed, reading))
    }
}

impl Drop for SamplingController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::model::{CpuSplit, ProcessUsage};
    use std::sync::atomic::AtomicU32;

    struct CountingSource {
        reads: AtomicU32,
    }

    impl SampleSource for CountingSource {
        fn read(&self, tracked: &[TrackedProcess]) -> std::result::Result<Reading, SourceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut reading = Reading::unavailable(tracked);
            reading.system = CpuSplit {
                user_pct: 10.0,
                sys_pct: 5.0,
            };
            Ok(reading)
        }
    }

    struct FailingSource;

    /// Panics on its second read only.
    struct PanicsOnceSource {
        reads: AtomicU32,
    }

    impl SampleSource for PanicsOnceSource {
        fn read(&self, tracked: &[TrackedProcess]) -> std::result::Result<Reading, SourceError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("process table vanished");
            }
            let mut reading = Reading::unavailable(tracked);
            reading.system = CpuSplit {
                user_pct: 10.0,
                sys_pct: 5.0,
            };
            Ok(reading)
        }
    }

    impl SampleSource for FailingSource {
        fn read(&self, _tracked: &[TrackedProcess]) -> std::result::Result<Reading, SourceError> {
            Err(SourceError::Unavailable("test".to_string()))
        }
    }

    fn controller() -> (SamplingController, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            reads: AtomicU32::new(0),
        });
        let controller = SamplingController::new(source.clone(), TrackedProcess::defaults());
        (controller, source)
    }

    #[test]
    fn interval_defaults_and_clamps() {
        assert_eq!(effective_interval(None), Duration::from_secs(1));
        assert_eq!(effective_interval(Some(0.01)), Duration::from_millis(100));
        assert_eq!(effective_interval(Some(-5.0)), Duration::from_millis(100));
        assert_eq!(effective_interval(Some(f64::NAN)), Duration::from_secs(1));
        assert_eq!(effective_interval(Some(0.25)), Duration::from_millis(250));
    }

    #[test]
    fn stop_when_never_started_is_empty() {
        let (controller, _) = controller();
        assert!(controller.stop().is_empty());
        assert!(controller.stop().is_empty());
        assert!(!controller.is_running());
    }

    #[test]
    fn second_start_is_rejected() {
        let (controller, _) = controller();
        let _completion = controller.start(Some(0.1), Delivery::Buffered).unwrap();
        let err = controller.start(Some(0.1), Delivery::Buffered).unwrap_err();
        assert!(matches!(err, ProfilerError::AlreadyRunning));
        assert!(controller.is_running());
        controller.stop();
    }

    #[test]
    fn sample_once_leaves_counters_alone() {
        let (controller, source) = controller();
        let sample = controller.sample_once().unwrap();
        assert_eq!(sample.sample_number, 0);
        assert_eq!(sample.elapsed_secs, 0.0);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert!(!controller.is_running());
        assert!(controller.stop().is_empty());
    }

    #[test]
    fn failed_reads_become_sentinels_in_the_loop() {
        let controller = SamplingController::new(Arc::new(FailingSource), TrackedProcess::defaults());
        let completion = controller.start(Some(0.1), Delivery::Buffered).unwrap();
        thread::sleep(Duration::from_millis(250));
        let buffer = controller.stop();
        assert!(!buffer.is_empty());
        let first = &buffer[0];
        assert_eq!(first.system, CpuSplit::UNAVAILABLE);
        assert_eq!(first.process("ffx"), ProcessUsage::NOT_RUNNING);
        assert_eq!(completion.wait(), buffer);
    }

    #[test]
    fn source_panic_becomes_sentinels_and_session_finishes() {
        let source = Arc::new(PanicsOnceSource {
            reads: AtomicU32::new(0),
        });
        let controller =
            SamplingController::new(source, TrackedProcess::defaults()).with_sample_limit(3);
        let buffer = controller
            .start(Some(0.1), Delivery::Buffered)
            .unwrap()
            .wait_timeout(Duration::from_secs(5))
            .expect("worker should survive the panic");

        let numbers: Vec<u64> = buffer.iter().map(|s| s.sample_number).collect();
        assert_eq!(numbers, [1, 2, 3]);
        assert_eq!(buffer[0].system.user_pct, 10.0);
        assert_eq!(buffer[1].system, CpuSplit::UNAVAILABLE);
        assert_eq!(buffer[2].system.user_pct, 10.0);
        assert!(!controller.is_running());
        assert_eq!(controller.stop(), buffer);

        let again = controller.start(Some(0.1), Delivery::Buffered);
        assert!(again.is_ok());
        controller.stop();
    }

    #[test]
    fn sample_limit_is_clamped_to_max() {
        let (controller, _) = controller();
        assert_eq!(controller.sample_limit, MAX_SAMPLES);
        let controller = controller.with_sample_limit(MAX_SAMPLES + 500);
        assert_eq!(controller.sample_limit, MAX_SAMPLES);
        let controller = controller.with_sample_limit(0);
        assert_eq!(controller.sample_limit, 1);
        let controller = controller.with_sample_limit(40);
        assert_eq!(controller.sample_limit, 40);
    }

    #[test]
    fn stop_from_inside_a_callback_does_not_deadlock() {
        let (controller, _) = controller();
        let controller = Arc::new(controller);
        let handle = Arc::downgrade(&controller);
        let (tx, rx) = mpsc::channel();
        let completion = controller
            .start(
                Some(0.1),
                Delivery::streaming(move |sample| {
                    if let Some(controller) = handle.upgrade() {
                        let buffer = controller.stop();
                        tx.send((sample.sample_number, buffer.len()))?;
                    }
                    Ok(())
                }),
            )
            .unwrap();

        let (number, len) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((number, len), (1, 0));
        assert!(completion.wait_timeout(Duration::from_secs(5)).is_some());
        assert!(!controller.is_running());
        assert!(rx.try_recv().is_err());

        assert!(controller.start(Some(0.1), Delivery::Buffered).is_ok());
        thread::sleep(Duration::from_millis(150));
        assert!(!controller.stop().is_empty());
    }

    #[test]
    fn sample_once_propagates_source_failure() {
        let controller = SamplingController::new(Arc::new(FailingSource), TrackedProcess::defaults());
        assert!(matches!(
            controller.sample_once(),
            Err(ProfilerError::Source(_))
        ));
    }

    #[test]
    fn callback_errors_do_not_stop_the_loop() {
        let (controller, _) = controller();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let completion = controller
            .start(
                Some(0.1),
                Delivery::streaming(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err("receiver gone".into())
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(350));
        assert!(controller.stop().is_empty());
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(completion.wait().is_empty());
    }

    #[test]
    fn callback_panic_is_contained() {
        let (controller, _) = controller();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        controller
            .start(
                Some(0.1),
                Delivery::streaming(move |_| {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick");
                    }
                    Ok(())
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(350));
        controller.stop();
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stop_interrupts_a_long_sleep() {
        let (controller, _) = controller();
        controller.start(Some(60.0), Delivery::Buffered).unwrap();
        thread::sleep(Duration::from_millis(100));
        let stopped_at = Instant::now();
        let buffer = controller.stop();
        assert!(stopped_at.elapsed() < Duration::from_secs(5));
        assert_eq!(buffer.len(), 1);
    }
}
