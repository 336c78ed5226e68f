//! Background Usage Sampler
//!
//! Polls a [`UsageSource`] on a dedicated thread every `delay` seconds
//! and appends each reading to a [`UsageLog`] until stopped.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::error::{require_non_negative, require_positive, MonitorError};
use crate::source::{Clock, CpuSource, MonotonicClock, Pacing, UsageSource};

use super::usage_log::{Report, Sample, UsageLog};

/// Lifecycle of a [`Sampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Created, not yet started
    Idle,
    /// Background thread is polling
    Running,
    /// Stop requested or the source failed; the log no longer grows
    /// (except for at most one in-flight sample until [`Sampler::join`])
    Stopped,
}

/// State shared with the background thread.
struct Shared {
    stopped: AtomicBool,
    log: Mutex<UsageLog>,
    failure: Mutex<Option<MonitorError>>,
}

impl Shared {
    fn fail(&self, err: MonitorError) {
        *lock(&self.failure) = Some(err);
        self.stopped.store(true, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Samples a usage source on a background thread.
///
/// `stop()` only requests termination: a sample already in flight may
/// still be appended afterwards. Call [`Sampler::join`] when the log must
/// be complete.
///
/// # Example
///
/// ```rust,no_run
/// use usagemon::monitoring::Sampler;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut sampler = Sampler::new(0.1, 0.5)?;
///
///     sampler.run(|| {
///         // workload
///     })?;
///
///     sampler.join()?;
///     println!("{}", sampler.summary()?);
///     Ok(())
/// }
/// ```
pub struct Sampler {
    delay: Duration,
    buffer: f64,
    source_name: String,
    source: Option<Box<dyn UsageSource>>,
    clock: Arc<dyn Clock>,
    start_time: f64,
    started_at: DateTime<Utc>,
    started: bool,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Creates an idle CPU sampler.
    ///
    /// `delay` is the polling interval and `buffer` the trim applied by
    /// [`Sampler::summary`], both in seconds.
    pub fn new(delay: f64, buffer: f64) -> Result<Self, MonitorError> {
        require_positive("delay", delay)?;
        require_non_negative("buffer", buffer)?;
        Self::with_source(delay, buffer, CpuSource::new())
    }

    /// Creates an idle sampler over any usage source.
    pub fn with_source(
        delay: f64,
        buffer: f64,
        source: impl UsageSource + 'static,
    ) -> Result<Self, MonitorError> {
        let delay = require_positive("delay", delay)?;
        let buffer = require_non_negative("buffer", buffer)?;
        let clock = MonotonicClock::shared();

        Ok(Self {
            delay: Duration::from_secs_f64(delay),
            buffer,
            source_name: source.name().to_string(),
            source: Some(Box::new(source)),
            start_time: clock.now(),
            clock,
            started_at: Utc::now(),
            started: false,
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                log: Mutex::new(UsageLog::new()),
                failure: Mutex::new(None),
            }),
            handle: None,
        })
    }

    /// Replaces the clock used for timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.start_time = clock.now();
        self.clock = clock;
        self
    }

    /// Spawns the polling thread and returns immediately.
    ///
    /// A sampler runs at most once; a second call fails with
    /// [`MonitorError::State`].
    pub fn start(&mut self) -> Result<(), MonitorError> {
        match self.state() {
            SamplerState::Idle => {}
            SamplerState::Running => {
                return Err(MonitorError::State("sampler is already running".to_string()))
            }
            SamplerState::Stopped => {
                return Err(MonitorError::State(
                    "sampler has been stopped and cannot be restarted".to_string(),
                ))
            }
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| MonitorError::State("sampler has no source".to_string()))?;

        self.started = true;
        self.start_time = self.clock.now();
        self.started_at = Utc::now();

        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.clock);
        let delay = self.delay;
        let start_time = self.start_time;

        let handle = thread::Builder::new()
            .name(format!("usagemon-{}", self.source_name))
            .spawn(move || poll(source, clock, shared, delay, start_time))
            .map_err(|e| {
                self.shared.stopped.store(true, Ordering::Release);
                MonitorError::State(format!("failed to spawn sampler thread: {}", e))
            })?;

        info!(
            "Started {} sampler (delay: {:?}, buffer: {}s)",
            self.source_name, self.delay, self.buffer
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Requests the polling thread to stop. Does not wait for it.
    pub fn stop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            info!("Stopping {} sampler", self.source_name);
        }
    }

    /// Stops the sampler and waits for the polling thread to exit.
    ///
    /// After this returns the log is complete and immutable.
    pub fn join(&mut self) -> Result<(), MonitorError> {
        self.stop();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| MonitorError::State("sampler thread panicked".to_string()))?;
        }
        Ok(())
    }

    /// Starts the sampler and returns a guard that stops it when dropped.
    pub fn enter(&mut self) -> Result<SamplerScope<'_>, MonitorError> {
        self.start()?;
        Ok(SamplerScope { sampler: self })
    }

    /// Samples for the duration of `work`.
    ///
    /// The sampler is stopped on every exit path, including panics.
    pub fn run<T>(&mut self, work: impl FnOnce() -> T) -> Result<T, MonitorError> {
        let _scope = self.enter()?;
        Ok(work())
    }

    pub fn state(&self) -> SamplerState {
        let stopped = self.shared.stopped.load(Ordering::Acquire);
        match (self.started, stopped) {
            (_, true) => SamplerState::Stopped,
            (true, false) => SamplerState::Running,
            (false, false) => SamplerState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SamplerState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SamplerState::Stopped
    }

    /// Terminal error of the polling thread, if the source failed.
    pub fn failure(&self) -> Option<MonitorError> {
        lock(&self.shared.failure).clone()
    }

    /// Read-only snapshot of the collected log.
    ///
    /// Fails with the stored source error if polling failed, or with
    /// [`MonitorError::State`] while the sampler is still running.
    pub fn log(&self) -> Result<UsageLog, MonitorError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }
        if self.is_running() {
            return Err(MonitorError::State(
                "usage log is still being written; stop the sampler first".to_string(),
            ));
        }
        Ok(lock(&self.shared.log).clone())
    }

    /// Snapshot of whatever was collected, even if the source failed.
    ///
    /// Still fails with [`MonitorError::State`] while running. Pair with
    /// [`Sampler::failure`] to tell a complete log from a truncated one.
    pub fn partial_log(&self) -> Result<UsageLog, MonitorError> {
        if self.is_running() {
            return Err(MonitorError::State(
                "usage log is still being written; stop the sampler first".to_string(),
            ));
        }
        Ok(lock(&self.shared.log).clone())
    }

    /// Averages over the log, trimming the configured buffer at both ends.
    pub fn summary(&self) -> Result<Report, MonitorError> {
        self.summary_with_trim(self.buffer)
    }

    /// Averages over the log, trimming `trim` seconds at both ends.
    pub fn summary_with_trim(&self, trim: f64) -> Result<Report, MonitorError> {
        self.log()?.summary(trim)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Wall-clock time of the last `start()` (or creation, if never started).
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polling loop run on the background thread.
fn poll(
    mut source: Box<dyn UsageSource>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    delay: Duration,
    start_time: f64,
) {
    let channels = source.channels();
    let pacing = source.pacing();

    while !shared.stopped.load(Ordering::Acquire) {
        let iteration_start = clock.now();

        let reading = match source.sample(delay) {
            Ok(reading) => reading,
            Err(e) => {
                error!("{} source query failed: {}", source.name(), e);
                shared.fail(e.into());
                break;
            }
        };

        if let Err(e) = reading.validate(channels) {
            error!("{} source returned an invalid reading: {}", source.name(), e);
            shared.fail(e.into());
            break;
        }

        let elapsed = clock.now() - start_time;
        debug!("{} sample at {:.3}s: {:?}", source.name(), elapsed, reading.values());

        if let Err(e) = lock(&shared.log).push(Sample::new(elapsed, reading)) {
            error!("Failed to record {} sample: {}", source.name(), e);
            shared.fail(e);
            break;
        }

        if pacing == Pacing::Instant {
            let remaining = delay.as_secs_f64() - (clock.now() - iteration_start);
            if remaining > 0.0 && !shared.stopped.load(Ordering::Acquire) {
                thread::sleep(Duration::from_secs_f64(remaining));
            }
        }
    }

    debug!("{} sampler thread exiting", source.name());
}

/// Scope during which a [`Sampler`] runs; stops it on drop.
pub struct SamplerScope<'a> {
    sampler: &'a mut Sampler,
}

impl Deref for SamplerScope<'_> {
    type Target = Sampler;

    fn deref(&self) -> &Sampler {
        self.sampler
    }
}

impl Drop for SamplerScope<'_> {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::monitoring::Reading;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    /// Instant source returning a fixed value on every core.
    struct ConstantSource {
        value: f64,
        cores: usize,
        calls: Arc<AtomicUsize>,
    }

    impl ConstantSource {
        fn new(value: f64, cores: usize) -> Self {
            Self {
                value,
                cores,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl UsageSource for ConstantSource {
        fn name(&self) -> &str {
            "constant"
        }

        fn pacing(&self) -> Pacing {
            Pacing::Instant
        }

        fn channels(&self) -> usize {
            self.cores
        }

        fn sample(&mut self, _delay: Duration) -> Result<Reading, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Reading::PerCore(vec![self.value; self.cores]))
        }
    }

    /// Clock that advances by one second per reading.
    struct TickClock(AtomicU64);

    impl Clock for TickClock {
        fn now(&self) -> f64 {
            self.0.fetch_add(1, Ordering::SeqCst) as f64
        }
    }

    /// Self-paced source that blocks for the delay like a CPU query.
    struct BlockingSource;

    impl UsageSource for BlockingSource {
        fn name(&self) -> &str {
            "blocking"
        }

        fn pacing(&self) -> Pacing {
            Pacing::SelfPaced
        }

        fn channels(&self) -> usize {
            1
        }

        fn sample(&mut self, delay: Duration) -> Result<Reading, SourceError> {
            thread::sleep(delay);
            Ok(Reading::Scalar(10.0))
        }
    }

    /// Fails after `ok_samples` successful readings.
    struct FailingSource {
        ok_samples: usize,
        reading: Reading,
    }

    impl UsageSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn pacing(&self) -> Pacing {
            Pacing::Instant
        }

        fn channels(&self) -> usize {
            1
        }

        fn sample(&mut self, _delay: Duration) -> Result<Reading, SourceError> {
            if self.ok_samples == 0 {
                return Err(SourceError::backend("stub", "device lost"));
            }
            self.ok_samples -= 1;
            Ok(self.reading.clone())
        }
    }

    fn wait_until_stopped(sampler: &Sampler) {
        for _ in 0..200 {
            if sampler.is_stopped() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("sampler did not stop");
    }

    #[test]
    fn test_invalid_delay_rejected() {
        for delay in [0.0, -1.0] {
            let result = Sampler::with_source(delay, 0.0, ConstantSource::new(1.0, 1));
            assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
        }
        assert!(matches!(
            Sampler::new(0.0, 0.0),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_negative_buffer_rejected() {
        let result = Sampler::with_source(1.0, -0.5, ConstantSource::new(1.0, 1));
        assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_is_idle() {
        let sampler = Sampler::with_source(1.0, 0.0, ConstantSource::new(1.0, 2)).unwrap();

        assert_eq!(sampler.state(), SamplerState::Idle);
        assert_eq!(sampler.delay(), Duration::from_secs(1));
        assert_eq!(sampler.source_name(), "constant");
        assert!(sampler.log().unwrap().is_empty());
    }

    #[test]
    fn test_cpu_sampler_construction() {
        let sampler = Sampler::new(1.0, 0.0).unwrap();
        assert_eq!(sampler.source_name(), "cpu");
    }

    #[test]
    fn test_constant_source_scenario() {
        let mut sampler =
            Sampler::with_source(0.05, 0.0, ConstantSource::new(42.0, 4)).unwrap();

        sampler.start().unwrap();
        assert!(sampler.is_running());
        thread::sleep(Duration::from_millis(300));
        sampler.stop();
        sampler.join().unwrap();

        let log = sampler.log().unwrap();
        assert!(
            (5..=7).contains(&log.len()),
            "expected 5..=7 samples, got {}",
            log.len()
        );
        assert!(log.timestamps().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log.channels(), Some(4));

        let report = sampler.summary_with_trim(0.0).unwrap();
        assert_eq!(report.overall_mean, 42.0);
        assert!(report.channel_means.iter().all(|m| *m == 42.0));
    }

    #[test]
    fn test_self_paced_source_is_not_slept_twice() {
        let mut sampler = Sampler::with_source(0.05, 0.0, BlockingSource).unwrap();

        sampler.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        sampler.join().unwrap();

        let len = sampler.log().unwrap().len();
        assert!((4..=7).contains(&len), "expected 4..=7 samples, got {}", len);
    }

    #[test]
    fn test_immediate_stop_is_bounded() {
        let source = ConstantSource::new(5.0, 1);
        let calls = Arc::clone(&source.calls);
        let mut sampler = Sampler::with_source(0.05, 0.0, source).unwrap();

        sampler.start().unwrap();
        sampler.stop();
        sampler.join().unwrap();

        let len = sampler.log().unwrap().len();
        assert!(len <= 2, "expected at most one in-flight sample, got {}", len);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(sampler.log().unwrap().len(), len);
        assert_eq!(calls.load(Ordering::SeqCst), len);
    }

    #[test]
    fn test_start_twice_is_state_error() {
        let mut sampler = Sampler::with_source(0.05, 0.0, ConstantSource::new(1.0, 1)).unwrap();

        sampler.start().unwrap();
        assert!(matches!(sampler.start(), Err(MonitorError::State(_))));

        sampler.join().unwrap();
        assert!(matches!(sampler.start(), Err(MonitorError::State(_))));
    }

    #[test]
    fn test_log_while_running_is_state_error() {
        let mut sampler = Sampler::with_source(0.05, 0.0, ConstantSource::new(1.0, 1)).unwrap();

        sampler.start().unwrap();
        assert!(matches!(sampler.log(), Err(MonitorError::State(_))));
        sampler.join().unwrap();
        assert!(sampler.log().is_ok());
    }

    #[test]
    fn test_source_failure_is_captured() {
        let source = FailingSource {
            ok_samples: 2,
            reading: Reading::Scalar(50.0),
        };
        let mut sampler = Sampler::with_source(0.01, 0.0, source).unwrap();

        sampler.start().unwrap();
        wait_until_stopped(&sampler);
        sampler.join().unwrap();

        assert_eq!(
            sampler.failure(),
            Some(MonitorError::SourceQuery(SourceError::backend(
                "stub",
                "device lost"
            )))
        );
        assert!(matches!(
            sampler.log(),
            Err(MonitorError::SourceQuery(_))
        ));
        assert!(sampler.summary().is_err());

        let partial = sampler.partial_log().unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.readings()[0], Reading::Scalar(50.0));
    }

    #[test]
    fn test_partial_log_while_running_is_state_error() {
        let mut sampler = Sampler::with_source(0.01, 0.0, ConstantSource::new(1.0, 1)).unwrap();

        sampler.start().unwrap();
        assert!(matches!(sampler.partial_log(), Err(MonitorError::State(_))));
        sampler.join().unwrap();
        assert_eq!(sampler.partial_log(), sampler.log());
    }

    #[test]
    fn test_invalid_reading_is_captured() {
        let source = FailingSource {
            ok_samples: 5,
            reading: Reading::PerCore(vec![1.0, 2.0]),
        };
        let mut sampler = Sampler::with_source(0.01, 0.0, source).unwrap();

        sampler.start().unwrap();
        wait_until_stopped(&sampler);

        assert!(matches!(
            sampler.failure(),
            Some(MonitorError::SourceQuery(SourceError::ChannelMismatch {
                expected: 1,
                found: 2
            }))
        ));
    }

    #[test]
    fn test_scope_stops_on_exit() {
        let mut sampler = Sampler::with_source(0.02, 0.0, ConstantSource::new(3.0, 1)).unwrap();

        {
            let scope = sampler.enter().unwrap();
            assert!(scope.is_running());
            thread::sleep(Duration::from_millis(50));
        }

        assert!(sampler.is_stopped());
        sampler.join().unwrap();
        assert!(!sampler.log().unwrap().is_empty());
    }

    #[test]
    fn test_run_returns_work_result() {
        let mut sampler = Sampler::with_source(0.02, 0.0, ConstantSource::new(3.0, 1)).unwrap();

        let result: Result<u32, String> = sampler.run(|| Err("workload failed".to_string())).unwrap();

        assert_eq!(result, Err("workload failed".to_string()));
        assert!(sampler.is_stopped());
    }

    #[test]
    fn test_run_stops_on_panic() {
        let mut sampler = Sampler::with_source(0.02, 0.0, ConstantSource::new(3.0, 1)).unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = sampler.run(|| panic!("boom"));
        }));

        assert!(outcome.is_err());
        assert!(sampler.is_stopped());
    }

    #[test]
    fn test_drop_stops_thread() {
        let source = ConstantSource::new(1.0, 1);
        let calls = Arc::clone(&source.calls);
        let mut sampler = Sampler::with_source(0.01, 0.0, source).unwrap();

        sampler.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        drop(sampler);

        thread::sleep(Duration::from_millis(50));
        let settled = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_stop_before_start() {
        let mut sampler = Sampler::with_source(0.05, 0.0, ConstantSource::new(1.0, 1)).unwrap();

        sampler.stop();
        assert!(sampler.is_stopped());
        assert!(matches!(sampler.start(), Err(MonitorError::State(_))));
        assert!(sampler.log().unwrap().is_empty());
    }

    #[test]
    fn test_summary_uses_configured_buffer() {
        let mut sampler = Sampler::with_source(0.02, 10.0, ConstantSource::new(1.0, 1)).unwrap();

        sampler.run(|| thread::sleep(Duration::from_millis(60))).unwrap();
        sampler.join().unwrap();

        assert!(matches!(sampler.summary(), Err(MonitorError::Range(_))));
        assert!(sampler.summary_with_trim(0.0).is_ok());
    }

    #[test]
    fn test_timestamps_come_from_injected_clock() {
        let clock = Arc::new(TickClock(AtomicU64::new(0)));
        // with_clock reads tick 0, start reads tick 1 as the start time
        let mut sampler = Sampler::with_source(0.005, 0.0, BlockingSource)
            .unwrap()
            .with_clock(clock);

        sampler.run(|| thread::sleep(Duration::from_millis(50))).unwrap();
        sampler.join().unwrap();

        // Each self-paced iteration reads the clock twice: once at the top
        // of the loop and once for the sample's elapsed time.
        let log = sampler.log().unwrap();
        assert!(log.len() >= 2);
        for (i, elapsed) in log.timestamps().iter().enumerate() {
            assert_eq!(*elapsed, 2.0 + 2.0 * i as f64);
        }
    }
}
