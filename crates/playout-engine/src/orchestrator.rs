//! Playlist supervisor.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use playout_encoder::{EncoderLauncher, EncoderResult, ExitOutcome};
use playout_ipc::{Playlist, PlayoutStats, StopReason, SupervisorEvent, SupervisorState, Timings};
use playout_transport::{ConnectivityProbe, SourceVerifier};

use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::state::{missing_child, ChildStatus, CurrentChild, ShutdownToken};
use crate::EngineResult;

/// How often a running encoder is polled for exit.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Warn once this many passes in a row produced no successful stream.
const FAILED_PASS_WARNING_THRESHOLD: u64 = 3;

/// Configuration the supervisor is built with.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sources, streamed in order, forever.
    pub playlist: Playlist,

    /// Fixed loop delays.
    pub timings: Timings,

    /// Check each source before launching an encoder for it.
    pub verify_sources: bool,
}

impl SupervisorConfig {
    /// Configuration with default timings and verification enabled.
    pub fn new(playlist: Playlist) -> Self {
        Self {
            playlist,
            timings: Timings::default(),
            verify_sources: true,
        }
    }
}

/// Outcome of one playlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    Skipped,
    Succeeded,
    Failed,
    Interrupted,
}

/// State reachable from both the worker and the shutdown path.
struct Shared {
    token: ShutdownToken,
    current: CurrentChild,
    state: RwLock<SupervisorState>,
    event_tx: RwLock<Option<Sender<SupervisorEvent>>>,
}

impl Shared {
    fn transition_to(&self, new_state: SupervisorState) {
        self.transition_if(|_| true, new_state);
    }

    /// Move to `new_state` if `allowed` accepts the current state.
    ///
    /// The check, the write and the event are done under one write guard
    /// so transitions are never reordered. Returns true if the state moved.
    fn transition_if(
        &self,
        allowed: impl FnOnce(&SupervisorState) -> bool,
        new_state: SupervisorState,
    ) -> bool {
        let mut state = self.state.write();
        if !allowed(&state) {
            return false;
        }

        let previous = std::mem::replace(&mut *state, new_state.clone());
        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        // try_send never blocks, so publishing under the guard is safe.
        self.send_event(SupervisorEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
        true
    }

    fn send_event(&self, event: SupervisorEvent) {
        if let Some(tx) = self.event_tx.read().as_ref() {
            // Never block the loop on a slow or absent consumer.
            let _ = tx.try_send(event);
        }
    }
}

/// Cloneable handle used to stop a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    /// Stop the playlist loop and ask the current encoder to exit.
    ///
    /// Idempotent and non-blocking. Safe to call from the signal-handling
    /// context: no waiting and no I/O beyond signalling the encoder.
    /// Returns true for the call that actually initiated shutdown.
    pub fn shutdown(&self, reason: StopReason) -> bool {
        let first = self.shared.token.cancel();
        self.shared.current.request_termination();

        if first {
            self.shared.transition_if(
                |state| state.is_init() || state.is_running(),
                SupervisorState::ShuttingDown { reason },
            );
        }

        first
    }

    /// True until shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.shared.token.is_running()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.shared.state.read().clone()
    }

    /// Pid of the encoder currently streaming.
    pub fn active_encoder(&self) -> Option<u32> {
        self.shared.current.pid()
    }
}

struct Inner {
    config: SupervisorConfig,
    probe: Arc<dyn ConnectivityProbe>,
    verifier: Arc<dyn SourceVerifier>,
    launcher: Arc<dyn EncoderLauncher>,
    shared: Arc<Shared>,
    metrics: MetricsCollector,
}

/// Streams a playlist to the ingest endpoint forever, one encoder at a time.
pub struct Supervisor {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(
        config: SupervisorConfig,
        probe: Arc<dyn ConnectivityProbe>,
        verifier: Arc<dyn SourceVerifier>,
        launcher: Arc<dyn EncoderLauncher>,
    ) -> Self {
        let shared = Arc::new(Shared {
            token: ShutdownToken::new(),
            current: CurrentChild::new(),
            state: RwLock::new(SupervisorState::Init),
            event_tx: RwLock::new(None),
        });

        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                verifier,
                launcher,
                shared,
                metrics: MetricsCollector::new(),
            }),
            worker: None,
        }
    }

    /// Publish events to `event_tx`.
    pub fn set_event_sender(&self, event_tx: Sender<SupervisorEvent>) {
        *self.inner.shared.event_tx.write() = Some(event_tx);
    }

    /// Handle for stopping the supervisor from another thread.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: Arc::clone(&self.inner.shared),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.inner.shared.state.read().clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PlayoutStats {
        self.inner.metrics.snapshot()
    }

    /// Launch the playlist loop on a background thread.
    pub fn spawn(&mut self) -> EngineResult<()> {
        if self.worker.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("playout-supervisor".to_string())
            .spawn(move || inner.run())
            .map_err(EngineError::SpawnWorker)?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Block until the playlist loop has exited.
    pub fn join(&mut self) -> EngineResult<()> {
        let handle = self.worker.take().ok_or(EngineError::NotStarted)?;
        let result = handle.join().map_err(|_| EngineError::WorkerPanicked);

        if result.is_err() {
            if let Err(e) = self.inner.shared.current.force_kill() {
                warn!("Failed to reap encoder after worker panic: {}", e);
            }
            self.inner.shared.transition_to(SupervisorState::Terminated);
        }

        result
    }

    /// Probe general internet connectivity.
    pub fn check_connectivity(&self) -> bool {
        self.inner.check_connectivity()
    }

    /// Check that `source` exists.
    pub fn verify_source(&self, source: &str) -> bool {
        self.inner.verifier.verify(source)
    }

    /// Stream one source to completion. Returns true on a clean exit.
    pub fn stream_one(&self, source: &str) -> bool {
        self.inner.stream_one(source)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.handle().shutdown(StopReason::Requested);
            let _ = handle.join();
        }
    }
}

impl Inner {
    /// Worker thread body.
    fn run(&self) {
        self.shared
            .transition_if(SupervisorState::is_init, SupervisorState::Running);

        self.run_loop();

        // Nothing may outlive the worker.
        match self.shared.current.force_kill() {
            Ok(Some(outcome)) => debug!(%outcome, "Reaped leftover encoder"),
            Ok(None) => {}
            Err(e) => warn!("Failed to reap leftover encoder: {}", e),
        }

        self.shared.transition_to(SupervisorState::Terminated);
        info!(stats = ?self.metrics.snapshot(), "Playout loop stopped");
    }

    #[instrument(name = "playout_loop", skip(self))]
    fn run_loop(&self) {
        let timings = self.config.timings;
        info!(
            sources = self.config.playlist.len(),
            "Starting 24/7 playout loop"
        );
        self.metrics.start();

        let mut pass: u64 = 0;

        while self.shared.token.is_running() {
            if !self.check_connectivity() {
                self.metrics.record_offline();
                warn!(
                    retry_in_secs = timings.offline_retry.as_secs_f32(),
                    "No internet connection, retrying later"
                );
                self.shared.send_event(SupervisorEvent::ConnectivityLost {
                    retry_in: timings.offline_retry,
                });
                self.shared.token.sleep(timings.offline_retry);
                continue;
            }

            pass += 1;
            let Some(attempted) = self.run_pass(pass) else {
                break;
            };

            let failed_in_a_row = self.metrics.complete_pass();
            let stats = self.metrics.snapshot();
            info!(pass, "Playlist pass complete, starting over");

            if failed_in_a_row >= FAILED_PASS_WARNING_THRESHOLD {
                warn!(
                    passes = failed_in_a_row,
                    "No source has streamed successfully for several passes"
                );
            }

            self.shared
                .send_event(SupervisorEvent::PassCompleted { pass, stats });

            if attempted == 0 {
                // Every source was skipped; do not spin on verification.
                self.shared.token.sleep(timings.failure_backoff);
            }
        }
    }

    /// Run one pass over the playlist.
    ///
    /// Returns the number of encoder launches, or `None` if shutdown cut the
    /// pass short.
    fn run_pass(&self, pass: u64) -> Option<usize> {
        let timings = self.config.timings;
        let mut attempted = 0;

        for (index, source) in self.config.playlist.sources().iter().enumerate() {
            if !self.shared.token.is_running() {
                return None;
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_item(pass, index, source)
            }))
            .unwrap_or_else(|_| {
                error!(source = %source, "Unexpected panic while streaming, treating as failure");
                self.discard_current();
                self.record_failure(pass, index, source);
                ItemResult::Failed
            });

            if result != ItemResult::Skipped {
                attempted += 1;
            }

            match result {
                ItemResult::Interrupted => return None,
                ItemResult::Skipped => {}
                ItemResult::Succeeded => {
                    self.shared.token.sleep(timings.item_gap);
                }
                ItemResult::Failed => {
                    debug!(
                        backoff_secs = timings.failure_backoff.as_secs_f32(),
                        "Backing off before next source"
                    );
                    self.shared.token.sleep(timings.failure_backoff);
                }
            }
        }

        self.shared.token.is_running().then_some(attempted)
    }

    #[instrument(name = "playlist_item", skip(self))]
    fn process_item(&self, pass: u64, index: usize, source: &str) -> ItemResult {
        if self.config.verify_sources && !self.verifier.verify(source) {
            warn!(source, "Source is not reachable, skipping");
            self.metrics.record_skip();
            self.shared.send_event(SupervisorEvent::ItemSkipped {
                pass,
                index,
                source: source.to_string(),
            });
            return ItemResult::Skipped;
        }

        self.shared.send_event(SupervisorEvent::ItemStarted {
            pass,
            index,
            source: source.to_string(),
        });

        let success = self.stream_one(source);

        if !self.shared.token.is_running() {
            info!(source, "Streaming interrupted by shutdown");
            return ItemResult::Interrupted;
        }

        if success {
            info!(source, "Completed streaming");
            self.metrics.record_success();
            self.shared.send_event(SupervisorEvent::ItemSucceeded {
                pass,
                index,
                source: source.to_string(),
            });
            ItemResult::Succeeded
        } else {
            warn!(source, "Streaming failed, moving on to the next source");
            self.record_failure(pass, index, source);
            ItemResult::Failed
        }
    }

    fn record_failure(&self, pass: u64, index: usize, source: &str) {
        self.metrics.record_failure();
        self.shared.send_event(SupervisorEvent::ItemFailed {
            pass,
            index,
            source: source.to_string(),
        });
    }

    fn check_connectivity(&self) -> bool {
        if !self.shared.token.is_running() {
            return false;
        }
        self.probe.check()
    }

    fn stream_one(&self, source: &str) -> bool {
        info!(source, encoder = self.launcher.name(), "Starting live stream");
        self.metrics.record_attempt();

        let child = match self.launcher.launch(source) {
            Ok(child) => child,
            Err(e) => {
                error!(source, "Error launching encoder: {}", e);
                return false;
            }
        };

        let pid = child.id();
        self.shared.current.install(child);

        match self.wait_for_encoder() {
            Ok((outcome, _)) if outcome.success() => true,
            Ok((outcome, stderr_tail)) => {
                if self.shared.token.is_running() {
                    warn!(pid, %outcome, "Encoder exited with an error");
                    for line in stderr_tail {
                        warn!(target: "encoder", pid, "{}", line);
                    }
                } else {
                    debug!(pid, %outcome, "Encoder stopped for shutdown");
                }
                false
            }
            Err(e) => {
                error!(pid, "Error waiting for encoder: {}", e);
                self.discard_current();
                false
            }
        }
    }

    /// Wait for the current encoder to exit, escalating to a kill if
    /// shutdown was requested and it outlives the grace period.
    fn wait_for_encoder(&self) -> EncoderResult<(ExitOutcome, Vec<String>)> {
        let mut kill_deadline: Option<Instant> = None;

        loop {
            match self.shared.current.poll()? {
                ChildStatus::Exited {
                    outcome,
                    stderr_tail,
                } => return Ok((outcome, stderr_tail)),
                ChildStatus::Absent => return Err(missing_child()),
                ChildStatus::Running => {}
            }

            if !self.shared.token.is_running() {
                match kill_deadline {
                    None => {
                        self.shared.current.request_termination();
                        kill_deadline = Some(Instant::now() + self.config.timings.kill_grace);
                        info!("Waiting for encoder to exit");
                    }
                    Some(deadline) if Instant::now() >= deadline => {
                        warn!("Encoder ignored termination request, killing it");
                        let outcome = self
                            .shared
                            .current
                            .force_kill()?
                            .ok_or_else(missing_child)?;
                        return Ok((outcome, Vec::new()));
                    }
                    Some(_) => {}
                }
            }

            thread::sleep(CHILD_POLL_INTERVAL);
        }
    }

    fn discard_current(&self) {
        if let Err(e) = self.shared.current.force_kill() {
            warn!("Failed to reap encoder: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use playout_encoder::{EncoderChild, EncoderError};

    fn fast_timings() -> Timings {
        Timings {
            offline_retry: Duration::from_millis(40),
            failure_backoff: Duration::from_millis(30),
            item_gap: Duration::from_millis(5),
            kill_grace: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(10),
        }
    }

    #[derive(Default)]
    struct ScriptedProbe {
        results: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn with_results(results: &[bool]) -> Self {
            Self {
                results: Mutex::new(results.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ConnectivityProbe for ScriptedProbe {
        fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().pop_front().unwrap_or(true)
        }
    }

    struct OfflineProbe {
        calls: AtomicUsize,
    }

    impl ConnectivityProbe for OfflineProbe {
        fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    struct FakeVerifier {
        unreachable: Vec<String>,
    }

    impl SourceVerifier for FakeVerifier {
        fn verify(&self, locator: &str) -> bool {
            !self.unreachable.iter().any(|s| s == locator)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
        HangIgnoringTerm,
        Panic,
        LaunchError,
    }

    #[derive(Debug, Clone)]
    struct Attempt {
        source: String,
        at: Instant,
    }

    type Script = Box<dyn Fn(&str, usize) -> Behavior + Send + Sync>;

    struct FakeLauncher {
        script: Script,
        attempts: Arc<Mutex<Vec<Attempt>>>,
        terminations: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
    }

    impl FakeLauncher {
        fn new(script: impl Fn(&str, usize) -> Behavior + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                attempts: Arc::default(),
                terminations: Arc::default(),
                kills: Arc::default(),
            }
        }

        fn sources(&self) -> Vec<String> {
            self.attempts
                .lock()
                .iter()
                .map(|a| a.source.clone())
                .collect()
        }
    }

    impl EncoderLauncher for FakeLauncher {
        fn launch(&self, source: &str) -> EncoderResult<Box<dyn EncoderChild>> {
            let nth = {
                let mut attempts = self.attempts.lock();
                let nth = attempts.iter().filter(|a| a.source == source).count();
                attempts.push(Attempt {
                    source: source.to_string(),
                    at: Instant::now(),
                });
                nth
            };

            match (self.script)(source, nth) {
                Behavior::LaunchError => Err(EncoderError::Spawn(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no encoder",
                ))),
                Behavior::Panic => panic!("encoder launcher blew up"),
                behavior => Ok(Box::new(FakeChild {
                    behavior,
                    term_requested: false,
                    killed: false,
                    terminations: Arc::clone(&self.terminations),
                    kills: Arc::clone(&self.kills),
                })),
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct FakeChild {
        behavior: Behavior,
        term_requested: bool,
        killed: bool,
        terminations: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
    }

    impl EncoderChild for FakeChild {
        fn id(&self) -> u32 {
            4242
        }

        fn try_wait(&mut self) -> EncoderResult<Option<ExitOutcome>> {
            if self.killed {
                return Ok(Some(ExitOutcome::signalled()));
            }
            Ok(match self.behavior {
                Behavior::Succeed => Some(ExitOutcome::from_code(0)),
                Behavior::Fail => Some(ExitOutcome::from_code(1)),
                Behavior::Hang if self.term_requested => Some(ExitOutcome::from_code(255)),
                _ => None,
            })
        }

        fn terminate(&mut self) -> EncoderResult<()> {
            self.term_requested = true;
            self.terminations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn kill(&mut self) -> EncoderResult<()> {
            self.killed = true;
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn wait(&mut self) -> EncoderResult<ExitOutcome> {
            loop {
                if let Some(outcome) = self.try_wait()? {
                    return Ok(outcome);
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn stderr_tail(&self) -> Vec<String> {
            vec!["fake encoder output".to_string()]
        }
    }

    fn playlist(sources: &[&str]) -> Playlist {
        Playlist::new(sources.iter().copied()).unwrap()
    }

    fn build(
        sources: &[&str],
        probe: Arc<dyn ConnectivityProbe>,
        launcher: Arc<FakeLauncher>,
    ) -> Supervisor {
        let config = SupervisorConfig {
            playlist: playlist(sources),
            timings: fast_timings(),
            verify_sources: false,
        };
        let verifier = Arc::new(FakeVerifier {
            unreachable: Vec::new(),
        });
        Supervisor::new(config, probe, verifier, launcher)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn stop(supervisor: &mut Supervisor) {
        supervisor.handle().shutdown(StopReason::Requested);
        supervisor.join().unwrap();
    }

    #[test]
    fn test_playlist_repeats_in_order() {
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let mut supervisor = build(
            &["a", "b", "c"],
            Arc::new(ScriptedProbe::default()),
            Arc::clone(&launcher),
        );

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || launcher.sources().len() >= 7));
        stop(&mut supervisor);

        let sources = launcher.sources();
        for (i, source) in sources.iter().enumerate() {
            assert_eq!(source, ["a", "b", "c"][i % 3]);
        }
        assert!(supervisor.stats().passes >= 2);
        assert!(supervisor.state().is_terminated());
    }

    #[test]
    fn test_failure_backs_off_and_moves_on() {
        let launcher = Arc::new(FakeLauncher::new(|source, nth| {
            if source == "b" && nth == 0 {
                Behavior::Fail
            } else {
                Behavior::Succeed
            }
        }));
        let mut supervisor = build(
            &["a", "b"],
            Arc::new(ScriptedProbe::default()),
            Arc::clone(&launcher),
        );
        let (event_tx, event_rx) = playout_ipc::event_channel();
        supervisor.set_event_sender(event_tx);

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || launcher.sources().len() >= 4));
        stop(&mut supervisor);

        let attempts = launcher.attempts.lock().clone();
        let order: Vec<&str> = attempts.iter().take(4).map(|a| a.source.as_str()).collect();
        assert_eq!(order, ["a", "b", "a", "b"]);

        let timings = fast_timings();
        assert!(attempts[1].at - attempts[0].at >= timings.item_gap);
        assert!(attempts[2].at - attempts[1].at >= timings.failure_backoff);

        let events: Vec<SupervisorEvent> = event_rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::ItemFailed { pass: 1, index: 1, source } if source == "b"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SupervisorEvent::ItemSucceeded { pass: 2, index: 1, source } if source == "b"
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::PassCompleted { pass: 1, .. })));

        let stats = supervisor.stats();
        assert_eq!(stats.failures, 1);
        assert!(stats.successes >= 3);
    }

    #[test]
    fn test_offline_waits_before_any_attempt() {
        let probe = Arc::new(ScriptedProbe::with_results(&[false]));
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let mut supervisor = build(&["a", "b"], probe.clone(), Arc::clone(&launcher));

        let started = Instant::now();
        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !launcher.sources().is_empty()));
        stop(&mut supervisor);

        let first = launcher.attempts.lock()[0].at;
        assert!(first - started >= fast_timings().offline_retry);
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(launcher.sources()[0], "a");
        assert_eq!(supervisor.stats().offline_checks, 1);
    }

    #[test]
    fn test_shutdown_terminates_running_encoder() {
        let launcher = Arc::new(FakeLauncher::new(|source, _| {
            if source == "b" {
                Behavior::Hang
            } else {
                Behavior::Succeed
            }
        }));
        let mut supervisor = build(
            &["a", "b"],
            Arc::new(ScriptedProbe::default()),
            Arc::clone(&launcher),
        );
        let handle = supervisor.handle();

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            handle.active_encoder().is_some() && launcher.sources().len() == 2
        }));

        let started = Instant::now();
        assert!(handle.shutdown(StopReason::Requested));
        supervisor.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(launcher.terminations.load(Ordering::SeqCst) >= 1);
        assert_eq!(launcher.kills.load(Ordering::SeqCst), 0);
        assert_eq!(launcher.sources(), ["a", "b"]);
        assert!(handle.active_encoder().is_none());
        assert!(handle.state().is_terminated());
    }

    #[test]
    fn test_stubborn_encoder_is_killed_after_grace() {
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::HangIgnoringTerm));
        let mut supervisor = build(
            &["a"],
            Arc::new(ScriptedProbe::default()),
            Arc::clone(&launcher),
        );
        let handle = supervisor.handle();

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.active_encoder().is_some()));

        let started = Instant::now();
        handle.shutdown(StopReason::Requested);
        supervisor.join().unwrap();

        assert!(started.elapsed() >= fast_timings().kill_grace);
        assert_eq!(launcher.kills.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.sources(), ["a"]);
    }

    #[test]
    fn test_launch_errors_and_panics_are_contained() {
        let launcher = Arc::new(FakeLauncher::new(|source, _| match source {
            "a" => Behavior::LaunchError,
            "b" => Behavior::Panic,
            _ => Behavior::Succeed,
        }));
        let mut supervisor = build(
            &["a", "b", "c"],
            Arc::new(ScriptedProbe::default()),
            Arc::clone(&launcher),
        );

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || launcher.sources().len() >= 4));
        stop(&mut supervisor);

        assert_eq!(launcher.sources()[..4], ["a", "b", "c", "a"]);
        let stats = supervisor.stats();
        assert!(stats.failures >= 2);
        assert!(stats.successes >= 1);
    }

    #[test]
    fn test_unverified_sources_are_skipped() {
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let config = SupervisorConfig {
            playlist: playlist(&["a", "b", "c"]),
            timings: fast_timings(),
            verify_sources: true,
        };
        let verifier = Arc::new(FakeVerifier {
            unreachable: vec!["b".to_string()],
        });
        let mut supervisor = Supervisor::new(
            config,
            Arc::new(ScriptedProbe::default()),
            verifier,
            launcher.clone(),
        );

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || launcher.sources().len() >= 4));
        stop(&mut supervisor);

        let sources = launcher.sources();
        assert!(!sources.iter().any(|s| s == "b"));
        assert_eq!(sources[..4], ["a", "c", "a", "c"]);
        assert!(supervisor.stats().skipped >= 1);
    }

    #[test]
    fn test_shutdown_interrupts_offline_wait() {
        let probe = Arc::new(OfflineProbe {
            calls: AtomicUsize::new(0),
        });
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let config = SupervisorConfig {
            playlist: playlist(&["a"]),
            timings: Timings {
                offline_retry: Duration::from_secs(30),
                ..fast_timings()
            },
            verify_sources: false,
        };
        let verifier = Arc::new(FakeVerifier {
            unreachable: Vec::new(),
        });
        let mut supervisor = Supervisor::new(config, probe.clone(), verifier, launcher.clone());

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            probe.calls.load(Ordering::SeqCst) >= 1
        }));

        let started = Instant::now();
        stop(&mut supervisor);

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(launcher.sources().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_prevents_start() {
        let probe = Arc::new(ScriptedProbe::default());
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let mut supervisor = build(&["a"], probe.clone(), Arc::clone(&launcher));
        let handle = supervisor.handle();

        assert!(handle.shutdown(StopReason::Requested));
        assert!(!handle.shutdown(StopReason::Requested));
        assert!(handle.state().is_shutting_down());

        supervisor.spawn().unwrap();
        supervisor.join().unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(launcher.sources().is_empty());
        assert!(supervisor.state().is_terminated());
    }

    #[test]
    fn test_spawn_and_join_misuse() {
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let mut supervisor = build(&["a"], Arc::new(ScriptedProbe::default()), launcher);

        assert!(matches!(supervisor.join(), Err(EngineError::NotStarted)));
        supervisor.handle().shutdown(StopReason::Requested);
        supervisor.spawn().unwrap();
        assert!(matches!(supervisor.spawn(), Err(EngineError::AlreadyStarted)));
        supervisor.join().unwrap();
    }

    #[test]
    fn test_state_transitions_are_published() {
        let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
        let mut supervisor = build(&["a"], Arc::new(ScriptedProbe::default()), launcher.clone());
        let (event_tx, event_rx) = playout_ipc::event_channel();
        supervisor.set_event_sender(event_tx);

        supervisor.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !launcher.sources().is_empty()));
        stop(&mut supervisor);

        let states: Vec<&'static str> = event_rx
            .try_iter()
            .filter_map(|e| match e {
                SupervisorEvent::StateChanged { current, .. } => Some(current.name()),
                _ => None,
            })
            .collect();
        assert_eq!(states, ["Running", "ShuttingDown", "Terminated"]);
    }

    #[test]
    fn test_racing_shutdown_keeps_states_in_order() {
        fn rank(state: &SupervisorState) -> u8 {
            match state {
                SupervisorState::Init => 0,
                SupervisorState::Running => 1,
                SupervisorState::ShuttingDown { .. } => 2,
                SupervisorState::Terminated => 3,
            }
        }

        for _ in 0..300 {
            let offline = Arc::new(OfflineProbe {
                calls: AtomicUsize::new(0),
            });
            let launcher = Arc::new(FakeLauncher::new(|_, _| Behavior::Succeed));
            let mut supervisor = build(&["a"], offline, launcher);
            let (event_tx, event_rx) = playout_ipc::event_channel();
            supervisor.set_event_sender(event_tx);

            supervisor.spawn().unwrap();
            supervisor.handle().shutdown(StopReason::Requested);
            supervisor.join().unwrap();

            assert!(supervisor.state().is_terminated());
            let ranks: Vec<u8> = event_rx
                .try_iter()
                .filter_map(|e| match e {
                    SupervisorEvent::StateChanged { current, .. } => Some(rank(&current)),
                    _ => None,
                })
                .collect();
            assert!(ranks.windows(2).all(|w| w[0] < w[1]), "{ranks:?}");
            assert_eq!(ranks.last(), Some(&3));
        }
    }

    #[test]
    fn test_direct_operations() {
        let launcher = Arc::new(FakeLauncher::new(|source, _| {
            if source == "bad" {
                Behavior::Fail
            } else {
                Behavior::Succeed
            }
        }));
        let probe = Arc::new(ScriptedProbe::with_results(&[false, true]));
        let supervisor = build(&["good"], probe, launcher);

        assert!(!supervisor.check_connectivity());
        assert!(supervisor.check_connectivity());
        assert!(supervisor.verify_source("good"));
        assert!(supervisor.stream_one("good"));
        assert!(!supervisor.stream_one("bad"));
        assert_eq!(supervisor.stats().attempts, 2);
    }
}
