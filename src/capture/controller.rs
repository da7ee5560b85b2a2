//! Supervisor over the continuous recognition session
//!
//! Owns the single recognition handle. Capture is listening whenever, and
//! only when, no pause reason is held. Engine hiccups are absorbed with
//! exponential backoff; a watchdog bounds how long capture can stay stuck,
//! and repeated failures escalate to rebuilding the handle.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::CaptureTimings;
use crate::events::AssistantEvent;

use super::session::{
    CaptureSignal, CaptureSink, EngineErrorKind, RecognitionSession, SessionFactory, SessionId,
};

/// Microphone state as seen by the rest of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicState {
    Idle,
    Listening,
    Paused,
}

impl std::fmt::Display for MicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MicState::Idle => write!(f, "Idle"),
            MicState::Listening => write!(f, "Listening"),
            MicState::Paused => write!(f, "Paused"),
        }
    }
}

/// Named cause for suspending capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    SpeakingOutput,
    BiometricCapture,
    PinEntry,
    Error,
    SessionExit,
}

impl PauseReason {
    /// Reasons held on purpose for an unbounded time; the watchdog leaves them alone
    pub fn is_deliberate(self) -> bool {
        matches!(self, PauseReason::Error | PauseReason::SessionExit)
    }
}

/// Result of a start attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Engine accepted the start; `Started` will follow
    Requested,
    /// Already listening or a start is in flight
    AlreadyActive,
    /// A pause reason is held
    Blocked,
    /// Too soon; a retry was scheduled after the given delay
    Deferred(Duration),
    /// No recognition handle is bound
    NoSession,
    /// Engine refused the start
    Failed(EngineErrorKind),
}

/// Text recognized by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Heard {
    pub text: String,
    pub is_final: bool,
}

pub struct CaptureController {
    timings: CaptureTimings,
    session: Option<Box<dyn RecognitionSession>>,
    session_id: SessionId,
    signal_tx: mpsc::UnboundedSender<(SessionId, CaptureSignal)>,
    factory: Option<Box<dyn SessionFactory>>,

    mic_state: MicState,
    pause_reasons: BTreeSet<PauseReason>,
    is_starting: bool,
    /// Set by `stop`; suppresses auto-restart until `start` is called
    halted: bool,

    last_start_at: Option<Instant>,
    last_error: Option<(EngineErrorKind, Instant)>,
    consecutive_errors: u32,
    last_restart_delay: Option<Duration>,

    restart_at: Option<Instant>,
    watchdog_at: Option<Instant>,
    stable_at: Option<Instant>,

    event_tx: broadcast::Sender<AssistantEvent>,
}

impl CaptureController {
    /// Create a controller. Engine signals for bound sessions are delivered on `signal_tx`.
    pub fn new(
        timings: CaptureTimings,
        signal_tx: mpsc::UnboundedSender<(SessionId, CaptureSignal)>,
        event_tx: broadcast::Sender<AssistantEvent>,
    ) -> Self {
        Self {
            timings,
            session: None,
            session_id: 0,
            signal_tx,
            factory: None,
            mic_state: MicState::Idle,
            pause_reasons: BTreeSet::new(),
            is_starting: false,
            halted: true,
            last_start_at: None,
            last_error: None,
            consecutive_errors: 0,
            last_restart_delay: None,
            restart_at: None,
            watchdog_at: None,
            stable_at: None,
            event_tx,
        }
    }

    /// Supply the callback used to rebuild the recognition handle
    pub fn set_factory(&mut self, factory: Box<dyn SessionFactory>) {
        self.factory = Some(factory);
    }

    pub fn mic_state(&self) -> MicState {
        self.mic_state
    }

    pub fn pause_reasons(&self) -> &BTreeSet<PauseReason> {
        &self.pause_reasons
    }

    pub fn is_starting(&self) -> bool {
        self.is_starting
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// When the pending restart fires, if one is scheduled
    pub fn pending_restart(&self) -> Option<Instant> {
        self.restart_at
    }

    pub fn last_restart_delay(&self) -> Option<Duration> {
        self.last_restart_delay
    }

    /// Bind a recognition handle, retiring the previous one first so two
    /// sessions never run side by side.
    pub fn initialize(&mut self, mut session: Box<dyn RecognitionSession>) {
        if let Some(mut old) = self.session.take() {
            old.detach();
            old.stop();
            info!(old_session = self.session_id, "retired recognition session");
        }

        self.session_id += 1;
        session.attach(CaptureSink::new(self.session_id, self.signal_tx.clone()));
        self.session = Some(session);
        self.is_starting = false;
        self.stable_at = None;

        if self.mic_state == MicState::Listening {
            self.set_mic(MicState::Idle);
        }

        info!(session = self.session_id, "recognition session bound");
    }

    /// Attempt to begin listening
    pub fn start(&mut self, source: &str, now: Instant) -> StartOutcome {
        self.halted = false;

        if self.mic_state == MicState::Listening || self.is_starting {
            debug!(source, "start ignored, capture already active");
            return StartOutcome::AlreadyActive;
        }

        if !self.pause_reasons.is_empty() {
            debug!(source, reasons = ?self.pause_reasons, "start refused, capture paused");
            return StartOutcome::Blocked;
        }

        if let Some((EngineErrorKind::Aborted, at)) = self.last_error {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < self.timings.aborted_cooldown() {
                let wait = self.timings.aborted_cooldown() - elapsed;
                debug!(source, wait_ms = wait.as_millis() as u64, "start deferred, aborted cooldown");
                self.schedule_restart(now, wait);
                return StartOutcome::Deferred(wait);
            }
        }

        if let Some(last) = self.last_start_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.timings.min_start_interval() {
                let wait = self.timings.min_start_interval() - elapsed;
                debug!(source, wait_ms = wait.as_millis() as u64, "start deferred, too soon");
                self.schedule_restart(now, wait);
                return StartOutcome::Deferred(wait);
            }
        }

        let Some(session) = self.session.as_mut() else {
            warn!(source, "start requested with no recognition session bound");
            return StartOutcome::NoSession;
        };

        self.restart_at = None;
        self.last_start_at = Some(now);

        match session.start() {
            Ok(()) => {
                debug!(source, session = self.session_id, "recognition start requested");
                self.is_starting = true;
                self.watchdog_at = Some(now + self.timings.watchdog());
                StartOutcome::Requested
            }
            Err(e) if e.kind == EngineErrorKind::InvalidState => {
                debug!(source, "engine already started, treating as listening");
                self.enter_listening(now);
                StartOutcome::AlreadyActive
            }
            Err(e) => {
                warn!(source, error = %e, "recognition start failed");
                let kind = e.kind;
                self.record_error(kind, now);
                self.schedule_auto_restart(now);
                StartOutcome::Failed(kind)
            }
        }
    }

    /// Suspend capture for `reason`. Returns false if the reason was already held.
    pub fn pause(&mut self, reason: PauseReason, now: Instant) -> bool {
        if !self.pause_reasons.insert(reason) {
            return false;
        }

        info!(?reason, "capture paused");
        let _ = self.event_tx.send(AssistantEvent::CapturePaused { reason });

        self.restart_at = None;

        if self.mic_state == MicState::Listening || self.is_starting {
            if let Some(session) = self.session.as_mut() {
                session.abort();
            }
            self.is_starting = false;
            self.stable_at = None;
            self.set_mic(MicState::Paused);
        } else if !self.halted {
            self.set_mic(MicState::Paused);
        }

        self.arm_watchdog(now);
        true
    }

    /// Release `reason`. Only a matching earlier `pause` is undone.
    pub fn resume(&mut self, reason: PauseReason, now: Instant) -> bool {
        if !self.pause_reasons.remove(&reason) {
            debug!(?reason, "resume without matching pause");
            return false;
        }

        info!(?reason, remaining = ?self.pause_reasons, "capture pause released");
        let _ = self.event_tx.send(AssistantEvent::CaptureResumed { reason });

        if self.pause_reasons.is_empty() {
            self.watchdog_at = None;
            if !self.halted {
                self.set_mic(MicState::Idle);
                self.start("resume", now);
            }
        }

        true
    }

    /// Hard stop. Capture stays idle until `start` is called again.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.abort();
        }

        self.pause_reasons.clear();
        self.is_starting = false;
        self.halted = true;
        self.restart_at = None;
        self.watchdog_at = None;
        self.stable_at = None;
        self.set_mic(MicState::Idle);

        info!("capture stopped");
    }

    /// Emergency recovery: clear every reason and guard, then start
    pub fn force_unlock(&mut self, now: Instant) -> StartOutcome {
        warn!(reasons = ?self.pause_reasons, starting = self.is_starting, "forcing capture unlock");

        self.pause_reasons.clear();
        self.is_starting = false;
        self.halted = false;
        self.restart_at = None;
        self.watchdog_at = None;

        if self.mic_state != MicState::Listening {
            self.set_mic(MicState::Idle);
        }

        self.start("force-unlock", now)
    }

    /// Feed an engine callback. Returns recognized text, if any.
    pub fn handle_signal(
        &mut self,
        session: SessionId,
        signal: CaptureSignal,
        now: Instant,
    ) -> Option<Heard> {
        if session != self.session_id {
            debug!(session, current = self.session_id, ?signal, "ignoring signal from detached session");
            return None;
        }

        match signal {
            CaptureSignal::Started => {
                self.on_started(now);
                None
            }
            CaptureSignal::Ended => {
                self.on_end(now);
                None
            }
            CaptureSignal::Error(kind) => {
                self.on_error(kind, now);
                None
            }
            CaptureSignal::Result { text, is_final } => {
                let text = text.trim();
                if text.is_empty() || self.halted {
                    return None;
                }
                Some(Heard {
                    text: text.to_string(),
                    is_final,
                })
            }
        }
    }

    /// Earliest instant at which `on_tick` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.restart_at, self.watchdog_at, self.stable_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Run every timer that is due at `now`
    pub fn on_tick(&mut self, now: Instant) {
        if self.stable_at.is_some_and(|at| at <= now) {
            self.stable_at = None;
            if self.consecutive_errors > 0 {
                debug!(errors = self.consecutive_errors, "capture stable, error count reset");
            }
            self.consecutive_errors = 0;
            self.last_restart_delay = None;
        }

        if self.restart_at.is_some_and(|at| at <= now) {
            self.restart_at = None;
            if self.pause_reasons.is_empty() && !self.halted {
                self.start("auto-restart", now);
            }
        }

        if self.watchdog_at.is_some_and(|at| at <= now) {
            self.watchdog_at = None;
            self.on_watchdog(now);
        }
    }

    fn on_started(&mut self, now: Instant) {
        self.is_starting = false;

        if !self.pause_reasons.is_empty() || self.halted {
            // Paused or stopped while the start was in flight
            debug!("session started while paused, aborting");
            if let Some(session) = self.session.as_mut() {
                session.abort();
            }
            return;
        }

        self.enter_listening(now);
    }

    fn enter_listening(&mut self, now: Instant) {
        self.is_starting = false;
        self.restart_at = None;
        self.watchdog_at = None;
        self.stable_at = Some(now + self.timings.stable_after());
        self.set_mic(MicState::Listening);
    }

    fn on_end(&mut self, now: Instant) {
        self.is_starting = false;
        self.stable_at = None;

        if self.mic_state == MicState::Listening {
            let next = if self.pause_reasons.is_empty() {
                MicState::Idle
            } else {
                MicState::Paused
            };
            self.set_mic(next);
        }

        if self.halted || !self.pause_reasons.is_empty() {
            return;
        }

        self.schedule_auto_restart(now);
    }

    fn on_error(&mut self, kind: EngineErrorKind, now: Instant) {
        if kind == EngineErrorKind::InvalidState {
            debug!("engine reported invalid state, ignoring");
            return;
        }

        let _ = self.event_tx.send(AssistantEvent::CaptureError { kind });

        if kind.is_permission() {
            warn!(%kind, "recognition not permitted, pausing until explicitly resumed");
            self.record_error(kind, now);
            self.pause(PauseReason::Error, now);
            return;
        }

        if !kind.counts_as_failure() {
            debug!(%kind, "benign recognition error");
            return;
        }

        self.record_error(kind, now);
        warn!(%kind, consecutive = self.consecutive_errors, "recognition error");

        let threshold = self.timings.reinit_after_errors.max(1);
        if self.consecutive_errors % threshold == 0 {
            self.reinitialize(now);
        }
    }

    fn record_error(&mut self, kind: EngineErrorKind, now: Instant) {
        self.last_error = Some((kind, now));
        self.stable_at = None;
        if kind.counts_as_failure() {
            self.consecutive_errors += 1;
        }
    }

    /// Replace the handle with a freshly built one
    fn reinitialize(&mut self, now: Instant) {
        let Some(factory) = self.factory.as_mut() else {
            debug!("no session factory, continuing with current handle");
            return;
        };

        match factory.create() {
            Ok(session) => {
                warn!(
                    errors = self.consecutive_errors,
                    "rebuilding recognition session after repeated errors"
                );
                self.initialize(session);
                let _ = self.event_tx.send(AssistantEvent::SessionReinitialized {
                    session: self.session_id,
                });
                // The retired handle's `Ended` will never arrive
                if !self.halted && self.pause_reasons.is_empty() {
                    if self.mic_state != MicState::Idle {
                        self.set_mic(MicState::Idle);
                    }
                    self.schedule_auto_restart(now);
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to rebuild recognition session");
            }
        }
    }

    fn schedule_auto_restart(&mut self, now: Instant) {
        let delay = self.next_restart_delay();
        self.schedule_restart(now, delay);
        let _ = self.event_tx.send(AssistantEvent::RestartScheduled {
            delay_ms: delay.as_millis() as u64,
            consecutive_errors: self.consecutive_errors,
        });
    }

    fn schedule_restart(&mut self, now: Instant, delay: Duration) {
        let at = now + delay;
        self.restart_at = Some(at);
        self.watchdog_at = Some(at + self.timings.watchdog());
        debug!(delay_ms = delay.as_millis() as u64, "capture restart scheduled");
    }

    /// The first restart after an error waits the base delay; each further
    /// consecutive error multiplies it by `backoff_factor`. Capped, and never
    /// shrinks while the error streak lasts.
    fn next_restart_delay(&mut self) -> Duration {
        let aborted = matches!(self.last_error, Some((EngineErrorKind::Aborted, _)));
        let base_ms = if self.consecutive_errors > 0 && aborted {
            self.timings.aborted_restart_base_ms
        } else {
            self.timings.restart_base_ms
        };

        let steps = self.consecutive_errors.saturating_sub(1) as i32;
        let grown = base_ms as f64 * self.timings.backoff_factor.powi(steps);
        let mut delay = Duration::from_millis(grown.round() as u64);

        if self.consecutive_errors > 0 {
            if let Some(previous) = self.last_restart_delay {
                delay = delay.max(previous);
            }
        }

        let delay = delay.min(self.timings.max_restart_delay());
        self.last_restart_delay = Some(delay);
        delay
    }

    fn arm_watchdog(&mut self, now: Instant) {
        self.watchdog_at = Some(now + self.timings.watchdog());
    }

    fn is_blocked(&self) -> bool {
        if self.halted || self.mic_state == MicState::Listening {
            return false;
        }
        if self.pause_reasons.iter().any(|r| r.is_deliberate()) {
            return false;
        }
        !self.pause_reasons.is_empty() || self.restart_at.is_some() || self.is_starting
    }

    fn on_watchdog(&mut self, now: Instant) {
        if !self.is_blocked() {
            return;
        }

        let cleared: Vec<PauseReason> = self.pause_reasons.iter().copied().collect();
        warn!(?cleared, starting = self.is_starting, "capture watchdog fired, forcing recovery");
        let _ = self.event_tx.send(AssistantEvent::WatchdogFired {
            cleared: cleared.clone(),
        });

        self.pause_reasons.clear();
        self.is_starting = false;
        self.restart_at = None;
        self.last_start_at = None;
        self.set_mic(MicState::Idle);
        self.start("watchdog", now);
    }

    fn set_mic(&mut self, next: MicState) {
        let previous = self.mic_state;
        if previous == next {
            return;
        }

        self.mic_state = next;
        info!(from = %previous, to = %next, "mic state transition");
        let _ = self.event_tx.send(AssistantEvent::MicStateChanged {
            from: previous,
            to: next,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::session::EngineError;
    use std::sync::{Arc, Mutex};

    /// Records engine calls and optionally fails `start`
    #[derive(Clone, Default)]
    pub(crate) struct Probe {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub start_error: Arc<Mutex<Option<EngineErrorKind>>>,
    }

    impl Probe {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == call).count()
        }

        pub fn fail_start_with(&self, kind: Option<EngineErrorKind>) {
            *self.start_error.lock().unwrap() = kind;
        }
    }

    pub(crate) struct FakeSession {
        pub name: &'static str,
        pub probe: Probe,
    }

    impl FakeSession {
        fn record(&self, call: &str) {
            self.probe
                .calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, call));
        }
    }

    impl RecognitionSession for FakeSession {
        fn attach(&mut self, _sink: CaptureSink) {
            self.record("attach");
        }

        fn detach(&mut self) {
            self.record("detach");
        }

        fn start(&mut self) -> Result<(), EngineError> {
            self.record("start");
            match *self.probe.start_error.lock().unwrap() {
                Some(kind) => Err(EngineError::new(kind, "refused")),
                None => Ok(()),
            }
        }

        fn stop(&mut self) {
            self.record("stop");
        }

        fn abort(&mut self) {
            self.record("abort");
        }
    }

    struct FakeFactory {
        probe: Probe,
        built: Arc<Mutex<u32>>,
    }

    impl SessionFactory for FakeFactory {
        fn create(&mut self) -> Result<Box<dyn RecognitionSession>, EngineError> {
            *self.built.lock().unwrap() += 1;
            Ok(Box::new(FakeSession {
                name: "fresh",
                probe: self.probe.clone(),
            }))
        }
    }

    pub(crate) fn controller() -> (CaptureController, Probe) {
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        let mut controller = CaptureController::new(CaptureTimings::default(), signal_tx, event_tx);
        let probe = Probe::default();
        controller.initialize(Box::new(FakeSession {
            name: "main",
            probe: probe.clone(),
        }));
        (controller, probe)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Start and confirm, leaving the controller listening
    pub(crate) fn listening(controller: &mut CaptureController, now: Instant) {
        assert_eq!(controller.start("test", now), StartOutcome::Requested);
        let id = controller.session_id();
        controller.handle_signal(id, CaptureSignal::Started, now);
        assert_eq!(controller.mic_state(), MicState::Listening);
    }

    fn assert_invariant(controller: &CaptureController) {
        if controller.mic_state() == MicState::Listening {
            assert!(controller.pause_reasons().is_empty());
            assert!(!controller.is_starting());
        }
    }

    #[test]
    fn test_start_then_started_enters_listening() {
        let (mut c, probe) = controller();
        let t0 = Instant::now();

        assert_eq!(c.start("test", t0), StartOutcome::Requested);
        assert!(c.is_starting());
        assert_eq!(c.mic_state(), MicState::Idle);
        assert_eq!(c.start("again", t0), StartOutcome::AlreadyActive);

        c.handle_signal(c.session_id(), CaptureSignal::Started, t0);
        assert_eq!(c.mic_state(), MicState::Listening);
        assert!(!c.is_starting());
        assert_eq!(probe.count("main:start"), 1);
    }

    #[test]
    fn test_pause_aborts_and_blocks_start() {
        let (mut c, probe) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        assert!(c.pause(PauseReason::SpeakingOutput, t0));
        assert!(!c.pause(PauseReason::SpeakingOutput, t0));
        assert_eq!(c.mic_state(), MicState::Paused);
        assert_eq!(probe.count("main:abort"), 1);

        assert_eq!(c.start("test", t0 + ms(5_000)), StartOutcome::Blocked);
    }

    #[test]
    fn test_resume_requires_matching_pause() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        c.pause(PauseReason::SpeakingOutput, t0);
        c.pause(PauseReason::BiometricCapture, t0);

        assert!(!c.resume(PauseReason::PinEntry, t0 + ms(2_000)));
        assert!(c.resume(PauseReason::SpeakingOutput, t0 + ms(2_000)));
        assert_eq!(c.mic_state(), MicState::Paused);
        assert!(!c.resume(PauseReason::SpeakingOutput, t0 + ms(2_000)));

        assert!(c.resume(PauseReason::BiometricCapture, t0 + ms(2_000)));
        assert!(c.pause_reasons().is_empty());
        assert!(c.is_starting());
    }

    #[test]
    fn test_start_too_soon_is_deferred() {
        let (mut c, probe) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);
        c.handle_signal(c.session_id(), CaptureSignal::Ended, t0 + ms(200));

        // auto-restart was scheduled; a manual start inside the interval waits
        assert_eq!(c.start("manual", t0 + ms(300)), StartOutcome::Deferred(ms(700)));
        assert_eq!(c.pending_restart(), Some(t0 + ms(1_000)));

        c.on_tick(t0 + ms(1_000));
        assert!(c.is_starting());
        assert_eq!(probe.count("main:start"), 2);
    }

    #[test]
    fn test_aborted_cooldown_defers_start() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        c.handle_signal(c.session_id(), CaptureSignal::Error(EngineErrorKind::Aborted), t0 + ms(2_000));
        c.handle_signal(c.session_id(), CaptureSignal::Ended, t0 + ms(2_000));

        assert_eq!(
            c.start("manual", t0 + ms(3_000)),
            StartOutcome::Deferred(ms(3_000))
        );
        assert_eq!(c.pending_restart(), Some(t0 + ms(6_000)));
    }

    #[test]
    fn test_invalid_state_on_start_counts_as_listening() {
        let (mut c, probe) = controller();
        probe.fail_start_with(Some(EngineErrorKind::InvalidState));

        assert_eq!(c.start("test", Instant::now()), StartOutcome::AlreadyActive);
        assert_eq!(c.mic_state(), MicState::Listening);
        assert_eq!(c.consecutive_errors(), 0);
    }

    #[test]
    fn test_plain_end_restarts_after_base_delay() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        c.handle_signal(c.session_id(), CaptureSignal::Ended, t0 + ms(3_000));
        assert_eq!(c.mic_state(), MicState::Idle);
        assert_eq!(c.last_restart_delay(), Some(ms(1_000)));
        assert_eq!(c.pending_restart(), Some(t0 + ms(4_000)));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let (mut c, _) = controller();
        let mut now = Instant::now();
        let mut delays = Vec::new();

        for i in 0..10 {
            let kind = if i % 2 == 0 {
                EngineErrorKind::Aborted
            } else {
                EngineErrorKind::Network
            };
            assert_eq!(c.start("test", now), StartOutcome::Requested, "attempt {i}");
            let id = c.session_id();
            c.handle_signal(id, CaptureSignal::Started, now);
            c.handle_signal(id, CaptureSignal::Error(kind), now + ms(100));
            c.handle_signal(id, CaptureSignal::Ended, now + ms(100));

            let delay = c.last_restart_delay().unwrap();
            delays.push(delay);

            // restart fires well past the aborted cooldown and start interval
            now = c.pending_restart().unwrap().max(now + ms(5_000));
        }

        assert_eq!(delays[0], ms(3_000));
        // a network error after an aborted one keeps the larger delay
        assert_eq!(delays[1], ms(3_000));
        assert_eq!(delays[2], ms(9_720));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays shrank: {:?}", delays);
        }
        assert!(delays.iter().all(|d| *d <= ms(15_000)));
        assert_eq!(*delays.last().unwrap(), ms(15_000));
    }

    #[test]
    fn test_first_error_restarts_after_unscaled_base() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);
        let id = c.session_id();

        c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::Network), t0 + ms(100));
        c.handle_signal(id, CaptureSignal::Ended, t0 + ms(100));
        assert_eq!(c.consecutive_errors(), 1);
        assert_eq!(c.last_restart_delay(), Some(ms(1_000)));

        let (mut c, _) = controller();
        listening(&mut c, t0);
        let id = c.session_id();

        c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::Aborted), t0 + ms(100));
        c.handle_signal(id, CaptureSignal::Ended, t0 + ms(100));
        assert_eq!(c.last_restart_delay(), Some(ms(3_000)));
        assert_eq!(c.pending_restart(), Some(t0 + ms(3_100)));
    }

    #[test]
    fn test_stable_period_resets_error_count() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);
        let id = c.session_id();

        c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::Network), t0 + ms(100));
        c.handle_signal(id, CaptureSignal::Ended, t0 + ms(100));
        assert_eq!(c.consecutive_errors(), 1);

        let restart = c.pending_restart().unwrap();
        c.on_tick(restart);
        c.handle_signal(id, CaptureSignal::Started, restart);

        c.on_tick(restart + ms(7_999));
        assert_eq!(c.consecutive_errors(), 1);
        c.on_tick(restart + ms(8_000));
        assert_eq!(c.consecutive_errors(), 0);
    }

    #[test]
    fn test_permission_error_is_a_permanent_pause() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);
        let id = c.session_id();

        c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::NotAllowed), t0);
        c.handle_signal(id, CaptureSignal::Ended, t0);

        assert_eq!(c.mic_state(), MicState::Paused);
        assert!(c.pause_reasons().contains(&PauseReason::Error));
        assert_eq!(c.pending_restart(), None);

        // the watchdog does not override a deliberate hold
        c.on_tick(t0 + ms(60_000));
        assert!(c.pause_reasons().contains(&PauseReason::Error));

        assert!(c.resume(PauseReason::Error, t0 + ms(61_000)));
        assert!(c.is_starting());
    }

    #[test]
    fn test_repeated_errors_rebuild_session() {
        let (mut c, probe) = controller();
        let built = Arc::new(Mutex::new(0));
        c.set_factory(Box::new(FakeFactory {
            probe: probe.clone(),
            built: built.clone(),
        }));

        let mut now = Instant::now();
        for _ in 0..3 {
            let id = c.session_id();
            assert_eq!(c.start("test", now), StartOutcome::Requested);
            c.handle_signal(id, CaptureSignal::Started, now);
            c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::Network), now);
            c.handle_signal(id, CaptureSignal::Ended, now);
            now = c.pending_restart().unwrap() + ms(1);
        }

        assert_eq!(*built.lock().unwrap(), 1);
        assert!(probe.calls().contains(&"main:detach".to_string()));
        assert!(probe.calls().contains(&"main:stop".to_string()));
        assert!(probe.calls().contains(&"fresh:attach".to_string()));
        assert_eq!(c.session_id(), 2);

        // late callbacks from the retired handle are ignored
        assert_eq!(
            c.handle_signal(1, CaptureSignal::Result { text: "hello".into(), is_final: true }, now),
            None
        );

        c.on_tick(now);
        assert!(probe.calls().contains(&"fresh:start".to_string()));
    }

    #[test]
    fn test_watchdog_clears_stuck_pause() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        c.pause(PauseReason::SpeakingOutput, t0 + ms(1_000));
        assert_eq!(c.next_deadline(), Some(t0 + ms(13_000)));

        c.on_tick(t0 + ms(13_000));
        assert!(c.pause_reasons().is_empty());
        assert!(c.is_starting());
    }

    #[test]
    fn test_stop_is_terminal() {
        let (mut c, probe) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);

        c.stop();
        c.handle_signal(c.session_id(), CaptureSignal::Ended, t0);
        assert_eq!(c.mic_state(), MicState::Idle);
        assert_eq!(c.pending_restart(), None);

        c.pause(PauseReason::PinEntry, t0);
        c.resume(PauseReason::PinEntry, t0 + ms(5_000));
        assert_eq!(probe.count("main:start"), 1);

        assert_eq!(c.start("test", t0 + ms(5_000)), StartOutcome::Requested);
    }

    #[test]
    fn test_force_unlock_clears_everything() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        listening(&mut c, t0);
        c.pause(PauseReason::Error, t0);
        c.pause(PauseReason::SessionExit, t0);

        assert_eq!(c.force_unlock(t0 + ms(2_000)), StartOutcome::Requested);
        assert!(c.pause_reasons().is_empty());
    }

    #[test]
    fn test_listening_never_coexists_with_pause_reasons() {
        let (mut c, _) = controller();
        let reasons = [
            PauseReason::SpeakingOutput,
            PauseReason::BiometricCapture,
            PauseReason::PinEntry,
        ];
        let mut now = Instant::now();
        let mut seed: u32 = 17;

        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let pick = (seed >> 16) as usize;
            now += ms((pick % 1_500) as u64);
            let id = c.session_id();

            match pick % 7 {
                0 => {
                    c.start("fuzz", now);
                }
                1 => {
                    c.pause(reasons[pick % 3], now);
                }
                2 => {
                    c.resume(reasons[pick % 3], now);
                }
                3 => {
                    c.handle_signal(id, CaptureSignal::Started, now);
                }
                4 => {
                    c.handle_signal(id, CaptureSignal::Ended, now);
                }
                5 => {
                    c.handle_signal(id, CaptureSignal::Error(EngineErrorKind::Network), now);
                }
                _ => c.on_tick(now),
            }

            assert_invariant(&c);
        }
    }
}
