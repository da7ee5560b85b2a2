//! Line-based recognition engine
//!
//! Each line read from the terminal is one final transcript. Lines only
//! reach the controller while the bound session is started, just as a
//! microphone hears nothing while recognition is paused.

use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::capture::{
    CaptureSignal, CaptureSink, EngineError, EngineErrorKind, RecognitionSession, SessionFactory,
    SessionId,
};

#[derive(Default)]
struct FeedState {
    sink: Option<CaptureSink>,
    listening: bool,
}

/// Shared input line feed; every session built from it reads the same lines
#[derive(Clone, Default)]
pub struct ConsoleFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ConsoleFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read stdin on a dedicated thread until EOF
    pub fn spawn_stdin(&self) -> std::io::Result<()> {
        let feed = self.clone();
        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                info!("console input thread started");
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            feed.deliver(&line);
                        }
                        Err(e) => {
                            warn!(?e, "console input error");
                            break;
                        }
                    }
                }
                info!("console input closed");
            })?;
        Ok(())
    }

    /// Hand a line to the bound session. Returns whether it was heard.
    pub fn deliver(&self, line: &str) -> bool {
        let text = line.trim();
        if text.is_empty() {
            return false;
        }

        let state = self.lock();
        match (&state.sink, state.listening) {
            (Some(sink), true) => sink.emit(CaptureSignal::Result {
                text: text.to_string(),
                is_final: true,
            }),
            _ => {
                info!("not listening, input dropped");
                false
            }
        }
    }

    pub fn factory(&self) -> ConsoleFactory {
        ConsoleFactory { feed: self.clone() }
    }
}

/// One recognition handle over the shared feed
pub struct ConsoleSession {
    feed: ConsoleFeed,
    session: Option<SessionId>,
}

impl ConsoleSession {
    /// Run `f` only if this handle still owns the feed
    fn with_owned<R>(&self, f: impl FnOnce(&mut FeedState) -> R) -> Option<R> {
        let mut state = self.feed.lock();
        let owned = self.session.is_some()
            && state.sink.as_ref().map(CaptureSink::session) == self.session;
        owned.then(|| f(&mut *state))
    }

    fn end(&mut self) {
        self.with_owned(|state| {
            if state.listening {
                state.listening = false;
                if let Some(sink) = &state.sink {
                    sink.emit(CaptureSignal::Ended);
                }
            }
        });
    }
}

impl RecognitionSession for ConsoleSession {
    fn attach(&mut self, sink: CaptureSink) {
        self.session = Some(sink.session());
        let mut state = self.feed.lock();
        state.sink = Some(sink);
        state.listening = false;
    }

    fn detach(&mut self) {
        self.with_owned(|state| {
            state.sink = None;
            state.listening = false;
        });
        self.session = None;
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let started = self.with_owned(|state| {
            if state.listening {
                return Err(EngineError::new(EngineErrorKind::InvalidState, "already started"));
            }
            state.listening = true;
            if let Some(sink) = &state.sink {
                sink.emit(CaptureSignal::Started);
            }
            Ok(())
        });

        match started {
            Some(result) => result,
            None => Err(EngineError::new(EngineErrorKind::Other, "session is not attached")),
        }
    }

    fn stop(&mut self) {
        self.end();
    }

    fn abort(&mut self) {
        self.end();
    }
}

pub struct ConsoleFactory {
    feed: ConsoleFeed,
}

impl SessionFactory for ConsoleFactory {
    fn create(&mut self) -> Result<Box<dyn RecognitionSession>, EngineError> {
        debug!("creating console recognition session");
        Ok(Box::new(ConsoleSession {
            feed: self.feed.clone(),
            session: None,
        }))
    }
}
