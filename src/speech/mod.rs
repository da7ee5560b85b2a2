//! Speech service
//!
//! One task owns the capture controller and the output coordinator. Other
//! components talk to it only through a `SpeechHandle`, so every mutation
//! of capture state is funneled through a single command channel.

mod service;

use tokio::sync::mpsc;
use tracing::debug;

use crate::capture::PauseReason;
use crate::output::SpeakOptions;

pub use service::SpeechService;

/// Requests accepted by the speech service
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechCommand {
    Speak { text: String, options: SpeakOptions },
    Interrupt { resume_capture: bool },
    WarmUp,
    Pause(PauseReason),
    Resume(PauseReason),
    StartCapture,
    StopCapture,
    ForceUnlock,
}

/// Cloneable sender side of the speech service
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    tx: mpsc::UnboundedSender<SpeechCommand>,
}

impl SpeechHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SpeechCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: SpeechCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(command = ?e.0, "speech service gone, command dropped");
                false
            }
        }
    }

    /// Speak a reply, cutting off anything still playing
    pub fn say(&self, text: impl Into<String>) -> bool {
        self.speak(text, SpeakOptions::interrupting())
    }

    pub fn speak(&self, text: impl Into<String>, options: SpeakOptions) -> bool {
        self.send(SpeechCommand::Speak {
            text: text.into(),
            options,
        })
    }

    pub fn interrupt(&self, resume_capture: bool) -> bool {
        self.send(SpeechCommand::Interrupt { resume_capture })
    }

    pub fn warm_up(&self) -> bool {
        self.send(SpeechCommand::WarmUp)
    }

    pub fn pause_capture(&self, reason: PauseReason) -> bool {
        self.send(SpeechCommand::Pause(reason))
    }

    pub fn resume_capture(&self, reason: PauseReason) -> bool {
        self.send(SpeechCommand::Resume(reason))
    }

    pub fn start_capture(&self) -> bool {
        self.send(SpeechCommand::StartCapture)
    }

    pub fn stop_capture(&self) -> bool {
        self.send(SpeechCommand::StopCapture)
    }

    pub fn force_unlock(&self) -> bool {
        self.send(SpeechCommand::ForceUnlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_say_interrupts_previous() {
        let (handle, mut rx) = SpeechHandle::channel();
        assert!(handle.say("hello"));
        assert_eq!(
            rx.try_recv().unwrap(),
            SpeechCommand::Speak {
                text: "hello".into(),
                options: SpeakOptions::interrupting(),
            }
        );
    }

    #[test]
    fn test_send_after_service_gone() {
        let (handle, rx) = SpeechHandle::channel();
        drop(rx);
        assert!(!handle.pause_capture(PauseReason::PinEntry));
    }
}
