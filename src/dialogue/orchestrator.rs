//! Dialogue orchestrator
//!
//! Owns `DialogueState` and decides what each transcript means. Auth text
//! goes straight to the auth step handler, compose text to the compose step
//! handler; everything else is checked for global commands and then
//! classified. Handler failures never escape: they reset the dialogue.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::capture::PauseReason;
use crate::collaborators::{CollaboratorError, Collaborators, ExecutionResult, ResultData};
use crate::config::DialogueConfig;
use crate::events::AssistantEvent;
use crate::intent::{Action, Destination, IntentClassifier, Platform, ResolvedIntent};
use crate::speech::SpeechHandle;

use super::spoken::{self, GlobalCommand};
use super::state::{
    AssistantState, AuthMode, AuthState, AuthStep, ComposeState, ComposeStep, DialogueState, Role,
    VoiceRoutingMode,
};

const HELP: &str = "You can say log in, register, open inbox, summarize, read my email, \
                    open chat with someone, send a message, or go to sleep.";

/// Inputs accepted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueInput {
    /// A final transcript from capture or the operator socket
    Transcript(String),
    /// The surface switched to a platform view, or left one
    ViewChanged(Option<Platform>),
    Reset,
}

/// Broken sub-flow invariants; always answered with a full reset
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("{0} is missing")]
    MissingField(&'static str),

    #[error("{flow} flow has no handler for step {step}")]
    UnexpectedStep { flow: &'static str, step: String },
}

pub struct Orchestrator {
    pub(super) config: DialogueConfig,
    pub(super) state: DialogueState,
    classifier: IntentClassifier,
    pub(super) collaborators: Collaborators,
    speech: SpeechHandle,
    /// Pause reasons this orchestrator currently holds on capture
    held: BTreeSet<PauseReason>,
    event_tx: broadcast::Sender<AssistantEvent>,
}

impl Orchestrator {
    pub fn new(
        config: DialogueConfig,
        collaborators: Collaborators,
        speech: SpeechHandle,
        event_tx: broadcast::Sender<AssistantEvent>,
    ) -> Self {
        let state = DialogueState::new(config.reset_state.into(), config.transcript_log_limit);
        Self {
            config,
            state,
            classifier: IntentClassifier::new(),
            collaborators,
            speech,
            held: BTreeSet::new(),
            event_tx,
        }
    }

    pub fn state(&self) -> &DialogueState {
        &self.state
    }

    /// Process inputs until the inbox closes.
    ///
    /// While a handler awaits a collaborator the inbox keeps being read: a
    /// global command drops the pending handler and runs instead, anything
    /// else is queued and handled afterwards in arrival order.
    pub async fn run(&mut self, mut inbox: mpsc::UnboundedReceiver<DialogueInput>) {
        info!(state = %self.state.assistant_state, "dialogue orchestrator started");
        let mut backlog: VecDeque<DialogueInput> = VecDeque::new();
        let mut closed = false;

        loop {
            let input = match backlog.pop_front() {
                Some(input) => input,
                None if closed => break,
                None => match inbox.recv().await {
                    Some(input) => input,
                    None => break,
                },
            };

            let preempted = {
                let handling = self.handle_input(input);
                tokio::pin!(handling);

                loop {
                    tokio::select! {
                        biased;
                        _ = &mut handling => break None,
                        next = inbox.recv(), if !closed => match next {
                            Some(DialogueInput::Transcript(text)) if spoken::global_command(&text).is_some() => {
                                break Some(text);
                            }
                            Some(other) => backlog.push_back(other),
                            None => closed = true,
                        },
                    }
                }
            };

            if let Some(text) = preempted {
                info!("pending handler preempted by global command");
                self.handle_transcript(&text).await;
            }
        }

        info!("dialogue orchestrator stopped");
    }

    async fn handle_input(&mut self, input: DialogueInput) {
        match input {
            DialogueInput::Transcript(text) => self.handle_transcript(&text).await,
            DialogueInput::ViewChanged(platform) => {
                self.set_view(platform);
                let view = platform.map(|p| p.to_string()).unwrap_or_else(|| "none".into());
                self.record(Role::System, &format!("view changed: {}", view));
            }
            DialogueInput::Reset => {
                self.reset();
                self.record(Role::System, "dialogue reset");
            }
        }
    }

    /// Handle one final transcript end to end
    pub async fn handle_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.expects_secret() {
            self.record(Role::User, "[redacted]");
        } else {
            debug!(text, "transcript received");
            self.record(Role::User, text);
        }

        if let Err(e) = self.route_transcript(text).await {
            self.recover(e);
        }
    }

    async fn route_transcript(&mut self, text: &str) -> Result<(), DialogueError> {
        if self.state.assistant_state == AssistantState::Dormant {
            if spoken::contains_wake_phrase(text, &self.config.wake_words) {
                self.wake();
            } else {
                debug!("dormant, utterance ignored");
            }
            return Ok(());
        }

        if self.state.auth.is_active() {
            return self.handle_auth(text).await;
        }

        if self.state.routing == VoiceRoutingMode::ComposeFlow {
            return self.handle_compose(text).await;
        }

        if let Some(command) = spoken::global_command(text) {
            return self.apply_global(command).await;
        }

        let intent = self.classifier.classify(text);
        self.handle_intent(intent).await
    }

    pub(super) async fn apply_global(&mut self, command: GlobalCommand) -> Result<(), DialogueError> {
        info!(?command, "global command");
        match command {
            // Sleeping mid sign-in abandons the flow but stays awake
            GlobalCommand::Cancel | GlobalCommand::Sleep if self.state.auth.is_active() => {
                self.reset();
                self.say("Okay, cancelled.");
            }
            GlobalCommand::Cancel if self.state.routing == VoiceRoutingMode::ComposeFlow => {
                self.close_compose();
                self.say("Okay, I discarded the draft.");
            }
            GlobalCommand::Cancel => {
                self.speech.interrupt(true);
            }
            GlobalCommand::Sleep => self.sleep(),
            GlobalCommand::Logout => self.logout(),
        }
        Ok(())
    }

    async fn handle_intent(&mut self, intent: ResolvedIntent) -> Result<(), DialogueError> {
        match intent.action {
            Action::Wake => self.say("I'm already listening."),
            Action::Sleep => return self.apply_global(GlobalCommand::Sleep).await,
            Action::Cancel => return self.apply_global(GlobalCommand::Cancel).await,
            Action::Logout => return self.apply_global(GlobalCommand::Logout).await,
            Action::Help => self.say(HELP),
            Action::Login | Action::Register => match self.state.user.clone() {
                Some(user) => self.say(format!("You're already signed in as {}.", user.email)),
                None if intent.action == Action::Login => self.begin_auth(AuthMode::Login),
                None => self.begin_auth(AuthMode::Register),
            },
            Action::Unknown => self.say("Sorry, I didn't catch that. Say help to hear what I can do."),
            _ => self.handle_platform_intent(intent).await,
        }
        Ok(())
    }

    /// Point ambiguous common actions at the platform in view, or the last
    /// one used. Returns whether the destination changed.
    pub(super) fn reroute(&self, intent: &mut ResolvedIntent) -> bool {
        if !intent.action.is_common() || intent.explicit_destination {
            return false;
        }

        let Some(platform) = self.state.contextual_platform() else {
            return false;
        };

        let target = Destination::from(platform);
        if intent.destination == target {
            return false;
        }

        info!(action = ?intent.action, from = ?intent.destination, to = ?target, "contextual re-route");
        intent.destination = target;
        true
    }

    async fn handle_platform_intent(&mut self, mut intent: ResolvedIntent) {
        self.reroute(&mut intent);

        let Some(platform) = intent.destination.platform() else {
            self.say("Which app do you mean? Try saying it with email or Telegram.");
            return;
        };

        if self.config.require_auth_for_platforms && !self.state.is_authenticated() {
            self.say("Please sign in first. Say log in to start.");
            return;
        }

        self.execute_platform_intent(platform, intent).await;
    }

    async fn execute_platform_intent(&mut self, platform: Platform, intent: ResolvedIntent) {
        let Some(executor) = self.collaborators.executor(platform) else {
            self.say(format!("{} isn't connected right now.", platform));
            return;
        };

        match self.bounded("platform executor", executor.execute(&intent)).await {
            Ok(result) => self.apply_execution_result(platform, result),
            Err(e) => {
                warn!(%platform, error = %e, "platform command failed");
                self.say(format!("Sorry, I couldn't reach {} just now.", platform));
            }
        }
    }

    pub(super) fn apply_execution_result(&mut self, platform: Platform, result: ExecutionResult) {
        if !result.success {
            let message = if result.message.is_empty() {
                "Sorry, that didn't work.".to_string()
            } else {
                result.message
            };
            self.say(message);
            return;
        }

        self.state.last_used_platform = Some(platform);
        let message = result.message;

        match result.data {
            Some(ResultData::OpenCompose { recipient }) => {
                self.open_compose(platform, &message, recipient, None, None, None);
            }
            Some(ResultData::OpenComposeWithPrefill {
                recipient,
                subject,
                body,
                chat_id,
            }) => {
                self.open_compose(platform, &message, recipient, subject, body, chat_id);
            }
            Some(ResultData::NavigateToConversation { chat_id, title }) => {
                self.set_view(Some(platform));
                debug!(chat_id, ?title, "conversation opened");
                self.state.open_conversation = Some(chat_id);
                self.say(message);
            }
            Some(ResultData::NavigateToList { folder }) => {
                self.set_view(Some(platform));
                debug!(folder, "list opened");
                self.state.open_conversation = None;
                self.say(message);
            }
            Some(ResultData::CloseConversation) => {
                self.state.open_conversation = None;
                self.say(message);
            }
            Some(ResultData::SummaryReady { summary }) => {
                self.state.summary = Some(summary.clone());
                self.say(format!("{} {}", message, summary).trim().to_string());
            }
            None => self.say(message),
        }
    }

    /// Run a collaborator call under the configured deadline
    pub(super) async fn bounded<T>(
        &self,
        service: &'static str,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        let limit = self.config.collaborator_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                service,
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    fn wake(&mut self) {
        let settled = if self.state.is_authenticated() {
            AssistantState::Authenticated
        } else {
            AssistantState::Listening
        };
        self.set_state(AssistantState::Awake);
        self.speech.warm_up();
        self.say("I'm listening.");
        self.set_state(settled);
    }

    fn sleep(&mut self) {
        self.clear_subflows();
        self.set_state(AssistantState::Dormant);
        let hint = self
            .config
            .wake_words
            .first()
            .map(|w| format!(" Say {} when you need me.", w))
            .unwrap_or_default();
        self.say(format!("Going to sleep.{}", hint));
    }

    /// Sign out locally in one step; the account service is told afterwards
    /// so a preempting command can never interrupt a half-done logout.
    fn logout(&mut self) {
        self.hold(PauseReason::SessionExit);

        let user = self.state.user.clone();
        self.reset();

        match user {
            Some(user) => {
                self.end_remote_session(user.email);
                self.say("You're signed out.");
            }
            None => self.say("Nobody is signed in."),
        }
    }

    fn end_remote_session(&self, email: String) {
        let accounts = self.collaborators.accounts.clone();
        let limit = self.config.collaborator_timeout();
        tokio::spawn(async move {
            match tokio::time::timeout(limit, accounts.end_session(&email)).await {
                Ok(Ok(())) => debug!("remote session ended"),
                Ok(Err(e)) => warn!(error = %e, "failed to end session remotely"),
                Err(_) => warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "account service did not end the session in time"
                ),
            }
        });
    }

    /// Return every piece of dialogue state to its initial value and
    /// release any capture pause this orchestrator holds. `SessionExit` is
    /// released even when someone else took it.
    pub fn reset(&mut self) {
        info!("dialogue reset");
        self.held.remove(&PauseReason::SessionExit);
        self.clear_subflows();
        self.speech.resume_capture(PauseReason::SessionExit);
        self.state.user = None;
        self.state.last_used_platform = None;
        self.state.open_conversation = None;
        self.state.summary = None;
        self.set_state(self.config.reset_state.into());
    }

    fn clear_subflows(&mut self) {
        if self.state.auth != AuthState::default() {
            self.state.auth = AuthState::default();
            self.emit_auth_step();
        }
        if self.state.compose != ComposeState::default() {
            self.set_compose_step(ComposeStep::Idle);
            self.state.compose = ComposeState::default();
        }
        self.state.routing = VoiceRoutingMode::Global;
        self.release_all();
    }

    fn recover(&mut self, error: DialogueError) {
        warn!(error = %error, "dialogue handler failed, resetting");
        self.reset();
        self.say("Sorry, something went wrong, so I've started over.");
    }

    pub(super) fn set_view(&mut self, platform: Option<Platform>) {
        if self.state.active_platform != platform {
            debug!(?platform, "active view changed");
        }
        self.state.active_platform = platform;
        if self.state.routing != VoiceRoutingMode::ComposeFlow {
            self.state.routing = match platform {
                Some(_) => VoiceRoutingMode::PlatformCommand,
                None => VoiceRoutingMode::Global,
            };
        }
    }

    /// Whether the next utterance is a password or PIN
    fn expects_secret(&self) -> bool {
        self.state.auth.is_active()
            && matches!(self.state.auth.step, AuthStep::Password | AuthStep::Pin | AuthStep::ConfirmPin)
    }

    pub(super) fn set_state(&mut self, to: AssistantState) {
        let from = self.state.assistant_state;
        if from == to {
            return;
        }

        info!(from = %from, to = %to, "assistant state transition");
        self.state.assistant_state = to;
        let _ = self.event_tx.send(AssistantEvent::AssistantStateChanged { from, to });
    }

    pub(super) fn set_compose_step(&mut self, to: ComposeStep) {
        let from = self.state.compose.step;
        if from == to {
            return;
        }

        debug!(?from, ?to, "compose step");
        self.state.compose.step = to;
        let _ = self.event_tx.send(AssistantEvent::ComposeStepChanged { from, to });
    }

    pub(super) fn emit_auth_step(&self) {
        let _ = self.event_tx.send(AssistantEvent::AuthStepChanged {
            mode: self.state.auth.mode,
            step: self.state.auth.step,
        });
    }

    pub(super) fn hold(&mut self, reason: PauseReason) {
        if self.held.insert(reason) {
            self.speech.pause_capture(reason);
        }
    }

    pub(super) fn release(&mut self, reason: PauseReason) {
        if self.held.remove(&reason) {
            self.speech.resume_capture(reason);
        }
    }

    fn release_all(&mut self) {
        for reason in std::mem::take(&mut self.held) {
            self.speech.resume_capture(reason);
        }
    }

    /// Speak a reply and log it
    pub(super) fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.record(Role::Assistant, &text);
        self.speech.say(text);
    }

    fn record(&mut self, role: Role, text: &str) {
        self.state.transcript.push(role, text);
        let _ = self.event_tx.send(AssistantEvent::TranscriptAppended {
            role,
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{
        AccountService, BiometricVerifier, InMemoryAccounts, OfflineExecutor, PatternSanitizer, StaticBiometrics,
        TemplateDrafter,
    };
    use crate::speech::SpeechCommand;
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) struct Harness {
        pub orchestrator: Orchestrator,
        pub speech_rx: mpsc::UnboundedReceiver<SpeechCommand>,
        pub mail: Arc<OfflineExecutor>,
        pub telegram: Arc<OfflineExecutor>,
        pub accounts: Arc<InMemoryAccounts>,
    }

    impl Harness {
        /// Platform commands allowed without signing in
        pub fn new() -> Self {
            let config = DialogueConfig {
                require_auth_for_platforms: false,
                ..DialogueConfig::default()
            };
            Self::with(config, Arc::new(StaticBiometrics::live()))
        }

        pub fn with(config: DialogueConfig, biometrics: Arc<dyn BiometricVerifier>) -> Self {
            let accounts = Arc::new(InMemoryAccounts::default());
            Self::assemble(config, biometrics, accounts.clone(), accounts)
        }

        /// `service` is what the orchestrator calls; `accounts` is the
        /// directory behind it that tests inspect
        pub fn assemble(
            config: DialogueConfig,
            biometrics: Arc<dyn BiometricVerifier>,
            accounts: Arc<InMemoryAccounts>,
            service: Arc<dyn AccountService>,
        ) -> Self {
            let mail = Arc::new(OfflineExecutor::new(Platform::Mail));
            let telegram = Arc::new(OfflineExecutor::new(Platform::Telegram));
            let collaborators = Collaborators::new(
                Arc::new(TemplateDrafter),
                Arc::new(PatternSanitizer),
                service,
                biometrics,
            )
            .with_executor(mail.clone())
            .with_executor(telegram.clone());

            let (speech, speech_rx) = SpeechHandle::channel();
            let (event_tx, _) = broadcast::channel(256);
            Self {
                orchestrator: Orchestrator::new(config, collaborators, speech, event_tx),
                speech_rx,
                mail,
                telegram,
                accounts,
            }
        }

        pub async fn hear(&mut self, text: &str) {
            self.orchestrator.handle_transcript(text).await;
        }

        pub fn state(&self) -> &DialogueState {
            self.orchestrator.state()
        }

        /// Drain every command sent to the speech service so far
        pub fn commands(&mut self) -> Vec<SpeechCommand> {
            let mut out = Vec::new();
            while let Ok(command) = self.speech_rx.try_recv() {
                out.push(command);
            }
            out
        }

        /// Drain and return only the spoken text
        pub fn spoken(&mut self) -> Vec<String> {
            self.commands()
                .into_iter()
                .filter_map(|c| match c {
                    SpeechCommand::Speak { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }

        pub fn last_spoken(&mut self) -> String {
            self.spoken().pop().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_dormant_only_accepts_wake_phrase() {
        let config = DialogueConfig {
            reset_state: crate::config::ResetState::Dormant,
            ..DialogueConfig::default()
        };
        let mut h = Harness::with(config, Arc::new(StaticBiometrics::live()));
        assert_eq!(h.state().assistant_state, AssistantState::Dormant);

        h.hear("open inbox").await;
        assert_eq!(h.state().assistant_state, AssistantState::Dormant);
        assert!(h.spoken().is_empty());

        h.hear("hey concierge").await;
        assert_eq!(h.state().assistant_state, AssistantState::Listening);
        assert_eq!(h.last_spoken(), "I'm listening.");

        h.hear("go to sleep").await;
        assert_eq!(h.state().assistant_state, AssistantState::Dormant);
    }

    #[tokio::test]
    async fn test_open_inbox_is_not_rerouted() {
        let mut h = Harness::new();
        h.orchestrator.set_view(Some(Platform::Telegram));

        h.hear("open inbox").await;

        assert_eq!(h.state().active_platform, Some(Platform::Mail));
        assert_eq!(h.state().last_used_platform, Some(Platform::Mail));
        assert_eq!(h.state().routing, VoiceRoutingMode::PlatformCommand);
        assert_eq!(h.last_spoken(), "Opening your inbox.");
    }

    #[tokio::test]
    async fn test_summarize_rerouted_to_last_used_platform() {
        let mut h = Harness::new();
        h.orchestrator.state.last_used_platform = Some(Platform::Telegram);

        let mut intent = IntentClassifier::new().classify("summarize");
        assert_eq!(intent.destination, Destination::System);
        assert!(h.orchestrator.reroute(&mut intent));
        assert_eq!(intent.destination, Destination::Telegram);

        h.hear("summarize").await;
        assert_eq!(h.state().summary.as_deref(), Some("Nothing new on Telegram."));
        assert_eq!(h.last_spoken(), "Here is your Telegram summary. Nothing new on Telegram.");
    }

    #[tokio::test]
    async fn test_active_view_beats_last_used() {
        let mut h = Harness::new();
        h.orchestrator.state.last_used_platform = Some(Platform::Telegram);
        h.orchestrator.set_view(Some(Platform::Mail));

        let mut intent = IntentClassifier::new().classify("summarize this");
        h.orchestrator.reroute(&mut intent);
        assert_eq!(intent.destination, Destination::Mail);
    }

    #[tokio::test]
    async fn test_ambiguous_without_context_asks() {
        let mut h = Harness::new();
        h.hear("summarize").await;
        assert!(h.last_spoken().starts_with("Which app"));
        assert_eq!(h.state().last_used_platform, None);
    }

    #[tokio::test]
    async fn test_platform_commands_require_sign_in() {
        let mut h = Harness::with(DialogueConfig::default(), Arc::new(StaticBiometrics::live()));
        h.hear("open inbox").await;
        assert_eq!(h.last_spoken(), "Please sign in first. Say log in to start.");
        assert_eq!(h.state().active_platform, None);
    }

    #[tokio::test]
    async fn test_unknown_gets_spoken_fallback() {
        let mut h = Harness::new();
        h.hear("what's the weather like").await;
        assert!(h.last_spoken().starts_with("Sorry, I didn't catch that"));
    }

    #[tokio::test]
    async fn test_failed_execution_speaks_message() {
        let mut h = Harness::new();
        h.orchestrator.apply_execution_result(Platform::Mail, ExecutionResult::failed("Mailbox is full."));
        assert_eq!(h.last_spoken(), "Mailbox is full.");
        assert_eq!(h.state().last_used_platform, None);
    }

    #[tokio::test]
    async fn test_broken_subflow_resets() {
        let mut h = Harness::new();
        h.orchestrator.state.routing = VoiceRoutingMode::ComposeFlow;

        h.hear("hello").await;

        assert_eq!(h.state().routing, VoiceRoutingMode::Global);
        assert_eq!(h.state().compose, ComposeState::default());
        assert_eq!(h.last_spoken(), "Sorry, something went wrong, so I've started over.");
    }

    #[tokio::test]
    async fn test_transcript_log_redacts_secrets() {
        let mut h = Harness::new();
        h.hear("log in").await;
        h.hear("ana at example dot com").await;
        h.hear("correct horse").await;

        let texts: Vec<_> = h.state().transcript.entries().map(|e| e.text.clone()).collect();
        assert!(texts.contains(&"[redacted]".to_string()));
        assert!(!texts.iter().any(|t| t.contains("correct horse")));
    }

    #[tokio::test]
    async fn test_reset_releases_session_exit_held_elsewhere() {
        let mut h = Harness::new();
        h.orchestrator.set_view(Some(Platform::Mail));
        h.commands();

        h.orchestrator.reset();

        let commands = h.commands();
        assert_eq!(commands, vec![SpeechCommand::Resume(PauseReason::SessionExit)]);
        assert_eq!(h.state().routing, VoiceRoutingMode::Global);
    }

    #[tokio::test]
    async fn test_run_buffers_inputs_in_order() {
        let mut h = Harness::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(DialogueInput::ViewChanged(Some(Platform::Telegram))).unwrap();
        tx.send(DialogueInput::Transcript("summarize".into())).unwrap();
        tx.send(DialogueInput::Transcript("open inbox".into())).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), h.orchestrator.run(rx))
            .await
            .unwrap();

        assert_eq!(h.state().summary.as_deref(), Some("Nothing new on Telegram."));
        assert_eq!(h.state().active_platform, Some(Platform::Mail));
    }
}
