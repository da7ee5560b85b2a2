//! Message composition across turns
//!
//! TO -> CONFIRM_TO -> PROMPT -> CONFIRM_DRAFT, then read back, send, edit,
//! append or start over. While the flow is open every transcript lands here
//! verbatim; only a global command gets out.

use tracing::{debug, info, warn};

use crate::intent::{Action, Destination, Entities, Platform, ResolvedIntent};

use super::orchestrator::{DialogueError, Orchestrator};
use super::spoken::{self, DraftChoice};
use super::state::{ComposeState, ComposeStep, VoiceRoutingMode};

const DRAFT_MENU: &str = "Say read it, send it, edit, add more, or start over.";

impl Orchestrator {
    /// Enter the flow at the first step the prefilled fields leave open
    pub(super) fn open_compose(
        &mut self,
        platform: Platform,
        lead: &str,
        recipient: Option<String>,
        subject: Option<String>,
        body: Option<String>,
        chat_id: Option<String>,
    ) {
        let chat_id = match platform {
            Platform::Telegram => chat_id.or_else(|| self.state.open_conversation.clone()),
            Platform::Mail => chat_id,
        };
        let addressed = recipient.is_some() || chat_id.is_some();

        let (step, prompt) = match (&recipient, &body) {
            (_, Some(_)) if addressed => (ComposeStep::ConfirmDraft, format!("I have a draft ready. {}", DRAFT_MENU)),
            (Some(name), _) => (ComposeStep::ConfirmTo, format!("Sending to {}. Is that right?", name)),
            (None, _) if addressed => (ComposeStep::Prompt, "What would you like to say?".to_string()),
            _ => (ComposeStep::To, "Who should I send it to?".to_string()),
        };

        info!(%platform, ?step, "compose flow opened");
        self.state.compose = ComposeState {
            step: ComposeStep::Idle,
            platform: Some(platform),
            recipient,
            subject,
            body,
            destination_chat_id: chat_id,
            masked_field_types: Vec::new(),
        };
        self.state.routing = VoiceRoutingMode::ComposeFlow;
        self.set_compose_step(step);
        self.say(format!("{} {}", lead, prompt).trim().to_string());
    }

    /// Leave the flow and discard whatever was drafted
    pub(super) fn close_compose(&mut self) {
        self.set_compose_step(ComposeStep::Idle);
        self.state.compose = ComposeState::default();
        self.state.routing = VoiceRoutingMode::Global;
    }

    pub(super) async fn handle_compose(&mut self, text: &str) -> Result<(), DialogueError> {
        if let Some(command) = spoken::global_command(text) {
            return self.apply_global(command).await;
        }

        let step = self.state.compose.step;
        debug!(?step, "compose input");

        match step {
            ComposeStep::Idle => {
                return Err(DialogueError::UnexpectedStep {
                    flow: "compose",
                    step: format!("{:?}", step),
                })
            }
            ComposeStep::To => self.compose_to(text),
            ComposeStep::ConfirmTo => match spoken::yes_no(text) {
                Some(true) => {
                    self.set_compose_step(ComposeStep::Prompt);
                    self.say("What would you like to say?");
                }
                Some(false) => {
                    self.state.compose.recipient = None;
                    self.set_compose_step(ComposeStep::To);
                    self.say("Okay. Who should I send it to?");
                }
                None => {
                    let name = self.state.compose.recipient.clone().unwrap_or_default();
                    self.say(format!("Should I send it to {}? Please say yes or no.", name));
                }
            },
            ComposeStep::Prompt => self.compose_draft(text).await?,
            ComposeStep::ConfirmDraft => self.confirm_draft(text).await?,
            ComposeStep::Editing => {
                self.state.compose.body = Some(text.to_string());
                self.set_compose_step(ComposeStep::ConfirmDraft);
                self.say(format!("Updated. {}", DRAFT_MENU));
            }
            ComposeStep::Appending => {
                let body = match self.state.compose.body.take() {
                    Some(existing) if !existing.is_empty() => format!("{} {}", existing, text),
                    _ => text.to_string(),
                };
                self.state.compose.body = Some(body);
                self.set_compose_step(ComposeStep::ConfirmDraft);
                self.say(format!("Added. {}", DRAFT_MENU));
            }
            ComposeStep::ConfirmSend => match spoken::yes_no(text) {
                Some(true) => self.send_draft().await?,
                Some(false) => {
                    self.set_compose_step(ComposeStep::ConfirmDraft);
                    self.say(format!("Okay, not yet. {}", DRAFT_MENU));
                }
                None => self.say("Should I send it? Please say yes or no."),
            },
        }

        Ok(())
    }

    fn compose_to(&mut self, text: &str) {
        match spoken::normalize_recipient(text, self.state.compose.platform) {
            Some(recipient) => {
                self.say(format!("Sending to {}. Is that right?", recipient));
                self.state.compose.recipient = Some(recipient);
                self.set_compose_step(ComposeStep::ConfirmTo);
            }
            None => self.say("Who should I send it to?"),
        }
    }

    /// Turn the spoken description into a draft
    async fn compose_draft(&mut self, text: &str) -> Result<(), DialogueError> {
        let platform = self.state.compose.platform.ok_or(DialogueError::MissingField("compose platform"))?;

        if !platform.supports_ai_drafting() {
            self.state.compose.body = Some(text.to_string());
            self.set_compose_step(ComposeStep::ConfirmDraft);
            self.say(format!("Got it. {}", DRAFT_MENU));
            return Ok(());
        }

        let sanitizer = self.collaborators.sanitizer.clone();
        let masked = sanitizer.mask(text, &sanitizer.detect(text));
        if !masked.masked_field_types.is_empty() {
            info!(fields = ?masked.masked_field_types, "personal data masked before drafting");
        }

        let drafter = self.collaborators.drafter.clone();
        let prior_subject = self.state.compose.subject.clone();
        let drafted = self
            .bounded("drafter", drafter.generate_draft(&masked.masked_text, prior_subject.as_deref()))
            .await;

        match drafted {
            Ok(draft) => {
                let compose = &mut self.state.compose;
                compose.subject = draft.subject.or(prior_subject);
                compose.body = Some(draft.body);
                compose.masked_field_types = masked.masked_field_types;
                for kind in draft.masked_field_types {
                    if !compose.masked_field_types.contains(&kind) {
                        compose.masked_field_types.push(kind);
                    }
                }
                self.set_compose_step(ComposeStep::ConfirmDraft);
                self.say(format!("Your draft is ready. {}", DRAFT_MENU));
            }
            Err(e) => {
                warn!(error = %e, "draft generation failed");
                self.say("Sorry, I couldn't write that draft. What would you like to say?");
            }
        }

        Ok(())
    }

    async fn confirm_draft(&mut self, text: &str) -> Result<(), DialogueError> {
        match spoken::draft_choice(text) {
            Some(DraftChoice::ReadBack) => {
                let compose = &self.state.compose;
                let body = compose.body.clone().ok_or(DialogueError::MissingField("draft body"))?;
                let reading = match &compose.subject {
                    Some(subject) => format!("Subject: {}. {}", subject, body),
                    None => body,
                };
                self.set_compose_step(ComposeStep::ConfirmSend);
                self.say(format!("{} Should I send it?", reading));
            }
            Some(DraftChoice::Send) => self.send_draft().await?,
            Some(DraftChoice::Restart) => {
                self.state.compose.clear_draft();
                self.state.compose.recipient = None;
                self.set_compose_step(ComposeStep::To);
                self.say("Okay, let's start over. Who should I send it to?");
            }
            Some(DraftChoice::Edit) => {
                self.set_compose_step(ComposeStep::Editing);
                self.say("What should it say instead?");
            }
            Some(DraftChoice::Append) => {
                self.set_compose_step(ComposeStep::Appending);
                self.say("What should I add?");
            }
            None => self.say(format!("Sorry, I didn't get that. {}", DRAFT_MENU)),
        }
        Ok(())
    }

    async fn send_draft(&mut self) -> Result<(), DialogueError> {
        let compose = self.state.compose.clone();
        let platform = compose.platform.ok_or(DialogueError::MissingField("compose platform"))?;
        let body = compose.body.clone().ok_or(DialogueError::MissingField("draft body"))?;
        let recipient = compose
            .recipient
            .clone()
            .or_else(|| compose.destination_chat_id.clone())
            .ok_or(DialogueError::MissingField("recipient"))?;

        let Some(executor) = self.collaborators.executor(platform) else {
            self.set_compose_step(ComposeStep::ConfirmSend);
            self.say(format!("{} isn't connected right now. Should I try again?", platform));
            return Ok(());
        };

        let intent = ResolvedIntent {
            action: Action::Send,
            destination: Destination::from(platform),
            source_text: String::new(),
            entities: Entities {
                recipient: Some(recipient.clone()),
                subject: compose.subject.clone(),
                body: Some(body),
                chat_id: compose.destination_chat_id.clone(),
                ..Entities::default()
            },
            explicit_destination: true,
        };

        match self.bounded("platform executor", executor.execute(&intent)).await {
            Ok(result) if result.success => {
                info!(%platform, "draft sent");
                self.state.last_used_platform = Some(platform);
                self.close_compose();
                let message = if result.message.is_empty() {
                    format!("Sent to {}.", recipient)
                } else {
                    result.message
                };
                self.say(message);
            }
            Ok(result) => {
                warn!(%platform, message = %result.message, "send rejected");
                self.set_compose_step(ComposeStep::ConfirmSend);
                self.say("Sorry, I couldn't send that. Should I try again?");
            }
            Err(e) => {
                warn!(%platform, error = %e, "send failed");
                self.set_compose_step(ComposeStep::ConfirmSend);
                self.say("Sorry, I couldn't send that. Should I try again?");
            }
        }

        Ok(())
    }
}
