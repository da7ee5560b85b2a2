//! Login and registration flows
//!
//! Email, password, face, PIN; registration confirms the PIN once more and
//! then submits everything in a single call. Nothing typed into these steps
//! ever reaches the intent classifier.

use chrono::Utc;
use tracing::{info, warn};

use crate::capture::PauseReason;
use crate::collaborators::{AuthOutcome, CollaboratorError, RegistrationRequest};

use super::orchestrator::{DialogueError, Orchestrator};
use super::spoken;
use super::state::{AssistantState, AuthMode, AuthState, AuthStep, Secret, UserSession};

/// What to do after a face attempt
enum FaceResult {
    Passed,
    Retry,
    /// Already handled; the flow is over or rewound
    Stop,
}

impl Orchestrator {
    pub(super) fn begin_auth(&mut self, mode: AuthMode) {
        info!(?mode, "auth flow started");
        self.state.auth = AuthState::begin(mode);
        self.emit_auth_step();
        self.set_state(mode.state());
        self.say(match mode {
            AuthMode::Login => "Let's sign you in. What's your email address?",
            AuthMode::Register => "Let's create your account. What's your email address?",
        });
    }

    fn set_auth_step(&mut self, step: AuthStep) {
        self.state.auth.step = step;
        self.emit_auth_step();

        let Some(mode) = self.state.auth.mode else { return };
        let state = match (mode, step) {
            (AuthMode::Login, AuthStep::Face) => AssistantState::WaitingForFace,
            (AuthMode::Register, AuthStep::Face) => AssistantState::WaitingForLiveness,
            (_, AuthStep::Pin | AuthStep::ConfirmPin) => AssistantState::WaitingForPin,
            _ => mode.state(),
        };
        self.set_state(state);
    }

    fn advance_auth(&mut self) {
        if let Some(mode) = self.state.auth.mode {
            let next = mode.next_step(self.state.auth.step);
            self.set_auth_step(next);
        }
    }

    pub(super) async fn handle_auth(&mut self, text: &str) -> Result<(), DialogueError> {
        if let Some(command) = spoken::global_command(text) {
            return self.apply_global(command).await;
        }

        let mode = self.state.auth.mode.ok_or(DialogueError::MissingField("auth mode"))?;
        let step = self.state.auth.step;

        match step {
            AuthStep::Email => match spoken::normalize_email(text) {
                Some(email) => {
                    self.state.auth.email = Some(email);
                    self.advance_auth();
                    self.say("Thanks. Now say your password.");
                }
                None => self.say("I didn't get a valid email. Spell it like jane at example dot com."),
            },
            AuthStep::Password => match spoken::normalize_password(text) {
                Some(password) => {
                    self.state.auth.password = Some(Secret::new(password));
                    self.advance_auth();
                    self.run_face_step(mode).await?;
                }
                None => self.say("That password is too short. Please say it again."),
            },
            // Reached only after a failed attempt asked the user to retry
            AuthStep::Face => self.run_face_step(mode).await?,
            AuthStep::Pin => match spoken::parse_pin(text) {
                Some(pin) => match mode {
                    AuthMode::Register => {
                        self.state.auth.pin = Some(Secret::new(pin));
                        self.advance_auth();
                        self.say("Please say your PIN again to confirm.");
                    }
                    AuthMode::Login => self.verify_pin(pin).await?,
                },
                None => self.say("Please say your PIN one digit at a time."),
            },
            AuthStep::ConfirmPin => match spoken::parse_pin(text) {
                Some(pin) if self.state.auth.pin.as_ref().map(Secret::expose) == Some(pin.as_str()) => {
                    self.advance_auth();
                    self.submit_registration().await?;
                }
                Some(_) => {
                    self.state.auth.pin = None;
                    self.set_auth_step(AuthStep::Pin);
                    self.say("Those PINs didn't match. Please choose your PIN again.");
                }
                None => self.say("Please say your PIN one digit at a time."),
            },
            AuthStep::Idle | AuthStep::Complete => {
                return Err(DialogueError::UnexpectedStep {
                    flow: "auth",
                    step: format!("{:?}", step),
                })
            }
        }

        Ok(())
    }

    /// Capture is held paused for the whole biometric call
    async fn run_face_step(&mut self, mode: AuthMode) -> Result<(), DialogueError> {
        self.say("Please look at the camera.");
        self.hold(PauseReason::BiometricCapture);

        let result = match mode {
            AuthMode::Register => self.check_liveness().await,
            AuthMode::Login => self.verify_identity().await?,
        };

        self.release(PauseReason::BiometricCapture);

        match result {
            FaceResult::Passed => {
                self.advance_auth();
                self.say("Thanks. Now say your PIN.");
            }
            FaceResult::Retry => {
                self.state.auth.face_attempts += 1;
                if self.state.auth.face_attempts >= self.config.max_face_attempts {
                    warn!(attempts = self.state.auth.face_attempts, "face check failed too often");
                    self.reset();
                    self.say("I couldn't verify your face, so I've cancelled. You can try again later.");
                } else {
                    self.say("I couldn't see you clearly. Say ready to try again.");
                }
            }
            FaceResult::Stop => {}
        }

        Ok(())
    }

    async fn check_liveness(&mut self) -> FaceResult {
        let biometrics = self.collaborators.biometrics.clone();
        match self.bounded("biometrics", biometrics.check_liveness()).await {
            Ok(report) if report.outcome == AuthOutcome::Ok => {
                self.state.auth.face_token = report.face_token;
                FaceResult::Passed
            }
            Ok(report) => {
                info!(outcome = ?report.outcome, "liveness check rejected");
                FaceResult::Retry
            }
            Err(e) => {
                warn!(error = %e, "liveness check failed");
                FaceResult::Retry
            }
        }
    }

    /// First login phase: credentials, then face match
    async fn verify_identity(&mut self) -> Result<FaceResult, DialogueError> {
        let email = self.state.auth.email.clone().ok_or(DialogueError::MissingField("email"))?;
        let password = self
            .state
            .auth
            .password
            .clone()
            .ok_or(DialogueError::MissingField("password"))?;

        let accounts = self.collaborators.accounts.clone();
        match self
            .bounded("account service", accounts.verify_credentials(&email, password.expose()))
            .await
        {
            Ok(AuthOutcome::Ok) => {}
            Ok(AuthOutcome::UnknownAccount) => {
                self.rewind_to(AuthStep::Email);
                self.say("I don't know that email. Please say your email address again.");
                return Ok(FaceResult::Stop);
            }
            Ok(outcome) => {
                info!(?outcome, "credentials rejected");
                self.rewind_to(AuthStep::Password);
                self.say("That password didn't match. Please say it again.");
                return Ok(FaceResult::Stop);
            }
            Err(e) => {
                self.apologize_and_rewind(e, AuthStep::Password);
                return Ok(FaceResult::Stop);
            }
        }

        let biometrics = self.collaborators.biometrics.clone();
        Ok(match self.bounded("biometrics", biometrics.verify_face(&email)).await {
            Ok(AuthOutcome::Ok) => FaceResult::Passed,
            Ok(outcome) => {
                info!(?outcome, "face match rejected");
                FaceResult::Retry
            }
            Err(e) => {
                warn!(error = %e, "face match failed");
                FaceResult::Retry
            }
        })
    }

    /// Second login phase
    async fn verify_pin(&mut self, pin: String) -> Result<(), DialogueError> {
        let email = self.state.auth.email.clone().ok_or(DialogueError::MissingField("email"))?;
        let accounts = self.collaborators.accounts.clone();

        match self.bounded("account service", accounts.verify_pin(&email, &pin)).await {
            Ok(AuthOutcome::Ok) => self.complete_sign_in(email, "Welcome back. You're signed in."),
            Ok(outcome) => {
                info!(?outcome, "pin rejected");
                self.state.auth.pin_attempts += 1;
                if self.state.auth.pin_attempts >= self.config.max_pin_attempts {
                    warn!(attempts = self.state.auth.pin_attempts, "too many pin attempts");
                    self.reset();
                    self.say("Too many wrong PINs. I've cancelled the sign in.");
                } else {
                    self.say("That PIN didn't match. Please try again.");
                }
            }
            Err(e) => self.apologize_and_rewind(e, AuthStep::Pin),
        }

        Ok(())
    }

    async fn submit_registration(&mut self) -> Result<(), DialogueError> {
        let auth = self.state.auth.clone();
        let request = RegistrationRequest {
            email: auth.email.ok_or(DialogueError::MissingField("email"))?,
            password: auth
                .password
                .map(|p| p.expose().to_string())
                .ok_or(DialogueError::MissingField("password"))?,
            pin: auth
                .pin
                .map(|p| p.expose().to_string())
                .ok_or(DialogueError::MissingField("pin"))?,
            face_token: auth.face_token,
        };
        let email = request.email.clone();

        let accounts = self.collaborators.accounts.clone();
        match self.bounded("account service", accounts.register(request)).await {
            Ok(AuthOutcome::Ok) => self.complete_sign_in(email, "Your account is ready. You're signed in."),
            Ok(AuthOutcome::AccountExists) => {
                self.reset();
                self.say("An account with that email already exists. Say log in to sign in.");
            }
            Ok(outcome) => {
                warn!(?outcome, "registration rejected");
                self.reset();
                self.say("Sorry, I couldn't create your account.");
            }
            Err(e) => {
                warn!(error = %e, "registration failed");
                self.reset();
                self.say("Sorry, I couldn't create your account right now.");
            }
        }

        Ok(())
    }

    fn complete_sign_in(&mut self, email: String, greeting: &str) {
        info!(email = %email, "user signed in");
        self.state.auth = AuthState::default();
        self.emit_auth_step();
        self.state.user = Some(UserSession {
            email,
            signed_in_at: Utc::now(),
        });
        self.set_state(AssistantState::Authenticated);
        self.say(greeting);
    }

    fn rewind_to(&mut self, step: AuthStep) {
        if step == AuthStep::Email {
            self.state.auth.email = None;
        }
        self.state.auth.password = None;
        self.set_auth_step(step);
    }

    fn apologize_and_rewind(&mut self, error: CollaboratorError, step: AuthStep) {
        warn!(error = %error, ?step, "auth service call failed");
        if step != AuthStep::Pin {
            self.rewind_to(step);
        }
        self.say("Sorry, I couldn't check that just now. Please say it again.");
    }
}
