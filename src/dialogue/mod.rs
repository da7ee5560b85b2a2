//! Dialogue module
//!
//! Turns final transcripts into assistant behavior: wake and sleep, sign-in
//! flows, multi-turn composition and platform commands.

mod auth;
mod compose;
mod orchestrator;
mod spoken;
mod state;

pub use orchestrator::{DialogueInput, Orchestrator};
pub use state::{AssistantState, AuthMode, AuthStep, ComposeStep, Role};
