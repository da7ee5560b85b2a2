//! IPC module for operator control of the running assistant

mod protocol;
mod server;

pub use server::{Control, Server};
