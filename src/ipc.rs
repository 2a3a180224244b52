//! Daemon, foreground runner and the control socket.

mod pipeline;
pub mod runtime;
mod server;

pub use pipeline::{RunOptions, classify, run_foreground};
pub use server::{client_request, run_daemon};
