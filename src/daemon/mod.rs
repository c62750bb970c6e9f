// Daemon module - Detaching the process from its terminal and session

pub mod daemonize;
pub mod ffi;
mod sys;

pub use daemonize::{detach, detach_raw, DetachState, ProcessSplit};
