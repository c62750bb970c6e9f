// Library exports for daemonizer

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;

pub use daemon::{detach, detach_raw, DetachState, ProcessSplit};
pub use error::{DaemonError, Result, Severity};
