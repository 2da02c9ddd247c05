//! Privileged shell access
//!
//! Every privileged operation in the crate goes through [`PrivilegedExecutor`],
//! which reduces shell outcomes to booleans and captured stdout.

pub mod command;
pub mod executor;

pub use command::{quote, write_cmd, CommandBatch, OnFailure, ShellCommand};
pub use executor::{PrivilegedExecutor, PrivilegedShell, ShellOutput, SuShell};
