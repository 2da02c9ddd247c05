//! USB Audio Bridge
//!
//! Turns a rooted device with an OTG port into a USB Audio Class 2.0
//! gadget and bridges the host's audio stream to the local audio stack.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod otg;
pub mod shell;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
