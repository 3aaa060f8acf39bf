//! stashbot library crate.
//!
//! This module exposes the bot's components for integration testing.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod tasks;
pub mod telegram;
pub mod utils;

pub use error::{Error, Result};
