//! Operator-facing control: console commands, session choice and the main loop.

pub mod commands;
pub mod console;
pub mod runner;
pub mod session;

pub use console::Console;
pub use runner::{LoopState, Runner};
