//! I/O helpers: filesystem effects, child processes, configuration and the
//! backend collaborator.

pub mod actions;
pub mod backend;
pub mod config;
pub mod confirm;
pub mod process;
pub mod prompt;
pub mod transcript;
