//! Deterministic, pure logic shared by the assistant core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and return deterministic outputs suitable for tests.

pub mod blocks;
pub mod directive;
pub mod types;
