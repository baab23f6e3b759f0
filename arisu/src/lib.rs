//! Terminal coding assistant driven by directives embedded in model replies.
//!
//! The backend answers in free text; `<RUN>`, `<READ>`, `<EDIT>` and
//! `<PATCH>` directives in a reply are executed locally and their results fed
//! back into the conversation. The crate keeps a strict split:
//!
//! - **[`core`]**: pure logic (block segmentation, directive scanning).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: side effects (files, shell, backend process, config, logs).
//!
//! Orchestration modules ([`driver`], [`agent`], [`session`]) combine the two
//! into the tool-call loop, the step-file runner and the interactive session.

pub mod agent;
pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
