//! testforge library crate
//!
//! The heart of the crate is [`pipeline::run`]: raw model completion in,
//! cleaned code plus a [`validate::ValidationResult`] out. Around it sit the
//! prompt store, the model client, and a GitLab client for committing
//! results and mining defect history.

pub mod config;
pub mod gitlab;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod util;
pub mod validate;
