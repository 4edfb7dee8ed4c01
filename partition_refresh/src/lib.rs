//! One refresh cycle of the partition refresh service.
//!
//! The binary wires the AWS backed services into a [`RefreshOrchestrator`]; the library
//! holds the orchestration itself so it can be exercised against in-memory services.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

pub mod orchestrator;

pub use orchestrator::{CycleOutcome, Error, RefreshOrchestrator};
