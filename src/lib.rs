//! selfheal library crate
//!
//! Detects a failed CI run on a tracked branch, asks a patch service for a
//! fix, and lands it, with a hard cap on attempts per failing commit.
//! The binary in `main.rs` wires these modules to GitHub, an OpenAI-style
//! chat API, and the local `git`.

pub mod config;
pub mod evidence;
pub mod git_ops;
pub mod github;
pub mod ledger;
pub mod locator;
pub mod logging;
pub mod orchestrator;
pub mod patch;
pub mod remediation;
