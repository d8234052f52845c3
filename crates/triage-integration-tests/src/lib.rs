//! Integration test crate for the triage engine.
//!
//! This crate exists solely to run integration tests that span the triage crates.
//! It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
