//! Integration tests for relkeep
//!
//! These tests run the engine, the sources and the `relkeep` binary against a
//! local HTTP server started per test (`relkeep::test_utils::TestServer`).
//! No test reaches the network.
//!
//! Run with `cargo test --test integration`.

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod downloads;
mod sources;
mod update_flow;
