//! Integration tests for pagetape
//!
//! These tests drive capture, snapshotting, storage and replay together.

#[path = "../common/mod.rs"]
pub mod common;

pub mod capture_flow;
pub mod replay_flow;
pub mod snapshot_flow;
