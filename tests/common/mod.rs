//! Shared test utilities for pagetape
//!
//! - Deterministic clock and fixture pages
//! - In-process fetcher and storage doubles

pub mod fakes;
pub mod fixtures;
