//! Integration tests for quorum.
//!
//! These tests run the whole service against local mock venues:
//! - Adapter -> aggregator -> REST flow
//! - Streaming snapshot and update cadence
//! - Venue failure and degradation

pub mod common;
