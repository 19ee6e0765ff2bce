//! # murmur-tests
//!
//! Integration tests for murmur nodes.
//!
//! This crate provides integration testing including:
//! - Multi-node join, gossip and reconnection scenarios
//! - Messaging outcomes between live nodes
//! - Registry persistence on the file backend
//! - HTTP API behavior
//! - Property-based tests for identity and registry merging

pub mod harness;


#[cfg(test)]
mod network_tests;


#[cfg(test)]
mod api_tests;


pub use harness::*;
