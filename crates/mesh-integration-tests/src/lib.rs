//! Integration test crate for the gossip mesh.
//!
//! This crate exists solely to run tests that drive several nodes at once.
//! It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
