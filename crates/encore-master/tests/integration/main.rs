//! Integration test entry point for encore-master.
//!
//! Run with: cargo test --test integration

mod harness;
mod relay;
mod sweep;
