//! Integration test suite for conductor.
//!
//! These tests drive the public API end to end: descriptors are parsed and
//! validated, orchestrators plan and commit cycles, and runs execute on the
//! scripted executor under tokio's paused clock.
//!
//! # Test Categories
//!
//! - `planning`: Planning cycle properties (capacity, dependencies, determinism)
//! - `execution`: Retry policy, idempotent completion and cancellation
//! - `scenarios`: Descriptor-driven runs across modes and strategies

mod fixtures;

mod execution;
mod planning;
mod scenarios;
