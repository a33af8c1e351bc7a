//! Test utilities: scripted mock implementations of every capability.
//!
//! Exposed as a public module so downstream crates can drive the engine
//! without real network services or media binaries.

pub mod mocks;
