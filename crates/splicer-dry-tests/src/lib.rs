// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for splicer crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`packages`] - The mock package repository used by splice scenarios
//! - [`harness`] - Install-then-concretize harness over an in-memory store

pub mod config;
pub mod harness;
pub mod packages;

pub use config::InMemoryConfigStore;
pub use harness::SpliceHarness;
pub use packages::{mock_repository, MOCK_PACKAGES};
