//! Sequential HTTP contract-test harness.
//!
//! Stands in for a backend, checks each inbound request against the next
//! assertion of an ordered plan, forwards it to the real target and relays
//! the target's response back byte-for-byte.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod proxy;

pub use config::{Assertion, TestPlan};
pub use error::HarnessError;
pub use lifecycle::{BoundHarness, Harness, Phase, RunSummary};
