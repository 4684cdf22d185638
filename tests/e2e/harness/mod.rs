//! E2E test harness for dbvc.
//!
//! Builders and assertions here are shared by every scenario file; not all
//! of them are used by each one.

#![allow(dead_code)]

pub mod assertions;
pub mod clock;
pub mod runner;
pub mod scenario;
pub mod steps;
pub mod workspace;

pub use assertions::Assertion;
pub use scenario::Scenario;
