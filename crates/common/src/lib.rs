//! Shared types used across the propagation engine crates.

pub mod types;

pub use types::AggregateId;
