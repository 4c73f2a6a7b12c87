//! Nullable infrastructure for deterministic testing.
//!
//! Provides test-friendly implementations of external dependencies that
//! never touch the filesystem: swap them in for the real backends in tests.

pub mod store;

pub use store::MemoryStore;
