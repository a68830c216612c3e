//! # Relay-Mesh Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Cross-crate replication flows
//!     ├── replication_flow.rs   # stage → publish → dispatch end to end
//!     └── consistency.rs        # vector clock / racing publisher scenarios
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p relay-tests
//!
//! # By category
//! cargo test -p relay-tests integration::
//! ```

#[cfg(test)]
pub mod integration;
