//! Library surface for `initcored`'s configuration loader and state
//! machine, exposed so integration tests (and the binary) can exercise it
//! directly.

pub mod cfg;
pub mod collab;
pub mod common;
pub mod error;
pub mod logging;
pub mod sm;
