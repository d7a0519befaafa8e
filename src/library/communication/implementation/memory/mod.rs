//! In-process implementations without any external dependencies
//!
//! Useful for tests and single-process deployments. Nothing is persisted, the contents
//! are lost once the structures are dropped.

mod log;

pub use self::log::*;
