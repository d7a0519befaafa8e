//! Domain specific structures of the storefront demo

/// Number of records retained in the demo streams
///
/// Consumers lagging behind by more than this will miss records.
pub(self) const STREAM_RETENTION: usize = 10_000;

mod customer;
mod order;
mod product;

pub use customer::*;
pub use order::*;
pub use product::*;
