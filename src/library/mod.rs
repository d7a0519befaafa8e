//! Independent and project agnostic libraries
//!
//! Any of the library submodules in this module can be extracted into their own crate
//! at any given time. They power the stream engine, the broadcast fan-out and the cache,
//! however, everything specific to the demo storefront lives in the [`domain`](super::domain)
//! and [`module`](super::module) modules.

pub mod cache;
pub mod communication;
pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
