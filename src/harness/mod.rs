//! Process lifecycle management
//!
//! A [`Module`] is executed by the [`ModuleRunner`] which takes care of startup, background [jobs](JobSet)
//! and an orderly shutdown once the [`Heart`] returned by the module stops beating.

mod heart;
mod jobs;
mod module;

pub use heart::*;
pub use jobs::*;
pub use module::*;
