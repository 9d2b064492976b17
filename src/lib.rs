//! Expand seed package lists into full dependency closures against a
//! Debian-format archive.

#[macro_use]
pub mod errors;
pub mod archive;
pub mod defaults;
pub mod resolver;
pub mod seeds;
pub mod tsort;
pub mod universe;

pub use crate::resolver::Germinator;
pub use crate::seeds::{Seed, SeedStructure, SeedVcs};
