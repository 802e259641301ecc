//! Domain ports
//!
//! Trait contracts that collaborators outside the core implement.

pub mod directory;

pub use directory::{granted_station_groups, DirectoryPort};
