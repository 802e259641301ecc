//! Infrastructure layer - external concerns

pub mod directory;
pub mod seed;

pub use directory::InMemoryDirectory;
pub use seed::SeedData;
