//! Device links: the live connection of each station

pub mod link;
pub mod registry;

pub use link::{DeviceLink, EvictedLink, LinkHandle};
pub use registry::{DeviceLinkRegistry, SharedLinkRegistry};
