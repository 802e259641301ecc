//! Outer surfaces of the service

pub mod ws;
