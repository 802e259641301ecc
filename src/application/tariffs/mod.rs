//! Tariff resolver and cost engine

pub mod catalog;
pub mod cost;
pub mod resolver;

pub use catalog::{SharedTariffCatalog, TariffCatalog};
pub use cost::compute_cost;
pub use resolver::TariffResolver;
