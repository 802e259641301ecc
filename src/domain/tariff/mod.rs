//! Tariff aggregate
//!
//! Component tariffs, their links to users and groups, money and the cost
//! breakdown they produce.

pub mod model;
pub mod money;

pub use model::{
    ComponentKind, CostBreakdown, LineItem, LineItemKind, LinkTarget, SessionUsage, Tariff,
    TariffComponent, TariffLink, TimeOfDayBracket,
};
pub use money::{Currency, Money};
