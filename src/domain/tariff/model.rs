//! Tariff domain entity
//!
//! A tariff is an ordered list of pricing components. Applying it to the
//! usage of a session yields a [`CostBreakdown`] whose line items always sum
//! to its total: each item is rounded to the currency minor unit first and
//! the total is the plain sum of the rounded items.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::{Currency, Money};
use crate::domain::{TariffId, TenantId, UserGroupId, UserId};

const WH_PER_KWH: i64 = 1000;
const SECONDS_PER_MINUTE: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    /// Price per kWh delivered.
    Energy,
    /// Price per minute while the vehicle draws power.
    ChargingTime,
    /// Price per minute while the session is active but not drawing.
    ParkingTime,
    /// Flat fee, once per session.
    SessionFee,
    /// Price per minute after charging has finished.
    IdleTime,
    /// Flat fee picked by the time of day the session started.
    TimeOfDay,
}

/// Half-open `[start, end)` window in UTC; wraps midnight when `end <= start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayBracket {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub unit_price: Decimal,
}

impl TimeOfDayBracket {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffComponent {
    pub kind: ComponentKind,
    pub unit_price: Decimal,
    /// Only meaningful for `TimeOfDay`.
    #[serde(default)]
    pub brackets: Vec<TimeOfDayBracket>,
}

impl TariffComponent {
    pub fn new(kind: ComponentKind, unit_price: Decimal) -> Self {
        Self {
            kind,
            unit_price,
            brackets: Vec::new(),
        }
    }

    pub fn with_bracket(mut self, bracket: TimeOfDayBracket) -> Self {
        self.brackets.push(bracket);
        self
    }

    fn price_at(&self, at: DateTime<Utc>) -> Decimal {
        let time = at.time().with_nanosecond(0).unwrap_or_else(|| at.time());
        self.brackets
            .iter()
            .find(|b| b.contains(time))
            .map(|b| b.unit_price)
            .unwrap_or(self.unit_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: TariffId,
    pub tenant_id: TenantId,
    pub name: String,
    pub currency: Currency,
    pub is_active: bool,
    pub is_default: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Total never goes below this amount.
    pub min_total: Option<Decimal>,
    /// Total never goes above this amount.
    pub max_total: Option<Decimal>,
    pub components: Vec<TariffComponent>,
}

impl Tariff {
    pub fn new(
        id: impl Into<TariffId>,
        tenant_id: impl Into<TenantId>,
        name: impl Into<String>,
        currency: Currency,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            currency,
            is_active: true,
            is_default: false,
            valid_from: None,
            valid_until: None,
            min_total: None,
            max_total: None,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: TariffComponent) -> Self {
        self.components.push(component);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Active and inside its validity window (`valid_until` exclusive).
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.valid_from.is_some_and(|from| at < from) {
            return false;
        }
        if self.valid_until.is_some_and(|until| at >= until) {
            return false;
        }
        true
    }

    pub fn cost_breakdown(&self, usage: &SessionUsage) -> CostBreakdown {
        let mut line_items: Vec<LineItem> = self
            .components
            .iter()
            .map(|component| self.line_item(component, usage))
            .collect();

        let subtotal: Decimal = line_items.iter().map(|item| item.amount).sum();

        if let Some(min) = self.min_total.map(|m| self.currency.round(m)) {
            if subtotal < min {
                line_items.push(LineItem::adjustment(
                    LineItemKind::MinimumTotalAdjustment,
                    min - subtotal,
                ));
            }
        }
        if let Some(max) = self.max_total.map(|m| self.currency.round(m)) {
            if subtotal > max {
                line_items.push(LineItem::adjustment(
                    LineItemKind::MaximumTotalAdjustment,
                    max - subtotal,
                ));
            }
        }

        let total = line_items.iter().map(|item| item.amount).sum();
        CostBreakdown {
            tariff_id: self.id.clone(),
            currency: self.currency.clone(),
            line_items,
            total,
        }
    }

    fn line_item(&self, component: &TariffComponent, usage: &SessionUsage) -> LineItem {
        let (quantity, unit_price) = match component.kind {
            ComponentKind::Energy => (usage.energy_kwh(), component.unit_price),
            ComponentKind::ChargingTime => (minutes(usage.charging_secs), component.unit_price),
            ComponentKind::ParkingTime => (minutes(usage.parking_secs), component.unit_price),
            ComponentKind::IdleTime => (minutes(usage.idle_secs), component.unit_price),
            ComponentKind::SessionFee => (Decimal::ONE, component.unit_price),
            ComponentKind::TimeOfDay => (Decimal::ONE, component.price_at(usage.started_at)),
        };
        LineItem {
            kind: LineItemKind::from(component.kind),
            quantity,
            unit_price,
            amount: self.currency.round(unit_price * quantity),
        }
    }
}

fn minutes(seconds: i64) -> Decimal {
    Decimal::from(seconds.max(0)) / Decimal::from(SECONDS_PER_MINUTE)
}

/// Who a tariff link applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkTarget {
    User(UserId),
    Group(UserGroupId),
}

/// Lower `priority` wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffLink {
    pub tariff_id: TariffId,
    pub target: LinkTarget,
    pub priority: u32,
}

/// What a session consumed, in the bases the components price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub started_at: DateTime<Utc>,
    pub energy_wh: i64,
    pub charging_secs: i64,
    pub parking_secs: i64,
    pub idle_secs: i64,
}

impl SessionUsage {
    pub fn energy_kwh(&self) -> Decimal {
        Decimal::from(self.energy_wh.max(0)) / Decimal::from(WH_PER_KWH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineItemKind {
    Energy,
    ChargingTime,
    ParkingTime,
    SessionFee,
    IdleTime,
    TimeOfDay,
    MinimumTotalAdjustment,
    MaximumTotalAdjustment,
}

impl From<ComponentKind> for LineItemKind {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Energy => Self::Energy,
            ComponentKind::ChargingTime => Self::ChargingTime,
            ComponentKind::ParkingTime => Self::ParkingTime,
            ComponentKind::SessionFee => Self::SessionFee,
            ComponentKind::IdleTime => Self::IdleTime,
            ComponentKind::TimeOfDay => Self::TimeOfDay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Rounded to the currency minor unit.
    pub amount: Decimal,
}

impl LineItem {
    fn adjustment(kind: LineItemKind, amount: Decimal) -> Self {
        Self {
            kind,
            quantity: Decimal::ONE,
            unit_price: amount,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub tariff_id: TariffId,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    pub total: Decimal,
}

impl CostBreakdown {
    pub fn total_money(&self) -> Money {
        Money::new(self.total, self.currency.clone())
    }

    pub fn amount_of(&self, kind: LineItemKind) -> Option<Decimal> {
        self.line_items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| item.amount)
    }

    /// Line items add up to the total exactly.
    pub fn is_balanced(&self) -> bool {
        self.line_items.iter().map(|item| item.amount).sum::<Decimal>() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn eur_tariff() -> Tariff {
        Tariff::new("TF-1", "T1", "Standard", Currency::new("EUR"))
    }

    fn usage(energy_wh: i64) -> SessionUsage {
        SessionUsage {
            started_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            energy_wh,
            charging_secs: 0,
            parking_secs: 0,
            idle_secs: 0,
        }
    }

    #[test]
    fn energy_and_session_fee_example() {
        let tariff = eur_tariff()
            .with_component(TariffComponent::new(ComponentKind::Energy, dec("0.30")))
            .with_component(TariffComponent::new(ComponentKind::SessionFee, dec("1.00")));

        let bd = tariff.cost_breakdown(&usage(10_000));
        assert_eq!(bd.amount_of(LineItemKind::Energy), Some(dec("3.00")));
        assert_eq!(bd.amount_of(LineItemKind::SessionFee), Some(dec("1.00")));
        assert_eq!(bd.total, dec("4.00"));
        assert_eq!(bd.total_money().to_string(), "4.00 EUR");
        assert!(bd.is_balanced());
    }

    #[test]
    fn items_are_rounded_before_summing() {
        // 1.235 kWh * 0.333 = 0.411255 -> 0.41
        // 7 s at 0.10/min = 0.011666.. -> 0.01
        let tariff = eur_tariff()
            .with_component(TariffComponent::new(ComponentKind::Energy, dec("0.333")))
            .with_component(TariffComponent::new(ComponentKind::ChargingTime, dec("0.10")));
        let mut u = usage(1235);
        u.charging_secs = 7;

        let bd = tariff.cost_breakdown(&u);
        assert_eq!(bd.amount_of(LineItemKind::Energy), Some(dec("0.41")));
        assert_eq!(bd.amount_of(LineItemKind::ChargingTime), Some(dec("0.01")));
        assert_eq!(bd.total, dec("0.42"));
        assert!(bd.is_balanced());
    }

    #[test]
    fn half_cent_rounds_up() {
        // 0.5 kWh * 0.01 = 0.005 -> 0.01
        let tariff =
            eur_tariff().with_component(TariffComponent::new(ComponentKind::Energy, dec("0.01")));
        assert_eq!(tariff.cost_breakdown(&usage(500)).total, dec("0.01"));
    }

    #[test]
    fn time_components_use_their_own_basis() {
        let tariff = eur_tariff()
            .with_component(TariffComponent::new(ComponentKind::ChargingTime, dec("0.05")))
            .with_component(TariffComponent::new(ComponentKind::ParkingTime, dec("0.10")))
            .with_component(TariffComponent::new(ComponentKind::IdleTime, dec("0.50")));
        let mut u = usage(0);
        u.charging_secs = 20 * 60;
        u.parking_secs = 5 * 60;
        u.idle_secs = 10 * 60;

        let bd = tariff.cost_breakdown(&u);
        assert_eq!(bd.amount_of(LineItemKind::ChargingTime), Some(dec("1.00")));
        assert_eq!(bd.amount_of(LineItemKind::ParkingTime), Some(dec("0.50")));
        assert_eq!(bd.amount_of(LineItemKind::IdleTime), Some(dec("5.00")));
        assert_eq!(bd.total, dec("6.50"));
    }

    #[test]
    fn time_of_day_picks_bracket_at_start() {
        let component = TariffComponent::new(ComponentKind::TimeOfDay, dec("0.50"))
            .with_bracket(TimeOfDayBracket {
                start: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                unit_price: dec("2.00"),
            })
            .with_bracket(TimeOfDayBracket {
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
                unit_price: dec("0.25"),
            });
        let tariff = eur_tariff().with_component(component);

        let mut u = usage(0);
        assert_eq!(tariff.cost_breakdown(&u).total, dec("2.00"));

        u.started_at = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        assert_eq!(tariff.cost_breakdown(&u).total, dec("0.25"));

        // 20:00 is outside every bracket: component price applies
        u.started_at = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        assert_eq!(tariff.cost_breakdown(&u).total, dec("0.50"));
    }

    #[test]
    fn minimum_total_adds_an_adjustment_item() {
        let mut tariff =
            eur_tariff().with_component(TariffComponent::new(ComponentKind::Energy, dec("0.30")));
        tariff.min_total = Some(dec("2.00"));

        let bd = tariff.cost_breakdown(&usage(1000));
        assert_eq!(
            bd.amount_of(LineItemKind::MinimumTotalAdjustment),
            Some(dec("1.70"))
        );
        assert_eq!(bd.total, dec("2.00"));
        assert!(bd.is_balanced());
    }

    #[test]
    fn maximum_total_caps_with_negative_adjustment() {
        let mut tariff =
            eur_tariff().with_component(TariffComponent::new(ComponentKind::Energy, dec("0.30")));
        tariff.max_total = Some(dec("10"));

        let bd = tariff.cost_breakdown(&usage(100_000));
        assert_eq!(
            bd.amount_of(LineItemKind::MaximumTotalAdjustment),
            Some(dec("-20.00"))
        );
        assert_eq!(bd.total, dec("10.00"));
        assert!(bd.is_balanced());
    }

    #[test]
    fn balanced_for_awkward_inputs() {
        let tariff = eur_tariff()
            .with_component(TariffComponent::new(ComponentKind::Energy, dec("0.3333")))
            .with_component(TariffComponent::new(ComponentKind::ChargingTime, dec("0.0117")))
            .with_component(TariffComponent::new(ComponentKind::ParkingTime, dec("0.0251")))
            .with_component(TariffComponent::new(ComponentKind::IdleTime, dec("0.0999")))
            .with_component(TariffComponent::new(ComponentKind::SessionFee, dec("0.995")));

        for step in 0..50_i64 {
            let u = SessionUsage {
                started_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
                energy_wh: step * 997 + 13,
                charging_secs: step * 61 + 7,
                parking_secs: step * 43,
                idle_secs: step * 29 + 1,
            };
            let bd = tariff.cost_breakdown(&u);
            assert!(bd.is_balanced(), "unbalanced at step {step}: {bd:?}");
            assert_eq!(bd.total, bd.total.round_dp(2));
        }
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let mut tariff = eur_tariff();
        assert!(tariff.is_valid_at(now));

        tariff.valid_from = Some(now + Duration::hours(1));
        assert!(!tariff.is_valid_at(now));

        tariff.valid_from = Some(now - Duration::hours(2));
        tariff.valid_until = Some(now);
        assert!(!tariff.is_valid_at(now));

        tariff.valid_until = None;
        tariff.is_active = false;
        assert!(!tariff.is_valid_at(now));
    }
}
