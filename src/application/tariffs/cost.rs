//! Session cost computation

use chrono::{DateTime, Utc};

use crate::domain::tariff::{CostBreakdown, Tariff};
use crate::domain::ChargingSession;

/// Cost of `session` under `tariff`. Ended sessions are priced at their
/// frozen end; running ones as of `at`.
pub fn compute_cost(session: &ChargingSession, tariff: &Tariff, at: DateTime<Utc>) -> CostBreakdown {
    let usage = session.usage_at(at);
    let breakdown = tariff.cost_breakdown(&usage);
    metrics::counter!("chargegrid_cost_computations_total").increment(1);
    breakdown
}
