use thiserror::Error;

use crate::domain::{ChargePointId, SessionId, StationId, TenantId, UserId};

/// Every expected failure the core reports to its callers.
///
/// Device and network failures are never retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Station {0} has no live link")]
    DeviceUnreachable(StationId),

    #[error("Station {station_id} did not answer {action} within the deadline")]
    DeviceTimeout {
        station_id: StationId,
        action: &'static str,
    },

    #[error("Station {station_id} rejected {action}: {status}")]
    DeviceRejected {
        station_id: StationId,
        action: &'static str,
        status: String,
    },

    #[error("Charge point {0} already has a session in progress")]
    ChargePointBusy(ChargePointId),

    #[error("Charge point {charge_point_id} is {status}")]
    ChargePointUnavailable {
        charge_point_id: ChargePointId,
        status: String,
    },

    #[error("Session {session_id} is {state}, operation not allowed")]
    InvalidSessionState { session_id: SessionId, state: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("User {0} has no active authorization method")]
    NoAuthorizationMethod(UserId),

    #[error("No tariff available for user {user_id} in tenant {tenant_id}")]
    NoTariffAvailable { user_id: UserId, tenant_id: TenantId },

    #[error("Discarded out-of-order event for station {station_id}")]
    StaleEvent {
        station_id: StationId,
        charge_point_id: Option<ChargePointId>,
    },

    #[error("Link for station {0} is not the registered one")]
    LinkNotRegistered(StationId),

    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Errors that only concern device bookkeeping and are logged instead of
    /// being handed to an external collaborator.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::StaleEvent { .. } | Self::LinkNotRegistered(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
