pub mod access;
pub mod ids;
pub mod ocpp;
pub mod ports;
pub mod session;
pub mod station;
pub mod tariff;

// Re-export commonly used types
pub use access::{AuthorizationMethod, UserAccount, Vehicle};
pub use ids::{
    AuthorizationMethodId, ChargePointId, SessionId, StationGroupId, StationId, TariffId,
    TenantId, UserGroupId, UserId, VehicleId,
};
pub use ocpp::OcppVersion;
pub use ports::DirectoryPort;
pub use session::{ChargingSession, EndReason, SessionStatus, StopActor};
pub use station::{
    BootInfo, ChargePoint, ChargePointSnapshot, DeviceStatus, MaintenanceKind,
    MaintenanceRecord, ReportedStatus, Station, StationSnapshot,
};
pub use tariff::{CostBreakdown, Currency, Money, Tariff, TariffComponent, TariffLink};
