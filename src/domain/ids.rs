//! Opaque identifiers
//!
//! All identifiers are opaque strings assigned by collaborators (or by the
//! core for sessions). Newtypes keep a station id from being passed where a
//! charge-point id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Business station identity; also the OCPP charge box identity in the
    /// WebSocket path.
    StationId
);
opaque_id!(ChargePointId);
opaque_id!(SessionId);
opaque_id!(UserId);
opaque_id!(UserGroupId);
opaque_id!(StationGroupId);
opaque_id!(TenantId);
opaque_id!(TariffId);
opaque_id!(VehicleId);
opaque_id!(AuthorizationMethodId);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
