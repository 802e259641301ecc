//! Users, vehicles and the authorization methods that let them charge

use serde::{Deserialize, Serialize};

use crate::domain::{AuthorizationMethodId, TenantId, UserId, VehicleId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub active: bool,
}

impl UserAccount {
    pub fn new(id: impl Into<UserId>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            active: true,
        }
    }
}

/// RFID card, app token or similar. `id_tag` is what the device sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMethod {
    pub id: AuthorizationMethodId,
    pub user_id: UserId,
    pub id_tag: String,
    pub active: bool,
}

impl AuthorizationMethod {
    pub fn new(
        id: impl Into<AuthorizationMethodId>,
        user_id: impl Into<UserId>,
        id_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            id_tag: id_tag.into(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub owner: UserId,
    pub display_name: String,
}
