//! Directory port
//!
//! Who a user is, which groups they belong to, which station groups those
//! groups may use, and how they authenticate at a device. Owned by the
//! administration side; the core only reads it.

use async_trait::async_trait;

use crate::domain::access::{AuthorizationMethod, UserAccount, Vehicle};
use crate::domain::{StationGroupId, UserGroupId, UserId, VehicleId};
use crate::support::CoreResult;

#[async_trait]
pub trait DirectoryPort: Send + Sync {
    async fn user(&self, user_id: &UserId) -> CoreResult<Option<UserAccount>>;

    async fn user_groups(&self, user_id: &UserId) -> CoreResult<Vec<UserGroupId>>;

    /// Station groups a user group has been granted.
    async fn station_group_grants(&self, group_id: &UserGroupId)
        -> CoreResult<Vec<StationGroupId>>;

    /// First active authorization method of the user, if any.
    async fn active_authorization_method(
        &self,
        user_id: &UserId,
    ) -> CoreResult<Option<AuthorizationMethod>>;

    /// Resolve the id tag a device presented.
    async fn authorization_method_by_tag(
        &self,
        id_tag: &str,
    ) -> CoreResult<Option<AuthorizationMethod>>;

    async fn vehicle(&self, vehicle_id: &VehicleId) -> CoreResult<Option<Vehicle>>;
}

/// Station groups reachable by the user through any of their groups.
pub async fn granted_station_groups(
    directory: &dyn DirectoryPort,
    user_id: &UserId,
) -> CoreResult<Vec<StationGroupId>> {
    let mut granted = Vec::new();
    for group in directory.user_groups(user_id).await? {
        for station_group in directory.station_group_grants(&group).await? {
            if !granted.contains(&station_group) {
                granted.push(station_group);
            }
        }
    }
    Ok(granted)
}
