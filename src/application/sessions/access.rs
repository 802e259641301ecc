//! Who may charge where
//!
//! A user may start a session on a station when the user is active, belongs
//! to the station's tenant and one of the user's groups has been granted
//! the station's group.

use std::sync::Arc;

use tracing::debug;

use crate::domain::access::{AuthorizationMethod, UserAccount};
use crate::domain::ports::granted_station_groups;
use crate::domain::{DirectoryPort, Station, StationGroupId, UserId, VehicleId};
use crate::support::{CoreError, CoreResult};

/// Verdict on an id tag presented at a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagVerdict {
    Accepted,
    Blocked,
    Invalid,
    ConcurrentTx,
}

#[derive(Clone)]
pub struct AccessGate {
    directory: Arc<dyn DirectoryPort>,
}

impl AccessGate {
    pub fn new(directory: Arc<dyn DirectoryPort>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn DirectoryPort> {
        &self.directory
    }

    pub async fn visible_station_groups(&self, user_id: &UserId) -> CoreResult<Vec<StationGroupId>> {
        granted_station_groups(self.directory.as_ref(), user_id).await
    }

    /// The user account, if it may charge at `station`.
    pub async fn check_station_access(
        &self,
        user_id: &UserId,
        station: &Station,
    ) -> CoreResult<UserAccount> {
        let user = self
            .directory
            .user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;

        if !user.active {
            return Err(CoreError::AccessDenied(format!("user {} is inactive", user_id)));
        }
        if user.tenant_id != station.tenant_id {
            return Err(CoreError::AccessDenied(format!(
                "user {} does not belong to the tenant of station {}",
                user_id, station.id
            )));
        }

        let granted = self.visible_station_groups(user_id).await?;
        if !granted.contains(&station.station_group_id) {
            debug!(
                user_id = %user_id,
                station_id = %station.id,
                station_group_id = %station.station_group_id,
                "No group grants access to station"
            );
            return Err(CoreError::AccessDenied(format!(
                "user {} may not use station {}",
                user_id, station.id
            )));
        }
        Ok(user)
    }

    pub async fn authorization_method(&self, user_id: &UserId) -> CoreResult<AuthorizationMethod> {
        self.directory
            .active_authorization_method(user_id)
            .await?
            .ok_or_else(|| CoreError::NoAuthorizationMethod(user_id.clone()))
    }

    /// The vehicle must exist and belong to the user.
    pub async fn check_vehicle(&self, user_id: &UserId, vehicle_id: &VehicleId) -> CoreResult<()> {
        let vehicle = self
            .directory
            .vehicle(vehicle_id)
            .await?
            .ok_or_else(|| CoreError::not_found("vehicle", vehicle_id))?;
        if &vehicle.owner != user_id {
            return Err(CoreError::AccessDenied(format!(
                "vehicle {} does not belong to user {}",
                vehicle_id, user_id
            )));
        }
        Ok(())
    }

    /// Resolve an id tag presented at `station` to the user behind it.
    pub async fn verify_tag(
        &self,
        id_tag: &str,
        station: &Station,
    ) -> CoreResult<(TagVerdict, Option<(UserAccount, AuthorizationMethod)>)> {
        let Some(method) = self.directory.authorization_method_by_tag(id_tag).await? else {
            return Ok((TagVerdict::Invalid, None));
        };
        if !method.active {
            return Ok((TagVerdict::Blocked, None));
        }
        match self.check_station_access(&method.user_id, station).await {
            Ok(user) => Ok((TagVerdict::Accepted, Some((user, method)))),
            Err(CoreError::AccessDenied(reason)) => {
                debug!(station_id = %station.id, reason, "Id tag refused");
                Ok((TagVerdict::Invalid, None))
            }
            Err(CoreError::NotFound { .. }) => Ok((TagVerdict::Invalid, None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Vehicle;
    use crate::infrastructure::InMemoryDirectory;

    fn gate() -> (AccessGate, Arc<InMemoryDirectory>) {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user(UserAccount::new("U1", "T1"));
        directory.add_user_to_group("U1", "G1");
        directory.grant_station_group("G1", "SG-1");
        directory.add_authorization_method(AuthorizationMethod::new("AM-1", "U1", "TAG-1"));
        (AccessGate::new(directory.clone()), directory)
    }

    #[tokio::test]
    async fn granted_group_allows_station() {
        let (gate, _) = gate();
        let station = Station::new("ST-1", "T1", "SG-1");
        assert!(gate.check_station_access(&"U1".into(), &station).await.is_ok());

        let other = Station::new("ST-2", "T1", "SG-2");
        assert!(matches!(
            gate.check_station_access(&"U1".into(), &other).await,
            Err(CoreError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn other_tenant_is_denied() {
        let (gate, _) = gate();
        let station = Station::new("ST-9", "T2", "SG-1");
        assert!(matches!(
            gate.check_station_access(&"U1".into(), &station).await,
            Err(CoreError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn vehicle_must_be_owned() {
        let (gate, directory) = gate();
        directory.add_vehicle(Vehicle {
            id: "V1".into(),
            owner: "U2".into(),
            display_name: "Van".into(),
        });
        assert!(matches!(
            gate.check_vehicle(&"U1".into(), &"V1".into()).await,
            Err(CoreError::AccessDenied(_))
        ));
        assert!(matches!(
            gate.check_vehicle(&"U1".into(), &"V9".into()).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tag_verdicts() {
        let (gate, directory) = gate();
        let station = Station::new("ST-1", "T1", "SG-1");

        let (verdict, who) = gate.verify_tag("TAG-1", &station).await.unwrap();
        assert_eq!(verdict, TagVerdict::Accepted);
        assert_eq!(who.unwrap().0.id.as_str(), "U1");

        assert_eq!(
            gate.verify_tag("NOPE", &station).await.unwrap().0,
            TagVerdict::Invalid
        );

        directory.set_authorization_method_active(&"AM-1".into(), false);
        assert_eq!(
            gate.verify_tag("TAG-1", &station).await.unwrap().0,
            TagVerdict::Blocked
        );
    }
}
