//! In-memory directory
//!
//! `DirectoryPort` backed by concurrent maps, for tests and single-node
//! deployments that provision users at start-up.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::access::{AuthorizationMethod, UserAccount, Vehicle};
use crate::domain::{
    AuthorizationMethodId, DirectoryPort, StationGroupId, UserGroupId, UserId, VehicleId,
};
use crate::support::CoreResult;

#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, UserAccount>,
    memberships: DashMap<UserId, Vec<UserGroupId>>,
    grants: DashMap<UserGroupId, Vec<StationGroupId>>,
    authorization_methods: DashMap<AuthorizationMethodId, AuthorizationMethod>,
    vehicles: DashMap<VehicleId, Vehicle>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserAccount) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn set_user_active(&self, user_id: &UserId, active: bool) {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.active = active;
        }
    }

    pub fn add_user_to_group(&self, user_id: impl Into<UserId>, group_id: impl Into<UserGroupId>) {
        let group_id = group_id.into();
        let mut groups = self.memberships.entry(user_id.into()).or_default();
        if !groups.contains(&group_id) {
            groups.push(group_id);
        }
    }

    pub fn remove_user_from_group(&self, user_id: &UserId, group_id: &UserGroupId) {
        if let Some(mut groups) = self.memberships.get_mut(user_id) {
            groups.retain(|g| g != group_id);
        }
    }

    pub fn grant_station_group(
        &self,
        group_id: impl Into<UserGroupId>,
        station_group_id: impl Into<StationGroupId>,
    ) {
        let station_group_id = station_group_id.into();
        let mut granted = self.grants.entry(group_id.into()).or_default();
        if !granted.contains(&station_group_id) {
            granted.push(station_group_id);
        }
    }

    pub fn revoke_station_group(&self, group_id: &UserGroupId, station_group_id: &StationGroupId) {
        if let Some(mut granted) = self.grants.get_mut(group_id) {
            granted.retain(|g| g != station_group_id);
        }
    }

    pub fn add_authorization_method(&self, method: AuthorizationMethod) {
        self.authorization_methods.insert(method.id.clone(), method);
    }

    pub fn set_authorization_method_active(&self, id: &AuthorizationMethodId, active: bool) {
        if let Some(mut method) = self.authorization_methods.get_mut(id) {
            method.active = active;
        }
    }

    pub fn add_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
    }
}

#[async_trait]
impl DirectoryPort for InMemoryDirectory {
    async fn user(&self, user_id: &UserId) -> CoreResult<Option<UserAccount>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn user_groups(&self, user_id: &UserId) -> CoreResult<Vec<UserGroupId>> {
        Ok(self
            .memberships
            .get(user_id)
            .map(|g| g.clone())
            .unwrap_or_default())
    }

    async fn station_group_grants(
        &self,
        group_id: &UserGroupId,
    ) -> CoreResult<Vec<StationGroupId>> {
        Ok(self
            .grants
            .get(group_id)
            .map(|g| g.clone())
            .unwrap_or_default())
    }

    async fn active_authorization_method(
        &self,
        user_id: &UserId,
    ) -> CoreResult<Option<AuthorizationMethod>> {
        let mut methods: Vec<AuthorizationMethod> = self
            .authorization_methods
            .iter()
            .filter(|m| &m.user_id == user_id && m.active)
            .map(|m| m.clone())
            .collect();
        methods.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(methods.into_iter().next())
    }

    async fn authorization_method_by_tag(
        &self,
        id_tag: &str,
    ) -> CoreResult<Option<AuthorizationMethod>> {
        Ok(self
            .authorization_methods
            .iter()
            .find(|m| m.id_tag == id_tag)
            .map(|m| m.clone()))
    }

    async fn vehicle(&self, vehicle_id: &VehicleId) -> CoreResult<Option<Vehicle>> {
        Ok(self.vehicles.get(vehicle_id).map(|v| v.clone()))
    }
}
