//! Tariff catalog
//!
//! Tariffs and their user / group links, sharded by tenant.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::domain::tariff::{LinkTarget, Tariff, TariffLink};
use crate::domain::{TariffId, TenantId};
use crate::support::{CoreError, CoreResult};

#[derive(Default)]
struct TenantTariffs {
    tariffs: Vec<Tariff>,
    links: Vec<TariffLink>,
}

#[derive(Default)]
pub struct TariffCatalog {
    tenants: DashMap<TenantId, TenantTariffs>,
}

pub type SharedTariffCatalog = Arc<TariffCatalog>;

impl TariffCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tariff by id.
    pub fn upsert(&self, tariff: Tariff) {
        info!(
            tariff_id = %tariff.id,
            tenant_id = %tariff.tenant_id,
            components = tariff.components.len(),
            "Tariff stored"
        );
        let mut tenant = self.tenants.entry(tariff.tenant_id.clone()).or_default();
        match tenant.tariffs.iter_mut().find(|t| t.id == tariff.id) {
            Some(existing) => *existing = tariff,
            None => tenant.tariffs.push(tariff),
        }
    }

    /// Link a tariff of `tenant_id` to a user or group.
    pub fn link(&self, tenant_id: &TenantId, link: TariffLink) -> CoreResult<()> {
        let mut tenant = self
            .tenants
            .get_mut(tenant_id)
            .ok_or_else(|| CoreError::not_found("tariff", &link.tariff_id))?;
        if !tenant.tariffs.iter().any(|t| t.id == link.tariff_id) {
            return Err(CoreError::not_found("tariff", &link.tariff_id));
        }
        tenant
            .links
            .retain(|l| !(l.tariff_id == link.tariff_id && l.target == link.target));
        tenant.links.push(link);
        Ok(())
    }

    pub fn unlink(&self, tenant_id: &TenantId, tariff_id: &TariffId, target: &LinkTarget) {
        if let Some(mut tenant) = self.tenants.get_mut(tenant_id) {
            tenant
                .links
                .retain(|l| !(&l.tariff_id == tariff_id && &l.target == target));
        }
    }

    pub fn tariff(&self, tenant_id: &TenantId, tariff_id: &TariffId) -> Option<Tariff> {
        self.tenants
            .get(tenant_id)
            .and_then(|t| t.tariffs.iter().find(|t| &t.id == tariff_id).cloned())
    }

    pub fn tariffs(&self, tenant_id: &TenantId) -> Vec<Tariff> {
        self.tenants
            .get(tenant_id)
            .map(|t| t.tariffs.clone())
            .unwrap_or_default()
    }

    pub fn links(&self, tenant_id: &TenantId) -> Vec<TariffLink> {
        self.tenants
            .get(tenant_id)
            .map(|t| t.links.clone())
            .unwrap_or_default()
    }
}
