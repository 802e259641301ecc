//! Tariff resolution
//!
//! Candidates are the tariffs linked to the user directly or to any of the
//! user's groups. They are tried in link priority order (lower first; a
//! direct user link beats a group link of equal priority, then tariff id)
//! and the first one valid now wins. Otherwise the tenant's valid default
//! tariff applies.

use std::sync::Arc;

use tracing::debug;

use super::catalog::SharedTariffCatalog;
use crate::domain::tariff::{LinkTarget, Tariff, TariffLink};
use crate::domain::{DirectoryPort, TenantId, UserId};
use crate::support::{CoreError, CoreResult, SharedClock};

pub struct TariffResolver {
    catalog: SharedTariffCatalog,
    directory: Arc<dyn DirectoryPort>,
    clock: SharedClock,
}

impl TariffResolver {
    pub fn new(
        catalog: SharedTariffCatalog,
        directory: Arc<dyn DirectoryPort>,
        clock: SharedClock,
    ) -> Self {
        Self {
            catalog,
            directory,
            clock,
        }
    }

    pub async fn resolve_tariff(&self, user_id: &UserId, tenant_id: &TenantId) -> CoreResult<Tariff> {
        let groups = self.directory.user_groups(user_id).await?;
        let now = self.clock.now();

        let mut candidates: Vec<_> = self
            .catalog
            .links(tenant_id)
            .into_iter()
            .filter(|link| match &link.target {
                LinkTarget::User(u) => u == user_id,
                LinkTarget::Group(g) => groups.contains(g),
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| target_rank(a).cmp(&target_rank(b)))
                .then_with(|| a.tariff_id.cmp(&b.tariff_id))
        });

        for link in &candidates {
            if let Some(tariff) = self.catalog.tariff(tenant_id, &link.tariff_id) {
                if tariff.is_valid_at(now) {
                    debug!(
                        user_id = %user_id,
                        tariff_id = %tariff.id,
                        priority = link.priority,
                        "Tariff resolved from link"
                    );
                    return Ok(tariff);
                }
            }
        }

        let mut defaults: Vec<Tariff> = self
            .catalog
            .tariffs(tenant_id)
            .into_iter()
            .filter(|t| t.is_default && t.is_valid_at(now))
            .collect();
        defaults.sort_by(|a, b| a.id.cmp(&b.id));

        defaults
            .into_iter()
            .next()
            .inspect(|t| debug!(user_id = %user_id, tariff_id = %t.id, "Default tariff applied"))
            .ok_or_else(|| CoreError::NoTariffAvailable {
                user_id: user_id.clone(),
                tenant_id: tenant_id.clone(),
            })
    }
}

fn target_rank(link: &TariffLink) -> u8 {
    match link.target {
        LinkTarget::User(_) => 0,
        LinkTarget::Group(_) => 1,
    }
}
