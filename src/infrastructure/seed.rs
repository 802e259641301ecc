//! Start-up provisioning file
//!
//! Single-node deployments describe their stations, tariffs and users in a
//! TOML file that is loaded once into the core and the in-memory directory.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::ChargingCore;
use crate::config::ConfigError;
use crate::domain::access::{AuthorizationMethod, UserAccount, Vehicle};
use crate::domain::{Station, StationGroupId, Tariff, TariffLink, TenantId, UserGroupId, UserId};
use crate::infrastructure::InMemoryDirectory;
use crate::support::CoreResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTariffLink {
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub link: TariffLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMembership {
    pub user_id: UserId,
    pub group_id: UserGroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedGrant {
    pub group_id: UserGroupId,
    pub station_group_id: StationGroupId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub stations: Vec<Station>,
    pub tariffs: Vec<Tariff>,
    pub tariff_links: Vec<SeedTariffLink>,
    pub users: Vec<UserAccount>,
    pub memberships: Vec<SeedMembership>,
    pub grants: Vec<SeedGrant>,
    pub authorization_methods: Vec<AuthorizationMethod>,
    pub vehicles: Vec<Vehicle>,
}

impl SeedData {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load everything into `core` and `directory`. Tariffs go in before
    /// their links so a link never points at an unknown tariff.
    pub fn apply(self, core: &ChargingCore, directory: &InMemoryDirectory) -> CoreResult<()> {
        info!(
            stations = self.stations.len(),
            tariffs = self.tariffs.len(),
            users = self.users.len(),
            "Applying provisioning file"
        );
        for user in self.users {
            directory.add_user(user);
        }
        for membership in self.memberships {
            directory.add_user_to_group(membership.user_id, membership.group_id);
        }
        for grant in self.grants {
            directory.grant_station_group(grant.group_id, grant.station_group_id);
        }
        for method in self.authorization_methods {
            directory.add_authorization_method(method);
        }
        for vehicle in self.vehicles {
            directory.add_vehicle(vehicle);
        }
        for station in self.stations {
            core.provision_station(station);
        }
        for tariff in self.tariffs {
            core.upsert_tariff(tariff);
        }
        for entry in self.tariff_links {
            core.link_tariff(&entry.tenant_id, entry.link)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::domain::DirectoryPort;

    const SEED: &str = r#"
        [[stations]]
        id = "ST-1"
        tenant_id = "T1"
        station_group_id = "SG-1"
        protocol = "V16"
        max_power_w = 22000
        active = true

        [[stations.charge_points]]
        id = "CP-1"
        connector_id = 1
        connectors = []
        capabilities = { smart_charging = false, remote_start_stop = true, reservation = false }

        [[tariffs]]
        id = "TF-1"
        tenant_id = "T1"
        name = "Standard"
        currency = "EUR"
        is_active = true
        is_default = true
        components = [
            { kind = "Energy", unit_price = "0.30" },
            { kind = "SessionFee", unit_price = "1.00" },
        ]

        [[tariff_links]]
        tenant_id = "T1"
        tariff_id = "TF-1"
        target = { Group = "G1" }
        priority = 1

        [[users]]
        id = "U1"
        tenant_id = "T1"
        active = true

        [[memberships]]
        user_id = "U1"
        group_id = "G1"

        [[grants]]
        group_id = "G1"
        station_group_id = "SG-1"

        [[authorization_methods]]
        id = "AM-1"
        user_id = "U1"
        id_tag = "TAG-1"
        active = true
    "#;

    #[tokio::test]
    async fn provisioning_file_populates_core_and_directory() {
        let seed = SeedData::from_toml(SEED).unwrap();
        assert_eq!(seed.stations[0].charge_points.len(), 1);

        let directory = Arc::new(InMemoryDirectory::new());
        let core = ChargingCore::new(&AppConfig::default(), directory.clone());
        seed.apply(&core, &directory).unwrap();

        assert!(core.is_known_station(&"ST-1".into()));
        assert_eq!(
            directory.user_groups(&"U1".into()).await.unwrap(),
            vec![UserGroupId::from("G1")]
        );
        let visible = core.visible_stations(&"U1".into()).await.unwrap();
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn empty_file_is_valid() {
        assert_eq!(SeedData::from_toml("").unwrap(), SeedData::default());
    }
}
