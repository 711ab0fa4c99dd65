//! `create_vm` cloud properties and the guest template built from them.

use crate::stemcell::Stemcell;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use softlayer_client::models::NetworkComponent;
use softlayer_client::{BlockDeviceTemplateGroup, Location, SshKey, VirtualGuest};

/// CPUs ordered when the director leaves `startCpus` at zero.
pub const DEFAULT_START_CPUS: u32 = 4;
/// Memory ordered when the director leaves `maxMemory` at zero.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 8192;
/// Domain used when none is given.
pub const DEFAULT_DOMAIN: &str = "softlayer.com";
/// Port speed of the default network component.
pub const DEFAULT_NETWORK_SPEED_MBPS: u32 = 1000;

/// Datacenter selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatacenterProperties {
    /// Short name, e.g. `dal09`
    #[serde(default)]
    pub name: String,
}

/// `create_vm` cloud properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmCloudProperties {
    /// Host name, or its prefix when a director IP is given
    #[serde(default)]
    pub vm_name_prefix: String,

    /// Domain
    #[serde(default)]
    pub domain: String,

    /// CPU count
    #[serde(default)]
    pub start_cpus: u32,

    /// Memory in MB
    #[serde(default)]
    pub max_memory: u64,

    /// Datacenter
    #[serde(default)]
    pub datacenter: DatacenterProperties,

    /// Second disk size in GB; 0 orders none
    #[serde(default)]
    pub ephemeral_disk_size: i64,

    /// Hourly instead of monthly billing
    #[serde(default)]
    pub hourly_billing_flag: bool,

    /// Local instead of SAN disks
    #[serde(default)]
    pub local_disk_flag: bool,

    /// Dedicated host
    #[serde(default)]
    pub dedicated_account_host_only_flag: bool,

    /// No public interface
    #[serde(default)]
    pub private_network_only_flag: bool,

    /// Port speeds
    #[serde(default)]
    pub network_components: Vec<NetworkComponent>,

    /// Public VLAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_network_component: Option<NetworkComponent>,

    /// Private VLAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_backend_network_component: Option<NetworkComponent>,

    /// SSH keys installed on the guest
    #[serde(default)]
    pub ssh_keys: Vec<SshKey>,

    /// Director address; empty when bootstrapping a director
    #[serde(default, rename = "bosh_ip")]
    pub bosh_ip: String,
}

/// `YYYYMMDD-hhmmss-mmm` with a 12 hour clock, appended to name prefixes.
#[must_use]
pub fn timestamped_prefix(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}{}{:03}",
        now.format("%Y%m%d-%I%M%S-"),
        now.nanosecond() / 1_000_000 % 1000
    )
}

impl VmCloudProperties {
    /// Fill in defaults for everything the director left unset.
    ///
    /// With a director IP the name prefix is time stamped so repeated creates get distinct
    /// host names.
    #[must_use]
    pub fn with_defaults(mut self, now: DateTime<Utc>) -> Self {
        if self.start_cpus == 0 {
            self.start_cpus = DEFAULT_START_CPUS;
        }
        if self.max_memory == 0 {
            self.max_memory = DEFAULT_MAX_MEMORY_MB;
        }
        if self.domain.is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        if self.network_components.is_empty() {
            self.network_components = vec![NetworkComponent {
                max_speed: Some(DEFAULT_NETWORK_SPEED_MBPS),
                ..NetworkComponent::default()
            }];
        }
        if !self.bosh_ip.is_empty() {
            self.vm_name_prefix = timestamped_prefix(&self.vm_name_prefix, now);
        }
        self
    }

    /// The director address, if one was given.
    #[must_use]
    pub fn bosh_ip(&self) -> Option<&str> {
        Some(self.bosh_ip.as_str()).filter(|ip| !ip.is_empty())
    }

    /// Ids of the requested SSH keys.
    #[must_use]
    pub fn ssh_key_ids(&self) -> Vec<i64> {
        self.ssh_keys.iter().filter_map(|key| key.id).collect()
    }

    /// The creation template for a guest booting `stemcell`.
    ///
    /// `extra_ssh_key` is appended to the requested keys.
    #[must_use]
    pub fn virtual_guest_template(
        &self,
        stemcell: &Stemcell,
        extra_ssh_key: Option<i64>,
    ) -> VirtualGuest {
        let mut ssh_keys: Vec<SshKey> = self
            .ssh_key_ids()
            .into_iter()
            .chain(extra_ssh_key)
            .map(|id| SshKey {
                id: Some(id),
                ..SshKey::default()
            })
            .collect();
        ssh_keys.dedup_by_key(|key| key.id);

        VirtualGuest {
            hostname: Some(self.vm_name_prefix.clone()),
            domain: Some(self.domain.clone()),
            start_cpus: Some(self.start_cpus),
            max_memory: Some(self.max_memory),
            datacenter: Some(Location::named(self.datacenter.name.clone())),
            block_device_template_group: Some(BlockDeviceTemplateGroup {
                global_identifier: Some(stemcell.uuid.clone()),
                ..BlockDeviceTemplateGroup::default()
            }),
            hourly_billing_flag: Some(self.hourly_billing_flag),
            local_disk_flag: Some(self.local_disk_flag),
            dedicated_account_host_only_flag: Some(self.dedicated_account_host_only_flag),
            private_network_only_flag: Some(self.private_network_only_flag),
            network_components: Some(self.network_components.clone()),
            primary_network_component: self.primary_network_component.clone(),
            primary_backend_network_component: self.primary_backend_network_component.clone(),
            ssh_keys: (!ssh_keys.is_empty()).then_some(ssh_keys),
            ..VirtualGuest::default()
        }
    }
}
