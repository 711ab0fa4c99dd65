//! BOSH network settings and the create path they select.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use softlayer_cpi_core::{Error, Result};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Network type letting SoftLayer assign addresses.
pub const NETWORK_TYPE_DYNAMIC: &str = "dynamic";
/// Statically addressed network.
pub const NETWORK_TYPE_MANUAL: &str = "manual";
/// Floating IP network.
pub const NETWORK_TYPE_VIP: &str = "vip";

/// One network as BOSH describes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Network {
    /// `dynamic`, `manual` or `vip`.
    #[serde(rename = "type", default)]
    pub network_type: String,

    /// Requested IP; empty when SoftLayer should pick.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    /// Netmask
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub netmask: String,

    /// Gateway
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,

    /// DNS servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,

    /// Settings this network provides by default (`dns`, `gateway`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<String>,

    /// Whether the network is configured outside BOSH
    #[serde(default)]
    pub preconfigured: bool,

    /// IaaS specific settings
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub cloud_properties: Map<String, Value>,
}

impl Network {
    /// Whether this is a dynamic network.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.network_type == NETWORK_TYPE_DYNAMIC
    }
}

/// Networks by name.
pub type Networks = BTreeMap<String, Network>;

/// How a VM is obtained for `create_vm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatePath {
    /// Order a new virtual guest.
    Provision,
    /// Re-image the existing guest holding this IP.
    OsReload {
        /// IP of the dynamic network.
        ip: String,
    },
}

/// Validate `networks` and pick the create path.
///
/// Every network must be dynamic and exactly one must be present. A dynamic network with an
/// IP selects the OS reload path unless `disable_os_reload` is set.
///
/// # Errors
///
/// Returns [`Error::NotSupported`] for manual, vip or unknown network types and
/// [`Error::InvalidNetwork`] when there is not exactly one dynamic network.
pub fn select_create_path(networks: &Networks, disable_os_reload: bool) -> Result<CreatePath> {
    for (name, network) in networks {
        match network.network_type.as_str() {
            NETWORK_TYPE_DYNAMIC => {}
            NETWORK_TYPE_MANUAL => {
                return Err(Error::NotSupported(format!(
                    "Manual network '{name}' is not supported on SoftLayer"
                )))
            }
            NETWORK_TYPE_VIP => {
                return Err(Error::NotSupported(format!(
                    "VIP network '{name}' is not supported on SoftLayer"
                )))
            }
            other => {
                return Err(Error::NotSupported(format!(
                    "SoftLayer does not support network type '{other}' of network '{name}'"
                )))
            }
        }
    }

    let mut dynamic = networks.values().filter(|n| n.is_dynamic());
    let network = match (dynamic.next(), dynamic.next()) {
        (Some(network), None) => network,
        (None, _) => {
            return Err(Error::InvalidNetwork(
                "Exactly one dynamic network is required, found none".to_string(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(Error::InvalidNetwork(
                "Exactly one dynamic network is required, found several".to_string(),
            ))
        }
    };

    if network.ip.is_empty() || disable_os_reload {
        Ok(CreatePath::Provision)
    } else {
        Ok(CreatePath::OsReload {
            ip: network.ip.clone(),
        })
    }
}

/// Whether `ip` is in a private range and therefore a backend address.
///
/// # Errors
///
/// Returns [`Error::InvalidNetwork`] if `ip` is not an IP address.
pub fn is_private_ip(ip: &str) -> Result<bool> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| Error::InvalidNetwork(format!("Invalid IP address '{ip}'")))?;
    Ok(match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    })
}
