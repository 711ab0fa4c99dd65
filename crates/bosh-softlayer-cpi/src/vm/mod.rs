//! VM handles and lifecycle.
//!
//! A [`Vm`] is either a virtual guest ([`VirtualGuestVm`]) or a bare metal server
//! ([`BareMetalVm`]). Handles carry metadata cached when they were looked up; anything needing
//! current remote state fetches it again through the client.

mod bare_metal;
mod cloud_properties;
mod creator;
mod deleter;
mod etc_hosts;
mod finder;
mod metadata;
mod virtual_guest;

pub use bare_metal::BareMetalVm;
pub use cloud_properties::{
    timestamped_prefix, DatacenterProperties, VmCloudProperties, DEFAULT_DOMAIN,
    DEFAULT_MAX_MEMORY_MB, DEFAULT_NETWORK_SPEED_MBPS, DEFAULT_START_CPUS,
};
pub use creator::{CreatorOptions, SoftLayerCreator, SERVICE_SETUP_TRANSACTION};
pub use deleter::VmDeleter;
pub use etc_hosts::{EtcHosts, DEFAULT_ETC_HOSTS_PATH};
pub use finder::SoftLayerVmFinder;
pub use metadata::{format_tags, VmMetadata};
pub use virtual_guest::VirtualGuestVm;

use crate::disk::Disk;
use crate::network::Networks;
use crate::registry::RegistryClient;
use crate::ssh::SshClient;
use crate::stemcell::Stemcell;
use async_trait::async_trait;
use serde_json::{Map, Value};
use softlayer_client::SoftLayerClient;
use softlayer_cpi_core::config::Timeouts;
use softlayer_cpi_core::{Error, Result};
use std::sync::Arc;

/// User the CPI logs in as on guests.
pub const ROOT_USER_NAME: &str = "root";

/// Collaborators every VM handle talks to.
#[derive(Clone)]
pub struct VmServices {
    /// SoftLayer facade
    pub client: Arc<dyn SoftLayerClient>,
    /// Guest shell access
    pub ssh: Arc<dyn SshClient>,
    /// Agent settings store
    pub registry: Arc<dyn RegistryClient>,
    /// Bounded waits
    pub timeouts: Timeouts,
}

/// Capabilities shared by virtual guests and bare metal servers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Vm: Send + Sync {
    /// SoftLayer id.
    fn id(&self) -> i64;

    /// Fully qualified domain name at lookup time.
    fn fqdn(&self) -> String;

    /// Public address at lookup time.
    fn primary_ip(&self) -> String;

    /// Private address at lookup time.
    fn primary_backend_ip(&self) -> String;

    /// Root password at lookup time.
    fn root_password(&self) -> String;

    /// Datacenter short name.
    fn datacenter(&self) -> String;

    /// Destroy the VM and its agent settings.
    async fn delete(&self) -> Result<()>;

    /// Soft reboot.
    async fn reboot(&self) -> Result<()>;

    /// Tag the VM with director metadata.
    async fn set_metadata(&self, metadata: &VmMetadata) -> Result<()>;

    /// Reconfigure networks; SoftLayer networks are fixed at creation.
    async fn configure_networks(&self, networks: &Networks) -> Result<()>;

    /// Attach a persistent disk and record it in the agent settings.
    async fn attach_disk(&self, disk: Disk) -> Result<()>;

    /// Detach a persistent disk and remove it from the agent settings.
    async fn detach_disk(&self, disk: Disk) -> Result<()>;

    /// Set the crypted password of the `vcap` user.
    async fn set_vcap_password(&self, encrypted: &str) -> Result<()>;

    /// Re-image the VM with `stemcell`, keeping its name.
    async fn reload_os(&self, stemcell: &Stemcell, ssh_key_ids: Vec<i64>) -> Result<()>;
}

/// Resolves VM CIDs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VmFinder: Send + Sync {
    /// The VM with `id`, if it exists as a guest or a bare metal server.
    async fn find(&self, id: i64) -> Result<Option<Box<dyn Vm>>>;
}

/// Creates VMs for `create_vm`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Creator: Send + Sync {
    /// Create (or re-image) a VM and configure its agent.
    async fn create(
        &self,
        agent_id: &str,
        stemcell: &Stemcell,
        cloud_properties: &VmCloudProperties,
        networks: &Networks,
        env: &Map<String, Value>,
    ) -> Result<Box<dyn Vm>>;
}

/// Shell command setting the crypted `vcap` password.
#[must_use]
pub fn vcap_password_command(encrypted: &str) -> String {
    format!("usermod -p '{encrypted}' vcap")
}

pub(crate) async fn run_vcap_password(
    ssh: &dyn SshClient,
    root_password: &str,
    host: &str,
    encrypted: &str,
) -> Result<()> {
    if host.is_empty() {
        return Err(Error::GuestCommand(
            "No address to reach the VM over ssh".to_string(),
        ));
    }
    ssh.exec(ROOT_USER_NAME, root_password, host, &vcap_password_command(encrypted))
        .await
        .map(|_| ())
        .map_err(|err| err.context("Setting vcap password"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::registry::MockRegistryClient;
    use crate::ssh::MockSshClient;
    use softlayer_client::MockSoftLayerClient;

    pub fn services(
        client: MockSoftLayerClient,
        ssh: MockSshClient,
        registry: MockRegistryClient,
    ) -> VmServices {
        VmServices {
            client: Arc::new(client),
            ssh: Arc::new(ssh),
            registry: Arc::new(registry),
            timeouts: Timeouts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::MockSshClient;

    #[test]
    fn test_vcap_password_command() {
        assert_eq!(
            vcap_password_command("$6$salt$hash"),
            "usermod -p '$6$salt$hash' vcap"
        );
    }

    #[tokio::test]
    async fn test_run_vcap_password_wraps_failure() {
        let mut ssh = MockSshClient::new();
        ssh.expect_exec()
            .withf(|user, password, host, command| {
                user == "root"
                    && password == "pw"
                    && host == "10.0.0.5"
                    && command == "usermod -p 'crypted' vcap"
            })
            .times(1)
            .returning(|_, _, _, _| Err(Error::GuestCommand("usermod: no such user".to_string())));

        let err = run_vcap_password(&ssh, "pw", "10.0.0.5", "crypted")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Setting vcap password"));
        assert!(err.to_string().contains("usermod: no such user"));
    }
}
