use super::{run_vcap_password, Vm, VmMetadata, VmServices, ROOT_USER_NAME};
use crate::disk::Disk;
use crate::network::Networks;
use crate::stemcell::Stemcell;
use async_trait::async_trait;
use softlayer_client::Hardware;
use softlayer_cpi_core::{Error, Result, ResultExt};

use super::metadata::format_tags;

/// A SoftLayer bare metal server.
///
/// Bare metal servers are provisioned outside the CPI, so only reboot, tagging and the vcap
/// password are managed here.
pub struct BareMetalVm {
    id: i64,
    hardware: Hardware,
    services: VmServices,
}

impl std::fmt::Debug for BareMetalVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareMetalVm")
            .field("id", &self.id)
            .field("hostname", &self.hardware.hostname)
            .finish_non_exhaustive()
    }
}

impl BareMetalVm {
    /// Handle for `hardware` as fetched by the finder.
    #[must_use]
    pub fn new(id: i64, hardware: Hardware, services: VmServices) -> Self {
        Self {
            id,
            hardware,
            services,
        }
    }

    fn not_supported(&self, operation: &str) -> Error {
        Error::NotSupported(format!("{operation} on bare metal server '{}'", self.id))
    }
}

#[async_trait]
impl Vm for BareMetalVm {
    fn id(&self) -> i64 {
        self.id
    }

    fn fqdn(&self) -> String {
        self.hardware
            .fully_qualified_domain_name
            .clone()
            .unwrap_or_default()
    }

    fn primary_ip(&self) -> String {
        self.hardware.primary_ip_address.clone().unwrap_or_default()
    }

    fn primary_backend_ip(&self) -> String {
        self.hardware
            .primary_backend_ip_address
            .clone()
            .unwrap_or_default()
    }

    fn root_password(&self) -> String {
        self.hardware
            .password_for(ROOT_USER_NAME)
            .unwrap_or_default()
            .to_string()
    }

    fn datacenter(&self) -> String {
        self.hardware
            .datacenter
            .as_ref()
            .and_then(|dc| dc.name.clone())
            .unwrap_or_default()
    }

    async fn delete(&self) -> Result<()> {
        Err(self.not_supported("delete"))
    }

    async fn reboot(&self) -> Result<()> {
        self.services
            .client
            .reboot_hardware(self.id)
            .await
            .with_context(|| format!("Rebooting bare metal server '{}'", self.id))
    }

    async fn set_metadata(&self, metadata: &VmMetadata) -> Result<()> {
        let tags = format_tags(metadata);
        if tags.is_empty() {
            return Ok(());
        }
        let found = self
            .services
            .client
            .set_hardware_tags(self.id, &tags)
            .await
            .with_context(|| format!("Setting tags on bare metal server '{}'", self.id))?;
        if found {
            Ok(())
        } else {
            Err(Error::VmNotFound(format!("VM '{}' not found", self.id)))
        }
    }

    async fn configure_networks(&self, _networks: &Networks) -> Result<()> {
        Err(Error::NotSupported("configure_networks".to_string()))
    }

    async fn attach_disk(&self, _disk: Disk) -> Result<()> {
        Err(self.not_supported("attach_disk"))
    }

    async fn detach_disk(&self, _disk: Disk) -> Result<()> {
        Err(self.not_supported("detach_disk"))
    }

    async fn set_vcap_password(&self, encrypted: &str) -> Result<()> {
        let host = match self.primary_ip() {
            ip if ip.is_empty() => self.primary_backend_ip(),
            ip => ip,
        };
        run_vcap_password(
            self.services.ssh.as_ref(),
            &self.root_password(),
            &host,
            encrypted,
        )
        .await
    }

    async fn reload_os(&self, _stemcell: &Stemcell, _ssh_key_ids: Vec<i64>) -> Result<()> {
        Err(self.not_supported("reload_os"))
    }
}
