//! VM creation.
//!
//! A dynamic network with a known IP re-images the guest that already holds that IP; anything
//! else orders a new guest. Either way the guest is settled, looked up again and handed its agent
//! settings through the registry.

use super::{Creator, EtcHosts, Vm, VmCloudProperties, VmFinder, VmServices};
use crate::agent_env::{agent_options_for_vm, AgentEnv, VmSpec};
use crate::network::{is_private_ip, select_create_path, CreatePath, Networks};
use crate::stemcell::Stemcell;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use softlayer_cpi_core::config::{AgentOptions, CloudProperties};
use softlayer_cpi_core::poll::deadline_after;
use softlayer_cpi_core::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Transaction group finishing the initial provisioning of a guest.
pub const SERVICE_SETUP_TRANSACTION: &str = "Service Setup";

/// Settings the creator takes from the CPI configuration.
#[derive(Debug, Clone, Default)]
pub struct CreatorOptions {
    /// Agent settings template
    pub agent: AgentOptions,
    /// Always provision, even for dynamic networks with an IP
    pub disable_os_reload: bool,
    /// Public key registered and installed on new guests
    pub ssh_public_key: Option<String>,
    /// Fingerprint of `ssh_public_key`
    pub ssh_public_key_fingerprint: Option<String>,
}

impl CreatorOptions {
    /// Options from the cloud properties.
    #[must_use]
    pub fn from_properties(properties: &CloudProperties) -> Self {
        Self {
            agent: properties.agent.clone(),
            disable_os_reload: properties.softlayer.disable_os_reload,
            ssh_public_key: properties.softlayer.ssh_public_key.clone(),
            ssh_public_key_fingerprint: properties.softlayer.ssh_public_key_fingerprint.clone(),
        }
    }
}

/// Creates virtual guests, or re-images existing ones, and configures their agent.
///
/// Both paths end the same way: wait for the guest to settle (Service Setup or second disk),
/// look it up again, push the agent settings and set the vcap password.
pub struct SoftLayerCreator {
    services: VmServices,
    finder: Arc<dyn VmFinder>,
    options: CreatorOptions,
    etc_hosts: EtcHosts,
}

impl SoftLayerCreator {
    /// Create the orchestrator.
    #[must_use]
    pub fn new(services: VmServices, finder: Arc<dyn VmFinder>, options: CreatorOptions) -> Self {
        Self {
            services,
            finder,
            options,
            etc_hosts: EtcHosts::default(),
        }
    }

    /// Hosts file rewritten when bootstrapping without a director.
    #[must_use]
    pub fn with_etc_hosts(mut self, etc_hosts: EtcHosts) -> Self {
        self.etc_hosts = etc_hosts;
        self
    }

    async fn register_ssh_key(&self, label: &str) -> Result<Option<i64>> {
        let Some(key) = self.options.ssh_public_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let fingerprint = self
            .options
            .ssh_public_key_fingerprint
            .as_deref()
            .unwrap_or_default();
        let ssh_key = self
            .services
            .client
            .create_ssh_key(label, key, fingerprint)
            .await
            .context("Creating ssh key")?;
        Ok(ssh_key.id)
    }

    async fn provision(&self, stemcell: &Stemcell, properties: &VmCloudProperties) -> Result<i64> {
        let extra_key = self.register_ssh_key(&properties.vm_name_prefix).await?;
        let template = properties.virtual_guest_template(stemcell, extra_key);

        let guest = self
            .services
            .client
            .create_instance(&template)
            .await
            .map_err(creation_failed)?;
        let id = guest.id.ok_or_else(|| Error::VmCreationFailed {
            message: "Created virtual guest has no id".to_string(),
            retryable: false,
        })?;
        info!(vm_id = id, hostname = %properties.vm_name_prefix, "Provisioned virtual guest");
        Ok(id)
    }

    async fn reload(
        &self,
        ip: &str,
        stemcell: &Stemcell,
        properties: &VmCloudProperties,
    ) -> Result<i64> {
        let client = &self.services.client;
        let lookup = if is_private_ip(ip)? {
            client.get_instance_by_primary_backend_ip(ip).await
        } else {
            client.get_instance_by_primary_ip(ip).await
        };
        let guest =
            lookup.with_context(|| format!("Could not find virtual guest by ip address: {ip}"))?;
        let id = guest.and_then(|g| g.id).ok_or_else(|| {
            Error::VmNotFound(format!("Could not find virtual guest by ip address: {ip}"))
        })?;

        info!(vm_id = id, stemcell_id = stemcell.id, "OS reload on the server");
        let vm = self.find(id).await?;
        vm.reload_os(stemcell, properties.ssh_key_ids()).await?;
        Ok(id)
    }

    /// Wait for the guest to settle. The two cases watch different signals.
    async fn settle(&self, id: i64, properties: &VmCloudProperties) -> Result<()> {
        let client = &self.services.client;
        if properties.ephemeral_disk_size == 0 {
            client
                .wait_instance_last_transaction_complete(
                    id,
                    SERVICE_SETUP_TRANSACTION,
                    deadline_after(self.services.timeouts.service_setup()),
                )
                .await
                .with_context(|| {
                    format!("Waiting for VirtualGuest `{id}` has Service Setup transaction complete")
                })
        } else {
            client
                .attach_second_disk_to_instance(id, properties.ephemeral_disk_size)
                .await
                .with_context(|| format!("Attaching ephemeral disk to VirtualGuest `{id}`"))
        }
    }

    async fn find(&self, id: i64) -> Result<Box<dyn Vm>> {
        self.finder
            .find(id)
            .await?
            .ok_or_else(|| Error::VmNotFound(format!("Cannot find virtual guest with id: {id}")))
    }

    async fn configure_agent(
        &self,
        vm: &dyn Vm,
        agent_id: &str,
        properties: &VmCloudProperties,
        networks: &Networks,
        env: &Map<String, Value>,
    ) -> Result<()> {
        let backend_ip = vm.primary_backend_ip();
        let bosh_ip = properties.bosh_ip();
        let options = agent_options_for_vm(&self.options.agent, bosh_ip, &backend_ip)
            .context("Cannot construct mbus url")?;

        if bosh_ip.is_none() {
            if let Err(err) = self.etc_hosts.update(&backend_ip, &vm.fqdn()).await {
                warn!(vm_id = vm.id(), error = %err, "Failed to update hosts file");
            }
        }

        let agent_env = AgentEnv::new(
            agent_id,
            VmSpec {
                name: format!("vm-{agent_id}"),
                id: vm.id().to_string(),
            },
            networks.clone(),
            env.clone(),
            &options,
            properties.ephemeral_disk_size > 0,
        );
        self.services
            .registry
            .update(&vm.id().to_string(), &agent_env)
            .await
            .context("Updating VM's agent env")?;

        if let Some(password) = options.vcap_password.as_deref().filter(|p| !p.is_empty()) {
            vm.set_vcap_password(password)
                .await
                .context("Updating VM's vcap password")?;
        }
        Ok(())
    }
}

/// Timeouts and unanswered exchanges leave the outcome unknown, so BOSH may retry the create.
fn creation_failed(err: Error) -> Error {
    Error::VmCreationFailed {
        retryable: err.is_timeout() || matches!(err.root(), Error::ServiceUnavailable(_)),
        message: err.to_string(),
    }
}

#[async_trait]
impl Creator for SoftLayerCreator {
    async fn create(
        &self,
        agent_id: &str,
        stemcell: &Stemcell,
        cloud_properties: &VmCloudProperties,
        networks: &Networks,
        env: &Map<String, Value>,
    ) -> Result<Box<dyn Vm>> {
        let path = select_create_path(networks, self.options.disable_os_reload)?;
        let properties = cloud_properties.clone().with_defaults(Utc::now());

        let id = match path {
            CreatePath::Provision => self.provision(stemcell, &properties).await?,
            CreatePath::OsReload { ip } => self.reload(&ip, stemcell, &properties).await?,
        };
        self.settle(id, &properties).await.map_err(creation_failed)?;

        let vm = self.find(id).await?;
        self.configure_agent(vm.as_ref(), agent_id, &properties, networks, env)
            .await?;
        info!(vm_id = id, agent_id, "Created VM");
        Ok(vm)
    }
}
