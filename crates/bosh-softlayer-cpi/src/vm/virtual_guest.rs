//! [`Vm`] over a SoftLayer virtual guest.
//!
//! Disk attach and detach run iSCSI scripts on the guest over SSH and record the result in the
//! registry.

use super::{run_vcap_password, Vm, VmDeleter, VmMetadata, VmServices, ROOT_USER_NAME};
use crate::disk::iscsi::{self, Session};
use crate::disk::Disk;
use crate::network::Networks;
use crate::stemcell::Stemcell;
use async_trait::async_trait;
use softlayer_client::client::VOLUME_DETAIL_MASK;
use softlayer_client::{NetworkStorage, RebootKind, ReloadRequest, VirtualGuest};
use softlayer_cpi_core::poll::deadline_after;
use softlayer_cpi_core::{Error, Result, ResultExt};
use tracing::info;

use super::metadata::format_tags;

/// A SoftLayer virtual guest.
pub struct VirtualGuestVm {
    id: i64,
    guest: VirtualGuest,
    services: VmServices,
}

impl std::fmt::Debug for VirtualGuestVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualGuestVm")
            .field("id", &self.id)
            .field("hostname", &self.guest.hostname)
            .finish_non_exhaustive()
    }
}

impl VirtualGuestVm {
    /// Handle for `guest` as fetched by the finder.
    #[must_use]
    pub fn new(id: i64, guest: VirtualGuest, services: VmServices) -> Self {
        Self {
            id,
            guest,
            services,
        }
    }

    /// The guest as fetched.
    #[must_use]
    pub const fn guest(&self) -> &VirtualGuest {
        &self.guest
    }

    /// Address used for shell access: public if present, private otherwise.
    fn ssh_host(&self) -> Result<&str> {
        self.guest
            .primary_ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                self.guest
                    .primary_backend_ip_address
                    .as_deref()
                    .filter(|ip| !ip.is_empty())
            })
            .ok_or_else(|| {
                Error::GuestCommand(format!("Virtual guest '{}' has no IP address", self.id))
            })
    }

    async fn exec(&self, command: &str) -> Result<String> {
        let host = self.ssh_host()?;
        self.services
            .ssh
            .exec(ROOT_USER_NAME, &self.root_password(), host, command)
            .await
    }

    async fn volume(&self, disk: Disk) -> Result<NetworkStorage> {
        self.services
            .client
            .get_block_volume_details(disk.id, VOLUME_DETAIL_MASK)
            .await
            .with_context(|| format!("Fetching volume '{}'", disk.id))?
            .ok_or_else(|| Error::DiskNotFound(format!("Volume '{}' not found", disk.id)))
    }

    async fn find_session(&self, volume: &NetworkStorage) -> Result<Session> {
        let username = volume.username.as_deref().unwrap_or_default();
        let output = self
            .exec(iscsi::SESSION_LISTING_COMMAND)
            .await
            .context("Listing iSCSI sessions")?;
        iscsi::find_session(&output, username)
    }
}

#[async_trait]
impl Vm for VirtualGuestVm {
    fn id(&self) -> i64 {
        self.id
    }

    fn fqdn(&self) -> String {
        self.guest
            .fully_qualified_domain_name
            .clone()
            .unwrap_or_default()
    }

    fn primary_ip(&self) -> String {
        self.guest.primary_ip_address.clone().unwrap_or_default()
    }

    fn primary_backend_ip(&self) -> String {
        self.guest
            .primary_backend_ip_address
            .clone()
            .unwrap_or_default()
    }

    fn root_password(&self) -> String {
        self.guest
            .password_for(ROOT_USER_NAME)
            .unwrap_or_default()
            .to_string()
    }

    fn datacenter(&self) -> String {
        self.guest.datacenter_name().unwrap_or_default().to_string()
    }

    async fn delete(&self) -> Result<()> {
        VmDeleter::new(self.services.client.clone(), self.services.timeouts)
            .delete(self.id)
            .await
            .with_context(|| format!("Deleting virtual guest '{}'", self.id))?;
        self.services
            .registry
            .delete(&self.id.to_string())
            .await
            .context("Deleting VM's agent env")
    }

    async fn reboot(&self) -> Result<()> {
        self.services
            .client
            .reboot_instance(self.id, RebootKind::Soft)
            .await
            .with_context(|| format!("Rebooting (soft) virtual guest '{}'", self.id))
    }

    async fn set_metadata(&self, metadata: &VmMetadata) -> Result<()> {
        let tags = format_tags(metadata);
        if tags.is_empty() {
            return Ok(());
        }
        let found = self
            .services
            .client
            .set_tags(self.id, &tags)
            .await
            .with_context(|| format!("Setting tags on virtual guest '{}'", self.id))?;
        if found {
            Ok(())
        } else {
            Err(Error::VmNotFound(format!("VM '{}' not found", self.id)))
        }
    }

    async fn configure_networks(&self, _networks: &Networks) -> Result<()> {
        Err(Error::NotSupported("configure_networks".to_string()))
    }

    async fn attach_disk(&self, disk: Disk) -> Result<()> {
        let volume = self.volume(disk).await?;
        let until = deadline_after(self.services.timeouts.volume_access());
        self.services
            .client
            .authorize_host_to_volume(self.id, disk.id, until)
            .await
            .with_context(|| {
                format!(
                    "Authorizing virtual guest '{}' to volume '{}'",
                    self.id, disk.id
                )
            })?;

        let script = iscsi::attach_script(&volume)?;
        self.exec(&script).await.with_context(|| {
            format!(
                "Failed to attach volume with id {} to virtual guest with id: {}",
                disk.id, self.id
            )
        })?;
        let session = self.find_session(&volume).await?;
        let device = format!("/dev/{}", session.device);
        info!(vm_id = self.id, volume_id = disk.id, %device, "Attached volume");

        let vm_cid = self.id.to_string();
        let mut env = self
            .services
            .registry
            .fetch(&vm_cid)
            .await
            .context("Reading VM's agent env")?;
        env.attach_persistent_disk(disk.id.to_string(), device);
        self.services
            .registry
            .update(&vm_cid, &env)
            .await
            .context("Updating VM's agent env")
    }

    async fn detach_disk(&self, disk: Disk) -> Result<()> {
        let volume = self.volume(disk).await?;
        let session = self.find_session(&volume).await?;
        self.exec(&iscsi::detach_script(&session.target))
            .await
            .with_context(|| {
                format!(
                    "Failed to detach volume with id {} from virtual guest with id: {}",
                    disk.id, self.id
                )
            })?;

        let until = deadline_after(self.services.timeouts.volume_access());
        self.services
            .client
            .deauthorize_host_to_volume(self.id, disk.id, until)
            .await
            .with_context(|| {
                format!(
                    "De-authorizing virtual guest '{}' from volume '{}'",
                    self.id, disk.id
                )
            })?;
        info!(vm_id = self.id, volume_id = disk.id, "Detached volume");

        let vm_cid = self.id.to_string();
        let mut env = self
            .services
            .registry
            .fetch(&vm_cid)
            .await
            .context("Reading VM's agent env")?;
        env.detach_persistent_disk(&disk.id.to_string());
        self.services
            .registry
            .update(&vm_cid, &env)
            .await
            .context("Updating VM's agent env")
    }

    async fn set_vcap_password(&self, encrypted: &str) -> Result<()> {
        run_vcap_password(
            self.services.ssh.as_ref(),
            &self.root_password(),
            self.ssh_host()?,
            encrypted,
        )
        .await
    }

    async fn reload_os(&self, stemcell: &Stemcell, ssh_key_ids: Vec<i64>) -> Result<()> {
        let request = ReloadRequest {
            stemcell_id: stemcell.id,
            ssh_key_ids,
            hostname: self.guest.hostname.clone().unwrap_or_default(),
            domain: self.guest.domain.clone().unwrap_or_default(),
        };
        info!(vm_id = self.id, stemcell_id = stemcell.id, "OS reload");
        self.services
            .client
            .reload_instance(self.id, &request)
            .await
            .context("Failed to reload OS")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_env::AgentEnv;
    use crate::registry::MockRegistryClient;
    use crate::ssh::MockSshClient;
    use crate::vm::test_support::services;
    use softlayer_client::models::{OperatingSystem, SoftwarePassword};
    use softlayer_client::MockSoftLayerClient;

    const SESSIONS: &str =
        "iqn.1992-08.com.netapp:sl02su1234567-v24680\n\t\tsdc\t\t\n";

    fn guest() -> VirtualGuest {
        VirtualGuest {
            id: Some(1234),
            hostname: Some("bosh-0".to_string()),
            domain: Some("softlayer.com".to_string()),
            fully_qualified_domain_name: Some("bosh-0.softlayer.com".to_string()),
            primary_ip_address: Some("169.50.10.11".to_string()),
            primary_backend_ip_address: Some("10.112.172.4".to_string()),
            operating_system: Some(OperatingSystem {
                passwords: vec![SoftwarePassword {
                    username: Some("root".to_string()),
                    password: Some("rootpw".to_string()),
                }],
            }),
            ..VirtualGuest::default()
        }
    }

    fn volume() -> NetworkStorage {
        NetworkStorage {
            id: Some(24_680),
            username: Some("SL02SU1234567-V24680".to_string()),
            password: Some("s3cret".to_string()),
            service_resource_backend_ip_address: Some("10.2.125.51".to_string()),
            ..NetworkStorage::default()
        }
    }

    #[test]
    fn test_cached_accessors() {
        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(
                MockSoftLayerClient::new(),
                MockSshClient::new(),
                MockRegistryClient::new(),
            ),
        );
        assert_eq!(vm.id(), 1234);
        assert_eq!(vm.fqdn(), "bosh-0.softlayer.com");
        assert_eq!(vm.primary_backend_ip(), "10.112.172.4");
        assert_eq!(vm.root_password(), "rootpw");
    }

    #[tokio::test]
    async fn test_set_metadata_on_missing_guest() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_set_tags()
            .withf(|id, tags| *id == 1234 && tags == "job: router")
            .returning(|_, _| Ok(false));
        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(client, MockSshClient::new(), MockRegistryClient::new()),
        );

        let mut metadata = VmMetadata::new();
        metadata.insert("job".to_string(), "router".into());
        let err = vm.set_metadata(&metadata).await.unwrap_err();
        assert_eq!(err, Error::VmNotFound("VM '1234' not found".to_string()));
    }

    #[tokio::test]
    async fn test_configure_networks_not_supported() {
        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(
                MockSoftLayerClient::new(),
                MockSshClient::new(),
                MockRegistryClient::new(),
            ),
        );
        let err = vm.configure_networks(&Networks::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_attach_disk_records_device() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_get_block_volume_details()
            .returning(|_, _| Ok(Some(volume())));
        client
            .expect_authorize_host_to_volume()
            .withf(|vm, disk, _| *vm == 1234 && *disk == 24_680)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut ssh = MockSshClient::new();
        let mut seq = mockall::Sequence::new();
        ssh.expect_exec()
            .withf(|user, pw, host, cmd| {
                user == "root"
                    && pw == "rootpw"
                    && host == "169.50.10.11"
                    && cmd.contains("iscsiadm -m discovery -t sendtargets -p 10.2.125.51")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(String::new()));
        ssh.expect_exec()
            .withf(|_, _, _, cmd| cmd == iscsi::SESSION_LISTING_COMMAND)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(SESSIONS.to_string()));

        let mut registry = MockRegistryClient::new();
        registry
            .expect_fetch()
            .withf(|id| id == "1234")
            .returning(|_| Ok(AgentEnv::default()));
        registry
            .expect_update()
            .withf(|id, env| id == "1234" && env.disks.persistent["24680"] == "/dev/sdc")
            .times(1)
            .returning(|_, _| Ok(()));

        let vm = VirtualGuestVm::new(1234, guest(), services(client, ssh, registry));
        vm.attach_disk(Disk::new(24_680)).await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_missing_volume() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_get_block_volume_details()
            .returning(|_, _| Ok(None));
        client.expect_authorize_host_to_volume().never();

        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(client, MockSshClient::new(), MockRegistryClient::new()),
        );
        let err = vm.attach_disk(Disk::new(5)).await.unwrap_err();
        assert!(matches!(err, Error::DiskNotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_surfaces_ssh_failure_verbatim() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_get_block_volume_details()
            .returning(|_, _| Ok(Some(volume())));
        client
            .expect_authorize_host_to_volume()
            .returning(|_, _, _| Ok(()));
        let mut ssh = MockSshClient::new();
        ssh.expect_exec().returning(|_, _, _, _| {
            Err(Error::GuestCommand("open-iscsi: command not found".to_string()))
        });

        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(client, ssh, MockRegistryClient::new()),
        );
        let err = vm.attach_disk(Disk::new(24_680)).await.unwrap_err();
        assert!(matches!(err.root(), Error::GuestCommand(_)));
        assert!(err.to_string().contains("open-iscsi: command not found"));
    }

    #[tokio::test]
    async fn test_detach_disk_logs_out_and_deauthorizes() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_get_block_volume_details()
            .returning(|_, _| Ok(Some(volume())));
        client
            .expect_deauthorize_host_to_volume()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut ssh = MockSshClient::new();
        ssh.expect_exec()
            .withf(|_, _, _, cmd| cmd == iscsi::SESSION_LISTING_COMMAND)
            .returning(|_, _, _, _| Ok(SESSIONS.to_string()));
        ssh.expect_exec()
            .withf(|_, _, _, cmd| {
                cmd == iscsi::detach_script("iqn.1992-08.com.netapp:sl02su1234567-v24680")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(String::new()));

        let mut registry = MockRegistryClient::new();
        registry.expect_fetch().returning(|_| {
            let mut env = AgentEnv::default();
            env.attach_persistent_disk("24680", "/dev/sdc");
            Ok(env)
        });
        registry
            .expect_update()
            .withf(|_, env| env.disks.persistent.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));

        let vm = VirtualGuestVm::new(1234, guest(), services(client, ssh, registry));
        vm.detach_disk(Disk::new(24_680)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_os_keeps_name() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_reload_instance()
            .withf(|id, request| {
                *id == 1234
                    && request.stemcell_id == 99
                    && request.ssh_key_ids == vec![7]
                    && request.hostname == "bosh-0"
                    && request.domain == "softlayer.com"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let vm = VirtualGuestVm::new(
            1234,
            guest(),
            services(client, MockSshClient::new(), MockRegistryClient::new()),
        );
        let stemcell = Stemcell {
            id: 99,
            uuid: "uuid".to_string(),
        };
        vm.reload_os(&stemcell, vec![7]).await.unwrap();
    }
}
