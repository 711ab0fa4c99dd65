//! Remote client facade.
//!
//! [`SoftLayerClient`] is what the CPI's VM and disk layers talk to: instance, volume, image
//! and key operations plus the bounded `wait_*` primitives. [`ClientManager`] implements it on
//! top of a raw [`SoftLayerApi`]. Every wait is a [`poll_until`] over one query; the deadline is
//! supplied by the caller.

use crate::api::{filter_path, merge_filters, RebootKind, SoftLayerApi};
use crate::models::{
    BlockDeviceTemplateGroup, GuestRef, Hardware, NetworkStorage, OrderProperty, OrderReceipt,
    OsFormatType, PriceRef, ProductOrder, ProductPackage, ReloadConfiguration, SshKey,
    Transaction, VirtualGuest, TRANSACTION_STATUS_COMPLETE,
};
use crate::pricing::{self, UpgradeOption};
use crate::rest::RestApi;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use softlayer_cpi_core::config::{SoftLayerConfig, Timeouts};
use softlayer_cpi_core::poll::{deadline_after, poll_until, PollPolicy, Probe};
use softlayer_cpi_core::{Error, ExceptionKind, Result, ResultExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Attributes fetched for a guest by default.
pub const INSTANCE_DEFAULT_MASK: &str = "id, globalIdentifier, hostname, hourlyBillingFlag, domain, fullyQualifiedDomainName, \
    powerState[keyName,name], activeTransaction[id,transactionStatus.name], datacenter.name, \
    maxCpu, maxMemory, primaryIpAddress, primaryBackendIpAddress, \
    privateNetworkOnlyFlag, dedicatedAccountHostOnlyFlag";

/// Attributes fetched for a guest whose credentials and networks are needed.
pub const INSTANCE_DETAIL_MASK: &str = "id, globalIdentifier, hostname, domain, fullyQualifiedDomainName, \
    powerState[keyName,name], activeTransaction[id,transactionStatus.name], datacenter.name, \
    operatingSystem.passwords[username,password], maxCpu, maxMemory, startCpus, \
    primaryIpAddress, primaryBackendIpAddress, privateNetworkOnlyFlag, dedicatedAccountHostOnlyFlag, \
    primaryBackendNetworkComponent.networkVlan.id, primaryNetworkComponent.networkVlan.id";

/// Attributes fetched for a bare-metal server.
pub const HARDWARE_DEFAULT_MASK: &str = "id, hostname, domain, fullyQualifiedDomainName, \
    primaryIpAddress, primaryBackendIpAddress, datacenter.name, \
    operatingSystem.passwords[username,password]";

/// Attributes fetched while waiting for provisioning volumes.
pub const VOLUME_DEFAULT_MASK: &str = "id,username,lunId,capacityGb,bytesUsed,serviceResource.datacenter.name,serviceResourceBackendIpAddress,activeTransactionCount,billingItem.orderItem.order[id,userRecord.username]";

/// Attributes fetched for an attach or detach.
pub const VOLUME_DETAIL_MASK: &str = "id,username,password,capacityGb,snapshotCapacityGb,storageType.keyName,serviceResource.datacenter.name,serviceResourceBackendIpAddress,iops,lunId,activeTransactionCount,billingItem.id";

/// Attributes fetched for an image.
pub const IMAGE_DEFAULT_MASK: &str = "id,globalIdentifier,name";

const READY_MASK: &str = "id, lastOperatingSystemReload[id,modifyDate], activeTransaction[id,transactionStatus.name], provisionDate, powerState.keyName";
const ACTIVE_TRANSACTION_MASK: &str = "id, activeTransaction[id,transactionStatus.name]";

const UPGRADE_ORDER_TYPE: &str = "SoftLayer_Container_Product_Order_Virtual_Guest_Upgrade";
const PERFORMANCE_STORAGE_ORDER_TYPE: &str =
    "SoftLayer_Container_Product_Order_Network_PerformanceStorage_Iscsi";
const VIRTUAL_SERVER_PACKAGE_TYPE: &str = "VIRTUAL_SERVER_INSTANCE";

/// An OS reload of an existing guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadRequest {
    /// Image template id to install.
    pub stemcell_id: i64,
    /// SSH keys to install; ignored when the first id is 0.
    pub ssh_key_ids: Vec<i64>,
    /// Hostname to restore after the reload.
    pub hostname: String,
    /// Domain to restore after the reload.
    pub domain: String,
}

/// A guest configuration upgrade. Zero fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// vCPU count.
    pub cpu: i64,
    /// Memory in MB.
    pub memory_mb: i64,
    /// Port speed in Mbps.
    pub network_mbps: i64,
    /// Dedicated instead of shared cores.
    pub private_cpu: bool,
    /// Second disk size in GB.
    pub additional_disk_gb: i64,
}

/// A performance iSCSI volume order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRequest {
    /// Datacenter short name.
    pub location: String,
    /// Size in GB.
    pub size_gb: i64,
    /// Provisioned IOPS; 0 picks the highest tier for the size.
    pub iops: i64,
    /// Snapshot space in GB; 0 orders none.
    pub snapshot_space_gb: i64,
}

/// Operations the CPI performs against SoftLayer.
///
/// Getters return `Ok(None)` (or `false`) when SoftLayer reports the object does not exist.
/// `wait_*` operations poll until their condition holds or `until` passes.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait SoftLayerClient: Send + Sync {
    /// Fetch a guest; an empty mask selects [`INSTANCE_DEFAULT_MASK`].
    async fn get_instance(&self, id: i64, mask: &str) -> Result<Option<VirtualGuest>>;

    /// Find a guest by its public IP.
    async fn get_instance_by_primary_ip(&self, ip: &str) -> Result<Option<VirtualGuest>>;

    /// Find a guest by its private IP.
    async fn get_instance_by_primary_backend_ip(&self, ip: &str) -> Result<Option<VirtualGuest>>;

    /// Fetch a bare-metal server; an empty mask selects [`HARDWARE_DEFAULT_MASK`].
    async fn get_hardware(&self, id: i64, mask: &str) -> Result<Option<Hardware>>;

    /// Fetch an image template; an empty mask selects [`IMAGE_DEFAULT_MASK`].
    async fn get_image(&self, id: i64, mask: &str) -> Result<Option<BlockDeviceTemplateGroup>>;

    /// Wait until the guest is provisioned, not reloading and running.
    async fn wait_instance_until_ready(&self, id: i64, until: Instant) -> Result<()>;

    /// Wait until the guest has an active transaction.
    async fn wait_instance_has_active_transaction(&self, id: i64, until: Instant) -> Result<()>;

    /// Wait until the guest has no active transaction.
    async fn wait_instance_has_none_active_transaction(&self, id: i64, until: Instant)
        -> Result<()>;

    /// Wait until the guest's last transaction belongs to `group` and is complete.
    async fn wait_instance_last_transaction_complete(
        &self,
        id: i64,
        group: &str,
        until: Instant,
    ) -> Result<()>;

    /// Create a guest from a template and wait until it is ready.
    async fn create_instance(&self, template: &VirtualGuest) -> Result<VirtualGuest>;

    /// Edit a guest and wait until it is ready again. `false` if the guest does not exist.
    async fn edit_instance(&self, id: i64, template: &VirtualGuest) -> Result<bool>;

    /// Reboot a guest.
    async fn reboot_instance(&self, id: i64, kind: RebootKind) -> Result<()>;

    /// Soft reboot a bare-metal server.
    async fn reboot_hardware(&self, id: i64) -> Result<()>;

    /// Re-image a guest and restore its hostname.
    async fn reload_instance(&self, id: i64, request: &ReloadRequest) -> Result<()>;

    /// Drain running transactions and delete the guest. `false` if it was already gone.
    async fn delete_instance(&self, id: i64) -> Result<bool>;

    /// Running transactions of a guest.
    async fn get_active_transactions(&self, id: i64) -> Result<Vec<Transaction>>;

    /// The current transaction of a guest.
    async fn get_active_transaction(&self, id: i64) -> Result<Option<Transaction>>;

    /// Replace a guest's tags. `false` if the guest does not exist.
    async fn set_tags(&self, id: i64, tags: &str) -> Result<bool>;

    /// Replace a bare-metal server's tags. `false` if the server does not exist.
    async fn set_hardware_tags(&self, id: i64, tags: &str) -> Result<bool>;

    /// Place an upgrade order for a guest.
    async fn upgrade_instance(&self, id: i64, request: &UpgradeRequest) -> Result<OrderReceipt>;

    /// Add a second disk through an upgrade order and wait for the guest to settle.
    async fn attach_second_disk_to_instance(&self, id: i64, size_gb: i64) -> Result<()>;

    /// Place a performance iSCSI volume order.
    async fn order_block_volume(&self, request: &VolumeRequest) -> Result<OrderReceipt>;

    /// Order a volume and wait for it to be provisioned.
    async fn create_volume(&self, request: &VolumeRequest) -> Result<NetworkStorage>;

    /// Wait for the volume created by an order to appear.
    async fn wait_volume_provisioning_with_order_id(
        &self,
        order_id: i64,
        until: Instant,
    ) -> Result<NetworkStorage>;

    /// Fetch a volume; an empty mask selects [`VOLUME_DETAIL_MASK`].
    async fn get_block_volume_details(&self, id: i64, mask: &str)
        -> Result<Option<NetworkStorage>>;

    /// Cancel a volume's billing item. A missing volume counts as cancelled.
    async fn cancel_block_volume(&self, id: i64, reason: &str, immediate: bool) -> Result<bool>;

    /// Allow a guest to mount a volume.
    async fn authorize_host_to_volume(
        &self,
        instance_id: i64,
        volume_id: i64,
        until: Instant,
    ) -> Result<()>;

    /// Revoke a guest's access to a volume.
    async fn deauthorize_host_to_volume(
        &self,
        instance_id: i64,
        volume_id: i64,
        until: Instant,
    ) -> Result<()>;

    /// Register an SSH key, or return the existing registration of the same key.
    async fn create_ssh_key(&self, label: &str, key: &str, fingerprint: &str) -> Result<SshKey>;
}

/// [`SoftLayerClient`] over a raw [`SoftLayerApi`].
#[derive(Debug, Clone)]
pub struct ClientManager<A> {
    api: A,
    timeouts: Timeouts,
}

impl ClientManager<RestApi> {
    /// Build a manager talking to the configured REST endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the endpoint is invalid.
    pub fn from_config(config: &SoftLayerConfig, timeouts: Timeouts) -> Result<Self> {
        Ok(Self::new(RestApi::from_config(config)?, timeouts))
    }
}

impl<A: SoftLayerApi> ClientManager<A> {
    /// Create a manager over `api` using `timeouts` for its internal waits.
    #[must_use]
    pub const fn new(api: A, timeouts: Timeouts) -> Self {
        Self { api, timeouts }
    }

    /// The raw API.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// The configured timeouts.
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.timeouts.poll_interval(), self.timeouts.transient_retries)
    }

    fn ready_policy(&self) -> PollPolicy {
        self.policy()
            .with_interval(self.timeouts.ready_poll_interval())
    }

    async fn require_instance(&self, id: i64, mask: &str) -> Result<VirtualGuest> {
        self.get_instance(id, mask).await?.ok_or_else(|| {
            Error::VmNotFound(format!("SoftLayer virtual guest '{id}' does not exist"))
        })
    }

    async fn virtual_server_package(&self) -> Result<i64> {
        let packages = self
            .api
            .list_product_packages(
                "id,name,description,isActive,type.keyName",
                filter_path("type.keyName", json!(VIRTUAL_SERVER_PACKAGE_TYPE)),
            )
            .await?;

        packages.first().and_then(|p| p.id).ok_or_else(|| {
            Error::ValidationError(format!(
                "No package found for type: {VIRTUAL_SERVER_PACKAGE_TYPE}"
            ))
        })
    }

    async fn second_disk_price(&self, id: i64, size_gb: i64) -> Result<i64> {
        let prices = self.api.get_upgrade_item_prices(id).await?;
        let local_disk = self.api.get_local_disk_flag(id).await?;
        pricing::select_second_disk_price(&prices, size_gb, local_disk)
    }

    async fn location_id(&self, name: &str) -> Result<i64> {
        let datacenters = self
            .api
            .list_datacenters(filter_path("name", json!(name)))
            .await?;

        datacenters
            .iter()
            .find(|dc| dc.name.as_deref() == Some(name))
            .and_then(|dc| dc.id)
            .ok_or_else(|| Error::ValidationError("Invalid datacenter name specified".to_string()))
    }

    async fn storage_package(&self, category: &str) -> Result<ProductPackage> {
        let filter = merge_filters([
            filter_path("categories.categoryCode", json!(category)),
            filter_path("statusCode", json!("ACTIVE")),
        ]);
        let mut packages = self
            .api
            .list_product_packages(
                "id,name,items[id,capacity,description,prices[id,locationGroupId,categories,capacityRestrictionMinimum,capacityRestrictionMaximum]]",
                filter,
            )
            .await?;

        match packages.len() {
            0 => Err(Error::ValidationError(format!(
                "No packages were found for {category}"
            ))),
            1 => Ok(packages.remove(0)),
            _ => Err(Error::ValidationError(format!(
                "More than one packages were found for {category}"
            ))),
        }
    }

    async fn maximum_iops_price(&self, size_gb: i64) -> Result<i64> {
        let filter = merge_filters([
            filter_path("itemPrices.attributes.value", json!(size_gb)),
            filter_path("categories.categoryCode", json!(pricing::PERFORMANCE_STORAGE_IOPS)),
        ]);
        let prices = self
            .api
            .get_package_item_prices(pricing::NETWORK_PERFORMANCE_STORAGE_PACKAGE_ID, filter)
            .await?;
        pricing::select_maximum_iops_price(&prices, size_gb)
    }
}

fn not_found_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

fn or_default(mask: &str, default: &'static str) -> String {
    if mask.is_empty() {
        default.to_string()
    } else {
        mask.to_string()
    }
}

#[async_trait]
impl<A: SoftLayerApi> SoftLayerClient for ClientManager<A> {
    async fn get_instance(&self, id: i64, mask: &str) -> Result<Option<VirtualGuest>> {
        let mask = or_default(mask, INSTANCE_DEFAULT_MASK);
        not_found_as_none(self.api.get_virtual_guest(id, &mask).await)
    }

    async fn get_instance_by_primary_ip(&self, ip: &str) -> Result<Option<VirtualGuest>> {
        let guests = self
            .api
            .list_virtual_guests(
                INSTANCE_DEFAULT_MASK,
                filter_path("virtualGuests.primaryIpAddress", json!(ip)),
            )
            .await?;
        Ok(guests.into_iter().next())
    }

    async fn get_instance_by_primary_backend_ip(&self, ip: &str) -> Result<Option<VirtualGuest>> {
        let guests = self
            .api
            .list_virtual_guests(
                INSTANCE_DEFAULT_MASK,
                filter_path("virtualGuests.primaryBackendIpAddress", json!(ip)),
            )
            .await?;
        Ok(guests.into_iter().next())
    }

    async fn get_hardware(&self, id: i64, mask: &str) -> Result<Option<Hardware>> {
        let mask = or_default(mask, HARDWARE_DEFAULT_MASK);
        not_found_as_none(self.api.get_hardware(id, &mask).await)
    }

    async fn get_image(&self, id: i64, mask: &str) -> Result<Option<BlockDeviceTemplateGroup>> {
        let mask = or_default(mask, IMAGE_DEFAULT_MASK);
        not_found_as_none(self.api.get_image(id, &mask).await)
    }

    async fn wait_instance_until_ready(&self, id: i64, until: Instant) -> Result<()> {
        let what = format!("Power on virtual guest with id {id}");
        poll_until(self.ready_policy(), until, &what, || async move {
            let guest = self.require_instance(id, READY_MASK).await?;
            if guest.provision_date.is_some() && !guest.is_reloading() && guest.is_running() {
                Ok(Probe::Ready(()))
            } else {
                Ok(Probe::Pending)
            }
        })
        .await
    }

    async fn wait_instance_has_active_transaction(&self, id: i64, until: Instant) -> Result<()> {
        let what = format!("Wait instance with id of '{id}' has active transaction");
        poll_until(self.policy(), until, &what, || async move {
            let guest = self.require_instance(id, ACTIVE_TRANSACTION_MASK).await?;
            Ok(if guest.active_transaction.is_some() {
                Probe::Ready(())
            } else {
                Probe::Pending
            })
        })
        .await
    }

    async fn wait_instance_has_none_active_transaction(
        &self,
        id: i64,
        until: Instant,
    ) -> Result<()> {
        let what = format!("Waiting instance with id of '{id}' has none active transaction");
        poll_until(self.policy(), until, &what, || async move {
            let guest = self.require_instance(id, ACTIVE_TRANSACTION_MASK).await?;
            Ok(if guest.active_transaction.is_none() {
                Probe::Ready(())
            } else {
                Probe::Pending
            })
        })
        .await
    }

    async fn wait_instance_last_transaction_complete(
        &self,
        id: i64,
        group: &str,
        until: Instant,
    ) -> Result<()> {
        let what = format!("Waiting for virtual guest {id} to complete its {group} transaction");
        poll_until(self.policy(), until, &what, || async move {
            let Some(last) = self.api.get_last_transaction(id).await? else {
                return Ok(Probe::Pending);
            };
            let in_group = last.group_name().is_some_and(|name| name.contains(group));
            let complete = last.status_name() == Some(TRANSACTION_STATUS_COMPLETE)
                || last
                    .transaction_status
                    .as_ref()
                    .and_then(|s| s.friendly_name.as_deref())
                    .is_some_and(|name| name.contains("Complete"));
            debug!(vm_id = id, in_group, complete, "Last transaction");
            Ok(if in_group && complete {
                Probe::Ready(())
            } else {
                Probe::Pending
            })
        })
        .await
    }

    async fn create_instance(&self, template: &VirtualGuest) -> Result<VirtualGuest> {
        let guest = self
            .api
            .create_virtual_guest(template)
            .await
            .context("Creating instance")?;
        let id = guest
            .id
            .ok_or_else(|| Error::ParseError("Created instance has no id".to_string()))?;
        info!(vm_id = id, "Created virtual guest");

        self.wait_instance_until_ready(id, deadline_after(self.timeouts.instance_ready()))
            .await
            .context("Waiting until instance is ready")?;
        Ok(guest)
    }

    async fn edit_instance(&self, id: i64, template: &VirtualGuest) -> Result<bool> {
        match self.api.edit_virtual_guest(id, template).await {
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
            Ok(_) => {}
        }

        self.wait_instance_until_ready(id, deadline_after(self.timeouts.edit_ready()))
            .await
            .context("Waiting until instance is ready")?;
        Ok(true)
    }

    async fn reboot_instance(&self, id: i64, kind: RebootKind) -> Result<()> {
        if !self.api.reboot_virtual_guest(id, kind).await? {
            warn!(vm_id = id, ?kind, "Reboot request was not accepted");
        }
        Ok(())
    }

    async fn reboot_hardware(&self, id: i64) -> Result<()> {
        if !self.api.reboot_hardware(id).await? {
            warn!(vm_id = id, "Reboot request was not accepted");
        }
        Ok(())
    }

    async fn reload_instance(&self, id: i64, request: &ReloadRequest) -> Result<()> {
        let transaction = self.timeouts.transaction();
        self.wait_instance_has_none_active_transaction(id, deadline_after(transaction))
            .await
            .context("Waiting until instance has none active transaction before os_reload")?;

        let config = ReloadConfiguration {
            image_template_id: request.stemcell_id,
            ssh_key_ids: match request.ssh_key_ids.first() {
                Some(&first) if first != 0 => request.ssh_key_ids.clone(),
                _ => Vec::new(),
            },
        };
        info!(vm_id = id, stemcell_id = request.stemcell_id, "Reloading OS");
        self.api.reload_operating_system(id, &config).await?;

        self.wait_instance_has_active_transaction(id, deadline_after(transaction))
            .await
            .context("Waiting until instance has active transaction after launching os_reload")?;
        self.wait_instance_until_ready(id, deadline_after(self.timeouts.os_reload()))
            .await
            .context("Waiting until instance is ready after os_reload")?;

        let template = VirtualGuest {
            hostname: Some(request.hostname.clone()),
            domain: Some(request.domain.clone()),
            ..VirtualGuest::default()
        };
        let edited = self
            .edit_instance(id, &template)
            .await
            .context("Editing VM hostname after OS Reload")?;
        if !edited {
            return Err(Error::VmNotFound(format!(
                "Failed to edit VM hostname after OS Reload: virtual guest '{id}' does not exist"
            )));
        }
        Ok(())
    }

    async fn delete_instance(&self, id: i64) -> Result<bool> {
        match self
            .wait_instance_has_none_active_transaction(
                id,
                deadline_after(self.timeouts.delete_drain()),
            )
            .await
        {
            Err(err) if err.is_not_found() => {
                info!(vm_id = id, "Virtual guest already gone");
                return Ok(false);
            }
            Err(err) => {
                return Err(err.context(
                    "Waiting until instance has none active transaction before canceling",
                ))
            }
            Ok(()) => {}
        }

        let deleted = self
            .api
            .delete_virtual_guest(id)
            .await
            .with_context(|| format!("Deleting instance with id '{id}'"))?;
        if !deleted {
            return Err(Error::ExternalServiceError {
                service: "SoftLayer".to_string(),
                message: format!("Deleting instance with id '{id}' failed"),
            });
        }
        Ok(true)
    }

    async fn get_active_transactions(&self, id: i64) -> Result<Vec<Transaction>> {
        self.api.get_active_transactions(id).await
    }

    async fn get_active_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        self.api.get_active_transaction(id).await
    }

    async fn set_tags(&self, id: i64, tags: &str) -> Result<bool> {
        match self.api.set_virtual_guest_tags(id, tags).await {
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
            Ok(_) => Ok(true),
        }
    }

    async fn set_hardware_tags(&self, id: i64, tags: &str) -> Result<bool> {
        match self.api.set_hardware_tags(id, tags).await {
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
            Ok(_) => Ok(true),
        }
    }

    async fn upgrade_instance(&self, id: i64, request: &UpgradeRequest) -> Result<OrderReceipt> {
        let options = [
            (UpgradeOption::GuestCore, request.cpu),
            (UpgradeOption::Ram, request.memory_mb / 1024),
            (UpgradeOption::PortSpeed, request.network_mbps),
        ];

        let package_id = self.virtual_server_package().await?;
        let items = self
            .api
            .get_package_items(package_id, "description,capacity,prices[id,locationGroupId,categories]")
            .await?;

        let mut prices = Vec::new();
        for (option, value) in options.into_iter().filter(|(_, value)| *value != 0) {
            let price_id =
                pricing::price_id_for_upgrade(&items, option, value, !request.private_cpu)
                    .ok_or_else(|| {
                        Error::ValidationError(format!(
                            "Unable to find {option} option with {value}"
                        ))
                    })?;
            prices.push(PriceRef { id: price_id });
        }

        if request.additional_disk_gb != 0 {
            let price_id = self
                .second_disk_price(id, request.additional_disk_gb)
                .await?;
            prices.push(PriceRef { id: price_id });
        }

        if prices.is_empty() {
            return Err(Error::ValidationError(
                "Unable to find price for upgrade".to_string(),
            ));
        }

        let order = ProductOrder {
            complex_type: UPGRADE_ORDER_TYPE.to_string(),
            package_id: Some(package_id),
            prices,
            properties: vec![
                OrderProperty {
                    name: "MAINTENANCE_WINDOW".to_string(),
                    value: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                },
                OrderProperty {
                    name: "NOTE_GENERAL".to_string(),
                    value: "Upgrade instance configuration.".to_string(),
                },
            ],
            virtual_guests: vec![GuestRef { id }],
            ..ProductOrder::default()
        };

        info!(vm_id = id, prices = order.prices.len(), "Placing upgrade order");
        self.api.place_order(&order).await
    }

    async fn attach_second_disk_to_instance(&self, id: i64, size_gb: i64) -> Result<()> {
        let transaction = self.timeouts.transaction();
        self.wait_instance_has_none_active_transaction(id, deadline_after(transaction))
            .await
            .context("Waiting until instance has none active transaction before upgrading")?;

        let upgrade = UpgradeRequest {
            additional_disk_gb: size_gb,
            ..UpgradeRequest::default()
        };
        match self.upgrade_instance(id, &upgrade).await {
            Err(err) if err.exception_kind() == Some(ExceptionKind::CurrentPriceProvided) => {
                info!(vm_id = id, size_gb, "Second disk already present");
                return Ok(());
            }
            Err(err) => {
                return Err(err.context(format!(
                    "Adding second disk with size '{size_gb}' to virtual guest of id '{id}'"
                )))
            }
            Ok(_) => {}
        }

        self.wait_instance_has_active_transaction(id, deadline_after(transaction))
            .await
            .context("Waiting until instance has active transaction after upgrading instance")?;
        self.wait_instance_has_none_active_transaction(id, deadline_after(transaction))
            .await
            .context("Waiting until instance has none active transaction after upgrading instance")?;
        self.wait_instance_until_ready(id, deadline_after(transaction))
            .await
            .context("Waiting until instance is ready after upgrading instance")
    }

    async fn order_block_volume(&self, request: &VolumeRequest) -> Result<OrderReceipt> {
        let location_id = self.location_id(&request.location).await.map_err(|_| {
            Error::ValidationError(
                "Invalid datacenter name specified. Please provide the lower case short name (e.g.: dal09)"
                    .to_string(),
            )
        })?;

        let package = self
            .storage_package(pricing::PERFORMANCE_STORAGE_ISCSI)
            .await?;

        let mut prices = vec![
            pricing::find_performance_price(&package, pricing::PERFORMANCE_STORAGE_ISCSI)?,
            pricing::find_performance_space_price(&package, request.size_gb)?,
        ];
        prices.push(if request.iops == 0 {
            let tier = match request.size_gb {
                250 | 500 => 1000,
                size => size,
            };
            self.maximum_iops_price(tier).await?
        } else {
            pricing::find_performance_iops_price(&package, request.size_gb, request.iops)?
        });
        if request.snapshot_space_gb > 0 {
            prices.push(pricing::find_snapshot_space_price(
                &package,
                request.snapshot_space_gb,
            )?);
        }

        let order = ProductOrder {
            complex_type: PERFORMANCE_STORAGE_ORDER_TYPE.to_string(),
            package_id: package.id,
            prices: prices.into_iter().map(|id| PriceRef { id }).collect(),
            quantity: Some(1),
            location: Some(location_id.to_string()),
            os_format_type: Some(OsFormatType {
                id: 12,
                key_name: "LINUX".to_string(),
            }),
            ..ProductOrder::default()
        };

        info!(
            location = %request.location,
            size_gb = request.size_gb,
            iops = request.iops,
            "Placing block volume order"
        );
        self.api.place_order(&order).await
    }

    async fn create_volume(&self, request: &VolumeRequest) -> Result<NetworkStorage> {
        let receipt = self.order_block_volume(request).await?;
        let order_id = receipt.order_id.ok_or_else(|| {
            Error::ExternalServiceError {
                service: "SoftLayer".to_string(),
                message: format!(
                    "No order id returned after placing order with size of '{}', iops of '{}', location of `{}`",
                    request.size_gb, request.iops, request.location
                ),
            }
        })?;

        self.wait_volume_provisioning_with_order_id(
            order_id,
            deadline_after(self.timeouts.volume_provisioning()),
        )
        .await
    }

    async fn wait_volume_provisioning_with_order_id(
        &self,
        order_id: i64,
        until: Instant,
    ) -> Result<NetworkStorage> {
        let what = format!("Waiting volume provisioning with order id of '{order_id}'");
        poll_until(self.policy(), until, &what, || async move {
            let volumes = self
                .api
                .list_iscsi_network_storage(
                    VOLUME_DEFAULT_MASK,
                    filter_path(
                        "iscsiNetworkStorage.billingItem.orderItem.order.id",
                        json!(order_id),
                    ),
                )
                .await
                .with_context(|| format!("Getting volumes with order id of '{order_id}'"))?;
            Ok(match volumes.into_iter().next() {
                Some(volume) => Probe::Ready(volume),
                None => Probe::Pending,
            })
        })
        .await
    }

    async fn get_block_volume_details(
        &self,
        id: i64,
        mask: &str,
    ) -> Result<Option<NetworkStorage>> {
        let mask = or_default(mask, VOLUME_DETAIL_MASK);
        not_found_as_none(self.api.get_network_storage(id, &mask).await)
    }

    async fn cancel_block_volume(&self, id: i64, reason: &str, immediate: bool) -> Result<bool> {
        let volumes = self
            .api
            .list_iscsi_network_storage(
                "id,billingItem.id",
                filter_path("iscsiNetworkStorage.id", json!(id)),
            )
            .await?;

        let Some(volume) = volumes.into_iter().next() else {
            info!(volume_id = id, "Volume already gone");
            return Ok(true);
        };
        let billing_id = volume
            .billing_item
            .and_then(|item| item.id)
            .ok_or_else(|| Error::ExternalServiceError {
                service: "SoftLayer".to_string(),
                message: "No billing item is found to cancel".to_string(),
            })?;

        self.api
            .cancel_billing_item(billing_id, immediate, reason)
            .await
    }

    async fn authorize_host_to_volume(
        &self,
        instance_id: i64,
        volume_id: i64,
        until: Instant,
    ) -> Result<()> {
        let what = format!(
            "Authorizing instance with id '{instance_id}' to volume with id '{volume_id}'"
        );
        poll_until(self.policy(), until, &what, || async move {
            match self
                .api
                .allow_access_from_virtual_guest(volume_id, instance_id)
                .await
            {
                Ok(true) => Ok(Probe::Ready(())),
                Ok(false) => Ok(Probe::Pending),
                Err(err) => match err.exception_kind() {
                    Some(ExceptionKind::ObjectNotFound) => Err(Error::DiskNotFound(format!(
                        "Unable to find object with id of '{volume_id}'"
                    ))),
                    Some(kind) if kind.is_transient_storage_state() => {
                        debug!(volume_id, ?kind, "Volume busy, retrying authorization");
                        Ok(Probe::Pending)
                    }
                    _ => Err(err),
                },
            }
        })
        .await
    }

    async fn deauthorize_host_to_volume(
        &self,
        instance_id: i64,
        volume_id: i64,
        until: Instant,
    ) -> Result<()> {
        let what = format!(
            "De-Authorizing instance with id '{instance_id}' to volume with id '{volume_id}'"
        );
        poll_until(self.policy(), until, &what, || async move {
            match self
                .api
                .remove_access_from_virtual_guest(volume_id, instance_id)
                .await
            {
                Ok(true) => Ok(Probe::Ready(())),
                Ok(false) => Ok(Probe::Pending),
                Err(err) => match err.exception_kind() {
                    Some(ExceptionKind::ObjectNotFound) => Err(Error::DiskNotFound(format!(
                        "Unable to find object with id of '{volume_id}'"
                    ))),
                    Some(ExceptionKind::BlockingOperationInProgress) => {
                        debug!(volume_id, "Volume busy, retrying deauthorization");
                        Ok(Probe::Pending)
                    }
                    _ => Err(err),
                },
            }
        })
        .await
    }

    async fn create_ssh_key(&self, label: &str, key: &str, fingerprint: &str) -> Result<SshKey> {
        let template = SshKey {
            label: Some(label.to_string()),
            key: Some(key.to_string()),
            fingerprint: Some(fingerprint.to_string()),
            ..SshKey::default()
        };

        match self.api.create_ssh_key(&template).await {
            Err(err) if err.exception_kind() == Some(ExceptionKind::SshKeyAlreadyExists) => {
                let existing = self
                    .api
                    .list_ssh_keys(filter_path("sshKeys.key", json!(key)))
                    .await?;
                existing.into_iter().next().ok_or(err)
            }
            other => other,
        }
    }
}
