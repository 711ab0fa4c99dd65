//! SoftLayer data types.
//!
//! Only the attributes the CPI reads or writes are modelled. Everything is optional because
//! SoftLayer returns exactly what the object mask asked for.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// Power state key of a running guest.
pub const POWER_STATE_RUNNING: &str = "RUNNING";

/// Transaction status name of a finished transaction.
pub const TRANSACTION_STATUS_COMPLETE: &str = "COMPLETE";

/// SoftLayer encodes many numbers as strings; accept both.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// A virtual guest (`SoftLayer_Virtual_Guest`), also used as the creation template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualGuest {
    /// Guest id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Short hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Hostname plus domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_domain_name: Option<String>,
    /// vCPU count requested at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cpus: Option<u32>,
    /// vCPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<u32>,
    /// Memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    /// Hourly instead of monthly billing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_billing_flag: Option<bool>,
    /// Local instead of SAN disks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_disk_flag: Option<bool>,
    /// Dedicated host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_account_host_only_flag: Option<bool>,
    /// No public interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network_only_flag: Option<bool>,
    /// Datacenter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<Location>,
    /// Image the guest boots from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_device_template_group: Option<BlockDeviceTemplateGroup>,
    /// Port speeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_components: Option<Vec<NetworkComponent>>,
    /// Public interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_network_component: Option<NetworkComponent>,
    /// Private interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_backend_network_component: Option<NetworkComponent>,
    /// SSH keys installed at provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_keys: Option<Vec<SshKey>>,
    /// Public IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ip_address: Option<String>,
    /// Private IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_backend_ip_address: Option<String>,
    /// Power state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<PowerState>,
    /// Currently running transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_transaction: Option<Transaction>,
    /// Most recent OS reload transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operating_system_reload: Option<Transaction>,
    /// Set once initial provisioning finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_date: Option<DateTime<FixedOffset>>,
    /// OS details, including credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<OperatingSystem>,
}

impl VirtualGuest {
    /// Password of the given OS user, if SoftLayer returned it.
    #[must_use]
    pub fn password_for(&self, username: &str) -> Option<&str> {
        self.operating_system.as_ref()?.password_for(username)
    }

    /// Datacenter short name.
    #[must_use]
    pub fn datacenter_name(&self) -> Option<&str> {
        self.datacenter.as_ref()?.name.as_deref()
    }

    /// Whether the power state is `RUNNING`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.power_state
            .as_ref()
            .and_then(|state| state.key_name.as_deref())
            == Some(POWER_STATE_RUNNING)
    }

    /// Whether the active transaction is the last OS reload.
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        match (&self.active_transaction, &self.last_operating_system_reload) {
            (Some(active), Some(reload)) => active.id.is_some() && active.id == reload.id,
            _ => false,
        }
    }
}

/// A bare-metal server (`SoftLayer_Hardware`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    /// Hardware id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Short hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Hostname plus domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_domain_name: Option<String>,
    /// Public IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ip_address: Option<String>,
    /// Private IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_backend_ip_address: Option<String>,
    /// Datacenter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<Location>,
    /// OS details, including credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<OperatingSystem>,
}

impl Hardware {
    /// Password of the given OS user, if SoftLayer returned it.
    #[must_use]
    pub fn password_for(&self, username: &str) -> Option<&str> {
        self.operating_system.as_ref()?.password_for(username)
    }
}

/// Datacenter (`SoftLayer_Location`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Location id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Short name, e.g. `dal09`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Long name, e.g. `Dallas 9`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
}

impl Location {
    /// Location referenced by short name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Image template (`SoftLayer_Virtual_Guest_Block_Device_Template_Group`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceTemplateGroup {
    /// Image id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Image UUID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_identifier: Option<String>,
    /// Image name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Network component; only the attributes used for templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkComponent {
    /// Port speed in Mbps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<u32>,
    /// VLAN to place the interface on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_vlan: Option<NetworkVlan>,
}

/// VLAN reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkVlan {
    /// VLAN id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

/// Power state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    /// Key, e.g. `RUNNING` or `HALTED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Provisioning transaction (`SoftLayer_Provisioning_Version1_Transaction`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_status: Option<TransactionStatus>,
    /// Group, e.g. `Service Setup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_group: Option<TransactionGroup>,
}

impl Transaction {
    /// Historical average duration of the current status.
    #[must_use]
    pub fn average_duration(&self) -> Option<f64> {
        self.transaction_status.as_ref()?.average_duration
    }

    /// Group name.
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.transaction_group.as_ref()?.name.as_deref()
    }

    /// Status name.
    #[must_use]
    pub fn status_name(&self) -> Option<&str> {
        self.transaction_status.as_ref()?.name.as_deref()
    }
}

/// Transaction status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    /// Status name, e.g. `COMPLETE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// Historical average duration.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub average_duration: Option<f64>,
}

/// Transaction group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionGroup {
    /// Group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// OS details.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    /// OS user credentials.
    #[serde(default)]
    pub passwords: Vec<SoftwarePassword>,
}

impl OperatingSystem {
    /// Password of the given user.
    #[must_use]
    pub fn password_for(&self, username: &str) -> Option<&str> {
        self.passwords
            .iter()
            .find(|p| p.username.as_deref() == Some(username))
            .and_then(|p| p.password.as_deref())
    }
}

/// OS user credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoftwarePassword {
    /// User name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// SSH key (`SoftLayer_Security_Ssh_Key`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    /// Key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Public key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Block storage volume (`SoftLayer_Network_Storage`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStorage {
    /// Volume id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// iSCSI CHAP user; also part of the target IQN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// iSCSI CHAP password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Size in GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_gb: Option<u64>,
    /// Provisioned IOPS.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub iops: Option<f64>,
    /// LUN id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lun_id: Option<String>,
    /// iSCSI target portal IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_resource_backend_ip_address: Option<String>,
    /// Storage backend, carries the datacenter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_resource: Option<ServiceResource>,
    /// Billing item used to cancel the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_item: Option<BillingItem>,
}

/// Storage backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResource {
    /// Datacenter of the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<Location>,
}

/// Billing item reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingItem {
    /// Billing item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

/// Product package (`SoftLayer_Product_Package`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductPackage {
    /// Package id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Orderable items.
    #[serde(default)]
    pub items: Vec<ProductItem>,
}

/// Orderable item (`SoftLayer_Product_Item`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    /// Item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Description, e.g. `25 GB (SAN)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Capacity in the item's unit (GB, IOPS, cores, Mbps).
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub capacity: Option<f64>,
    /// Categories of the item.
    #[serde(default)]
    pub categories: Vec<ProductItemCategory>,
    /// Prices of the item.
    #[serde(default)]
    pub prices: Vec<ProductItemPrice>,
}

impl ProductItem {
    /// Capacity rounded to an integer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn capacity_units(&self) -> Option<i64> {
        self.capacity.map(|c| c.round() as i64)
    }
}

/// Item price (`SoftLayer_Product_Item_Price`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductItemPrice {
    /// Price id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Set for location specific prices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_group_id: Option<i64>,
    /// Categories of the price.
    #[serde(default)]
    pub categories: Vec<ProductItemCategory>,
    /// Lower bound of the capacity this price applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_restriction_minimum: Option<String>,
    /// Upper bound of the capacity this price applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_restriction_maximum: Option<String>,
    /// The priced item, when requested by the mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<ProductItem>>,
}

impl ProductItemPrice {
    /// Whether the price belongs to the given category.
    #[must_use]
    pub fn has_category(&self, code: &str) -> bool {
        has_category(&self.categories, code)
    }
}

/// Whether any category carries the code.
#[must_use]
pub fn has_category(categories: &[ProductItemCategory], code: &str) -> bool {
    categories
        .iter()
        .any(|c| c.category_code.as_deref() == Some(code))
}

/// Price category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductItemCategory {
    /// Category code, e.g. `guest_disk1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_code: Option<String>,
}

impl ProductItemCategory {
    /// Category with the given code.
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            category_code: Some(code.into()),
        }
    }
}

/// Order container (`SoftLayer_Container_Product_Order` and subtypes).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductOrder {
    /// Concrete order type.
    pub complex_type: String,
    /// Package the prices belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<i64>,
    /// Prices, by id.
    #[serde(default)]
    pub prices: Vec<PriceRef>,
    /// Quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Location id as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Order properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<OrderProperty>,
    /// Guests an upgrade applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_guests: Vec<GuestRef>,
    /// iSCSI OS format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_format_type: Option<OsFormatType>,
}

/// Price reference inside an order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceRef {
    /// Price id.
    pub id: i64,
}

/// Named order property.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// Guest reference inside an order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestRef {
    /// Guest id.
    pub id: i64,
}

/// iSCSI OS format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsFormatType {
    /// Format id.
    pub id: i64,
    /// Format key, e.g. `LINUX`.
    pub key_name: String,
}

/// Order receipt (`SoftLayer_Container_Product_Order_Receipt`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    /// Order id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

/// OS reload configuration (`SoftLayer_Container_Hardware_Server_Configuration`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReloadConfiguration {
    /// Image to install.
    pub image_template_id: i64,
    /// SSH keys to install.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_key_ids: Vec<i64>,
}
