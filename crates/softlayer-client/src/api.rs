//! Raw SoftLayer service capability.
//!
//! [`SoftLayerApi`] has one method per SoftLayer service call the CPI makes. It performs no
//! waiting and no interpretation beyond decoding; [`crate::client::ClientManager`] builds the
//! CPI's operations on top of it. [`crate::rest::RestApi`] is the HTTP implementation.

use crate::models::{
    BlockDeviceTemplateGroup, Hardware, Location, NetworkStorage, OrderReceipt, ProductItem,
    ProductItemPrice, ProductOrder, ProductPackage, ReloadConfiguration, SshKey, Transaction,
    VirtualGuest,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use softlayer_cpi_core::Result;

/// Guest reboot flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootKind {
    /// Let SoftLayer pick.
    Default,
    /// ACPI reboot.
    Soft,
    /// Power cycle.
    Hard,
}

impl RebootKind {
    /// SoftLayer method name.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Default => "rebootDefault",
            Self::Soft => "rebootSoft",
            Self::Hard => "rebootHard",
        }
    }
}

/// SoftLayer service calls used by the CPI.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SoftLayerApi: Send + Sync {
    /// `SoftLayer_Virtual_Guest::getObject`.
    async fn get_virtual_guest(&self, id: i64, mask: &str) -> Result<VirtualGuest>;

    /// `SoftLayer_Account::getVirtualGuests` with an object filter.
    async fn list_virtual_guests(&self, mask: &str, filter: Value) -> Result<Vec<VirtualGuest>>;

    /// `SoftLayer_Virtual_Guest::createObject`.
    async fn create_virtual_guest(&self, template: &VirtualGuest) -> Result<VirtualGuest>;

    /// `SoftLayer_Virtual_Guest::editObject`.
    async fn edit_virtual_guest(&self, id: i64, template: &VirtualGuest) -> Result<bool>;

    /// `SoftLayer_Virtual_Guest::deleteObject`.
    async fn delete_virtual_guest(&self, id: i64) -> Result<bool>;

    /// `SoftLayer_Virtual_Guest::reboot{Default,Soft,Hard}`.
    async fn reboot_virtual_guest(&self, id: i64, kind: RebootKind) -> Result<bool>;

    /// `SoftLayer_Virtual_Guest::reloadOperatingSystem` with `FORCE`.
    async fn reload_operating_system(&self, id: i64, config: &ReloadConfiguration) -> Result<()>;

    /// `SoftLayer_Virtual_Guest::setTags`.
    async fn set_virtual_guest_tags(&self, id: i64, tags: &str) -> Result<bool>;

    /// `SoftLayer_Virtual_Guest::getActiveTransactions`.
    async fn get_active_transactions(&self, id: i64) -> Result<Vec<Transaction>>;

    /// `SoftLayer_Virtual_Guest::getActiveTransaction`.
    async fn get_active_transaction(&self, id: i64) -> Result<Option<Transaction>>;

    /// `SoftLayer_Virtual_Guest::getLastTransaction`.
    async fn get_last_transaction(&self, id: i64) -> Result<Option<Transaction>>;

    /// `SoftLayer_Virtual_Guest::getUpgradeItemPrices` including downgrades.
    async fn get_upgrade_item_prices(&self, id: i64) -> Result<Vec<ProductItemPrice>>;

    /// `SoftLayer_Virtual_Guest::getLocalDiskFlag`.
    async fn get_local_disk_flag(&self, id: i64) -> Result<bool>;

    /// `SoftLayer_Hardware_Server::getObject`.
    async fn get_hardware(&self, id: i64, mask: &str) -> Result<Hardware>;

    /// `SoftLayer_Hardware_Server::rebootSoft`.
    async fn reboot_hardware(&self, id: i64) -> Result<bool>;

    /// `SoftLayer_Hardware_Server::setTags`.
    async fn set_hardware_tags(&self, id: i64, tags: &str) -> Result<bool>;

    /// `SoftLayer_Virtual_Guest_Block_Device_Template_Group::getObject`.
    async fn get_image(&self, id: i64, mask: &str) -> Result<BlockDeviceTemplateGroup>;

    /// `SoftLayer_Network_Storage::getObject`.
    async fn get_network_storage(&self, id: i64, mask: &str) -> Result<NetworkStorage>;

    /// `SoftLayer_Account::getIscsiNetworkStorage` with an object filter.
    async fn list_iscsi_network_storage(
        &self,
        mask: &str,
        filter: Value,
    ) -> Result<Vec<NetworkStorage>>;

    /// `SoftLayer_Network_Storage::allowAccessFromVirtualGuest`.
    async fn allow_access_from_virtual_guest(&self, volume_id: i64, guest_id: i64)
        -> Result<bool>;

    /// `SoftLayer_Network_Storage::removeAccessFromVirtualGuest`.
    async fn remove_access_from_virtual_guest(
        &self,
        volume_id: i64,
        guest_id: i64,
    ) -> Result<bool>;

    /// `SoftLayer_Product_Package::getAllObjects` with an object filter.
    async fn list_product_packages(&self, mask: &str, filter: Value)
        -> Result<Vec<ProductPackage>>;

    /// `SoftLayer_Product_Package::getItems`.
    async fn get_package_items(&self, package_id: i64, mask: &str) -> Result<Vec<ProductItem>>;

    /// `SoftLayer_Product_Package::getItemPrices` with an object filter.
    async fn get_package_item_prices(
        &self,
        package_id: i64,
        filter: Value,
    ) -> Result<Vec<ProductItemPrice>>;

    /// `SoftLayer_Product_Order::placeOrder` (never a quote).
    async fn place_order(&self, order: &ProductOrder) -> Result<OrderReceipt>;

    /// `SoftLayer_Location_Datacenter::getDatacenters` with an object filter.
    async fn list_datacenters(&self, filter: Value) -> Result<Vec<Location>>;

    /// `SoftLayer_Billing_Item::cancelItem`.
    async fn cancel_billing_item(&self, id: i64, immediate: bool, reason: &str) -> Result<bool>;

    /// `SoftLayer_Security_Ssh_Key::createObject`.
    async fn create_ssh_key(&self, key: &SshKey) -> Result<SshKey>;

    /// `SoftLayer_Account::getSshKeys` with an object filter.
    async fn list_ssh_keys(&self, filter: Value) -> Result<Vec<SshKey>>;
}

/// Build an object filter applying `operation` at a dotted `path`.
///
/// `filter_path("virtualGuests.primaryIpAddress", "10.0.0.1".into())` yields
/// `{"virtualGuests":{"primaryIpAddress":{"operation":"10.0.0.1"}}}`.
#[must_use]
pub fn filter_path(path: &str, operation: Value) -> Value {
    let mut node = serde_json::json!({ "operation": operation });
    for segment in path.rsplit('.') {
        let mut map = Map::new();
        map.insert(segment.to_string(), node);
        node = Value::Object(map);
    }
    node
}

/// Deep-merge object filters.
#[must_use]
pub fn merge_filters(filters: impl IntoIterator<Item = Value>) -> Value {
    fn merge(target: &mut Value, source: Value) {
        match (target, source) {
            (Value::Object(target), Value::Object(source)) => {
                for (key, value) in source {
                    match target.get_mut(&key) {
                        Some(existing) => merge(existing, value),
                        None => {
                            target.insert(key, value);
                        }
                    }
                }
            }
            (target, source) => *target = source,
        }
    }

    let mut merged = Value::Object(Map::new());
    for filter in filters {
        merge(&mut merged, filter);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_path() {
        assert_eq!(
            filter_path("iscsiNetworkStorage.billingItem.orderItem.order.id", json!(42)),
            json!({"iscsiNetworkStorage": {"billingItem": {"orderItem": {"order": {"id": {"operation": 42}}}}}})
        );
    }

    #[test]
    fn test_merge_filters() {
        let merged = merge_filters([
            filter_path("categories.categoryCode", json!("performance_storage_iscsi")),
            filter_path("statusCode", json!("ACTIVE")),
            filter_path("categories.id", json!(3)),
        ]);

        assert_eq!(
            merged,
            json!({
                "categories": {
                    "categoryCode": {"operation": "performance_storage_iscsi"},
                    "id": {"operation": 3}
                },
                "statusCode": {"operation": "ACTIVE"}
            })
        );
    }

    #[test]
    fn test_reboot_methods() {
        assert_eq!(RebootKind::Soft.method(), "rebootSoft");
        assert_eq!(RebootKind::Hard.method(), "rebootHard");
        assert_eq!(RebootKind::Default.method(), "rebootDefault");
    }
}
