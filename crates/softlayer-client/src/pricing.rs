//! Product catalog price selection.
//!
//! Orders reference prices by id. These helpers pick the price matching a requested capacity
//! out of a package or a price list. Location specific prices (those with a
//! `locationGroupId`) are never selected.

use crate::models::{has_category, ProductItem, ProductItemPrice, ProductPackage};
use softlayer_cpi_core::{Error, Result};

/// Category of the performance iSCSI storage base price.
pub const PERFORMANCE_STORAGE_ISCSI: &str = "performance_storage_iscsi";

/// Category of performance storage capacity prices.
pub const PERFORMANCE_STORAGE_SPACE: &str = "performance_storage_space";

/// Category of performance storage IOPS prices.
pub const PERFORMANCE_STORAGE_IOPS: &str = "performance_storage_iops";

/// Category of snapshot space prices.
pub const STORAGE_SNAPSHOT_SPACE: &str = "storage_snapshot_space";

/// Category of a guest's second disk.
pub const EPHEMERAL_DISK_CATEGORY: &str = "guest_disk1";

/// Package holding the performance storage IOPS tiers.
pub const NETWORK_PERFORMANCE_STORAGE_PACKAGE_ID: i64 = 222;

/// Configuration options a guest upgrade can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOption {
    /// vCPU count.
    GuestCore,
    /// Memory in GB.
    Ram,
    /// Port speed in Mbps.
    PortSpeed,
}

impl UpgradeOption {
    /// Price category of the option.
    #[must_use]
    pub const fn category_code(self) -> &'static str {
        match self {
            Self::GuestCore => "guest_core",
            Self::Ram => "ram",
            Self::PortSpeed => "port_speed",
        }
    }
}

impl std::fmt::Display for UpgradeOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.category_code())
    }
}

fn priced(price: &ProductItemPrice) -> Option<i64> {
    if price.location_group_id.is_some() {
        return None;
    }
    price.id
}

fn item_prices<'a>(
    items: &'a [ProductItem],
    category: &'a str,
) -> impl Iterator<Item = (&'a ProductItem, &'a ProductItemPrice)> + 'a {
    items.iter().flat_map(move |item| {
        item.prices
            .iter()
            .filter(move |price| price.has_category(category))
            .map(move |price| (item, price))
    })
}

/// The storage base price of a performance package.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when the package has no such price.
pub fn find_performance_price(package: &ProductPackage, category: &str) -> Result<i64> {
    item_prices(&package.items, category)
        .find_map(|(_, price)| priced(price))
        .ok_or_else(|| {
            Error::ValidationError("Unable to find price for performance storage".to_string())
        })
}

/// The capacity price for a volume of `size_gb`.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when no item has that capacity.
pub fn find_performance_space_price(package: &ProductPackage, size_gb: i64) -> Result<i64> {
    item_prices(&package.items, PERFORMANCE_STORAGE_SPACE)
        .filter(|(item, _)| item.capacity_units() == Some(size_gb))
        .find_map(|(_, price)| priced(price))
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "Unable to find disk space price with size of {size_gb} for the given volume"
            ))
        })
}

/// The IOPS price for `iops` whose capacity restriction brackets `size_gb`.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when no price matches.
pub fn find_performance_iops_price(
    package: &ProductPackage,
    size_gb: i64,
    iops: i64,
) -> Result<i64> {
    item_prices(&package.items, PERFORMANCE_STORAGE_IOPS)
        .filter(|(item, _)| item.capacity_units() == Some(iops))
        .filter(|(_, price)| brackets(price, size_gb))
        .find_map(|(_, price)| priced(price))
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "Unable to find price for {iops} iops for the given volume"
            ))
        })
}

fn brackets(price: &ProductItemPrice, size_gb: i64) -> bool {
    let bound = |value: Option<&String>| value.and_then(|v| v.trim().parse::<i64>().ok());
    match (
        bound(price.capacity_restriction_minimum.as_ref()),
        bound(price.capacity_restriction_maximum.as_ref()),
    ) {
        (Some(min), Some(max)) => (min..=max).contains(&size_gb),
        _ => false,
    }
}

/// The snapshot space price for `size_gb` of snapshot capacity.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when no item has that capacity.
pub fn find_snapshot_space_price(package: &ProductPackage, size_gb: i64) -> Result<i64> {
    item_prices(&package.items, STORAGE_SNAPSHOT_SPACE)
        .filter(|(item, _)| item.capacity_units() == Some(size_gb))
        .find_map(|(_, price)| priced(price))
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "Unable to find snapshot space price with size of {size_gb}"
            ))
        })
}

/// The highest IOPS tier among `prices` listed for a volume of `size_gb`.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when no location independent price exists.
pub fn select_maximum_iops_price(prices: &[ProductItemPrice], size_gb: i64) -> Result<i64> {
    prices
        .iter()
        .filter(|price| price.location_group_id.is_none() && price.id.is_some())
        .max_by(|a, b| {
            let capacity = |p: &ProductItemPrice| {
                p.item
                    .as_ref()
                    .and_then(|item| item.capacity)
                    .unwrap_or_default()
            };
            capacity(a).total_cmp(&capacity(b))
        })
        .and_then(|price| price.id)
        .ok_or_else(|| {
            Error::ValidationError(format!(
                "No proper performance storage (iSCSI volume) for size {size_gb}"
            ))
        })
}

/// The smallest second-disk price of at least `size_gb` for the guest's disk type.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] when no disk is large enough.
pub fn select_second_disk_price(
    prices: &[ProductItemPrice],
    size_gb: i64,
    local_disk: bool,
) -> Result<i64> {
    let disk_type = if local_disk { "(LOCAL)" } else { "(SAN)" };

    prices
        .iter()
        .filter_map(|price| {
            let item = price.item.as_deref()?;
            let is_disk = has_category(&item.categories, EPHEMERAL_DISK_CATEGORY)
                || price.has_category(EPHEMERAL_DISK_CATEGORY);
            let described = item
                .description
                .as_deref()
                .is_some_and(|d| d.contains(disk_type));
            let capacity = item.capacity_units()?;
            (is_disk && described && capacity >= size_gb)
                .then_some((capacity, price.id?))
        })
        .min_by_key(|(capacity, _)| *capacity)
        .map(|(_, id)| id)
        .ok_or_else(|| {
            Error::ValidationError(format!("No proper {disk_type} disk for size {size_gb}"))
        })
}

/// The upgrade price for `option` at `value` among the package items.
///
/// Core prices are split into public and dedicated ("Private ...") items; port speed prices
/// must be for the public interface.
#[must_use]
pub fn price_id_for_upgrade(
    items: &[ProductItem],
    option: UpgradeOption,
    value: i64,
    public: bool,
) -> Option<i64> {
    items
        .iter()
        .filter(|item| item.capacity_units() == Some(value))
        .filter(|item| {
            let description = item.description.as_deref().unwrap_or_default();
            match option {
                UpgradeOption::GuestCore => public != description.starts_with("Private"),
                UpgradeOption::PortSpeed => description.contains("Public"),
                UpgradeOption::Ram => true,
            }
        })
        .flat_map(|item| item.prices.iter())
        .filter(|price| price.has_category(option.category_code()))
        .find_map(priced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductItemCategory;

    fn price(id: i64, category: &str) -> ProductItemPrice {
        ProductItemPrice {
            id: Some(id),
            categories: vec![ProductItemCategory::code(category)],
            ..ProductItemPrice::default()
        }
    }

    fn item(capacity: f64, description: &str, prices: Vec<ProductItemPrice>) -> ProductItem {
        ProductItem {
            capacity: Some(capacity),
            description: Some(description.to_string()),
            prices,
            ..ProductItem::default()
        }
    }

    fn storage_package() -> ProductPackage {
        let mut regional = price(1, PERFORMANCE_STORAGE_ISCSI);
        regional.location_group_id = Some(509);

        let mut iops_small = price(40, PERFORMANCE_STORAGE_IOPS);
        iops_small.capacity_restriction_minimum = Some("20".to_string());
        iops_small.capacity_restriction_maximum = Some("80".to_string());
        let mut iops_large = price(41, PERFORMANCE_STORAGE_IOPS);
        iops_large.capacity_restriction_minimum = Some("100".to_string());
        iops_large.capacity_restriction_maximum = Some("12000".to_string());

        ProductPackage {
            id: Some(222),
            name: Some("Performance".to_string()),
            items: vec![
                item(0.0, "Performance Storage", vec![regional, price(2, PERFORMANCE_STORAGE_ISCSI)]),
                item(20.0, "20 GB", vec![price(20, PERFORMANCE_STORAGE_SPACE)]),
                item(100.0, "100 GB", vec![price(100, PERFORMANCE_STORAGE_SPACE)]),
                item(1000.0, "1000 IOPS", vec![iops_small, iops_large]),
                item(10.0, "10 GB snapshot", vec![price(300, STORAGE_SNAPSHOT_SPACE)]),
            ],
        }
    }

    #[test]
    fn test_storage_prices() {
        let package = storage_package();

        assert_eq!(
            find_performance_price(&package, PERFORMANCE_STORAGE_ISCSI).unwrap(),
            2
        );
        assert_eq!(find_performance_space_price(&package, 100).unwrap(), 100);
        assert!(find_performance_space_price(&package, 40).is_err());
        assert_eq!(find_snapshot_space_price(&package, 10).unwrap(), 300);
    }

    #[test]
    fn test_iops_price_respects_capacity_restriction() {
        let package = storage_package();

        assert_eq!(find_performance_iops_price(&package, 20, 1000).unwrap(), 40);
        assert_eq!(find_performance_iops_price(&package, 100, 1000).unwrap(), 41);

        let err = find_performance_iops_price(&package, 90, 1000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Unable to find price for 1000 iops for the given volume"
        );
    }

    #[test]
    fn test_select_maximum_iops_price() {
        let with_capacity = |id: i64, capacity: f64, location: Option<i64>| ProductItemPrice {
            id: Some(id),
            location_group_id: location,
            item: Some(Box::new(ProductItem {
                capacity: Some(capacity),
                ..ProductItem::default()
            })),
            ..ProductItemPrice::default()
        };

        let prices = vec![
            with_capacity(1, 1000.0, None),
            with_capacity(2, 6000.0, Some(1)),
            with_capacity(3, 3000.0, None),
            with_capacity(4, 2000.0, None),
        ];
        assert_eq!(select_maximum_iops_price(&prices, 500).unwrap(), 3);
        assert!(select_maximum_iops_price(&prices[1..2], 500).is_err());
    }

    #[test]
    fn test_select_second_disk_price() {
        let disk = |id: i64, capacity: f64, description: &str| ProductItemPrice {
            id: Some(id),
            item: Some(Box::new(ProductItem {
                capacity: Some(capacity),
                description: Some(description.to_string()),
                categories: vec![ProductItemCategory::code(EPHEMERAL_DISK_CATEGORY)],
                ..ProductItem::default()
            })),
            ..ProductItemPrice::default()
        };

        let prices = vec![
            disk(1, 25.0, "25 GB (SAN)"),
            disk(2, 100.0, "100 GB (SAN)"),
            disk(3, 150.0, "150 GB (SAN)"),
            disk(4, 100.0, "100 GB (LOCAL)"),
        ];

        assert_eq!(select_second_disk_price(&prices, 100, false).unwrap(), 2);
        assert_eq!(select_second_disk_price(&prices, 30, false).unwrap(), 2);
        assert_eq!(select_second_disk_price(&prices, 50, true).unwrap(), 4);

        let err = select_second_disk_price(&prices, 500, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: No proper (SAN) disk for size 500"
        );
    }

    #[test]
    fn test_price_id_for_upgrade() {
        let items = vec![
            item(4.0, "4 x 2.0 GHz Cores", vec![price(10, "guest_core")]),
            item(4.0, "Private 4 x 2.0 GHz Cores", vec![price(11, "guest_core")]),
            item(8.0, "8 GB", vec![price(20, "ram")]),
            item(1000.0, "1 Gbps Private Network Uplink", vec![price(30, "port_speed")]),
            item(1000.0, "1 Gbps Public & Private Network Uplinks", vec![price(31, "port_speed")]),
        ];

        assert_eq!(
            price_id_for_upgrade(&items, UpgradeOption::GuestCore, 4, true),
            Some(10)
        );
        assert_eq!(
            price_id_for_upgrade(&items, UpgradeOption::GuestCore, 4, false),
            Some(11)
        );
        assert_eq!(price_id_for_upgrade(&items, UpgradeOption::Ram, 8, true), Some(20));
        assert_eq!(
            price_id_for_upgrade(&items, UpgradeOption::PortSpeed, 1000, true),
            Some(31)
        );
        assert_eq!(price_id_for_upgrade(&items, UpgradeOption::Ram, 16, true), None);
    }
}
