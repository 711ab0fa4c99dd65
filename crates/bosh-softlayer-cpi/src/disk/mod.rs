//! Persistent disks backed by SoftLayer performance iSCSI volumes.

pub mod iscsi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use softlayer_client::client::VOLUME_DETAIL_MASK;
use softlayer_client::{SoftLayerClient, VolumeRequest};
use softlayer_cpi_core::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::info;

/// Reason recorded when BOSH deletes a disk.
pub const DELETE_DISK_REASON: &str = "Delete disk from BOSH";

/// A persistent disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disk {
    /// Volume id
    pub id: i64,
}

impl Disk {
    /// Disk handle for volume `id`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self { id }
    }
}

/// `create_disk` cloud properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskCloudProperties {
    /// Requested IOPS; 0 picks the default tier for the size
    #[serde(default)]
    pub iops: i64,

    /// Snapshot space in GB; 0 orders none
    #[serde(default)]
    pub snapshot_space: i64,

    /// Datacenter short name, used when the disk is not created next to a VM
    #[serde(default)]
    pub datacenter: String,
}

/// Orders persistent disks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiskCreator: Send + Sync {
    /// Order a disk of `size_mb` and wait until it is provisioned.
    ///
    /// The location is `vm_datacenter` when given, else the datacenter of `properties`.
    async fn create(
        &self,
        size_mb: u64,
        properties: &DiskCloudProperties,
        vm_datacenter: Option<String>,
    ) -> Result<Disk>;
}

/// Looks up and removes persistent disks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiskFinder: Send + Sync {
    /// The disk with `id`, if the volume exists.
    async fn find(&self, id: i64) -> Result<Option<Disk>>;

    /// Cancel the volume with `id`; an absent volume is already deleted.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Convert a BOSH disk size in MB to whole GB, rounding up.
#[must_use]
pub const fn size_in_gb(size_mb: u64) -> u64 {
    size_mb.div_ceil(1024)
}

/// [`DiskCreator`] and [`DiskFinder`] over the SoftLayer client.
#[derive(Clone)]
pub struct SoftLayerDisks {
    client: Arc<dyn SoftLayerClient>,
}

impl SoftLayerDisks {
    /// Create the disk service.
    #[must_use]
    pub fn new(client: Arc<dyn SoftLayerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiskCreator for SoftLayerDisks {
    async fn create(
        &self,
        size_mb: u64,
        properties: &DiskCloudProperties,
        vm_datacenter: Option<String>,
    ) -> Result<Disk> {
        let location = vm_datacenter
            .filter(|name| !name.is_empty())
            .or_else(|| Some(properties.datacenter.clone()).filter(|name| !name.is_empty()))
            .ok_or_else(|| {
                Error::ValidationError("Invalid datacenter name specified.".to_string())
            })?;

        let size_gb = i64::try_from(size_in_gb(size_mb)).map_err(|_| {
            Error::ValidationError(format!("Disk size of {size_mb} MB is out of range"))
        })?;
        let request = VolumeRequest {
            location,
            size_gb,
            iops: properties.iops,
            snapshot_space_gb: properties.snapshot_space,
        };

        let volume = self
            .client
            .create_volume(&request)
            .await
            .with_context(|| format!("Creating volume with size '{size_gb}'"))?;
        let id = volume
            .id
            .ok_or_else(|| Error::ParseError("Provisioned volume has no id".to_string()))?;
        info!(volume_id = id, size_gb, location = %request.location, "Created disk");
        Ok(Disk::new(id))
    }
}

#[async_trait]
impl DiskFinder for SoftLayerDisks {
    async fn find(&self, id: i64) -> Result<Option<Disk>> {
        let volume = self
            .client
            .get_block_volume_details(id, VOLUME_DETAIL_MASK)
            .await
            .with_context(|| format!("Finding disk '{id}'"))?;
        Ok(volume.map(|_| Disk::new(id)))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.client.cancel_block_volume(id, DELETE_DISK_REASON, true).await {
            Ok(true) => {
                info!(volume_id = id, "Deleted disk");
                Ok(())
            }
            Ok(false) => Err(Error::ExternalServiceError {
                service: "SoftLayer".to_string(),
                message: format!("Cancelling volume '{id}' was not accepted"),
            }),
            Err(err) if err.is_not_found() => {
                info!(volume_id = id, "Disk already gone");
                Ok(())
            }
            Err(err) => Err(err.context(format!("Deleting disk '{id}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softlayer_client::{MockSoftLayerClient, NetworkStorage};

    #[test]
    fn test_size_in_gb_rounds_up() {
        assert_eq!(size_in_gb(20_480), 20);
        assert_eq!(size_in_gb(20_481), 21);
        assert_eq!(size_in_gb(1), 1);
    }

    #[tokio::test]
    async fn test_create_uses_vm_datacenter_first() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_create_volume()
            .withf(|request| {
                request.location == "dal09"
                    && request.size_gb == 20
                    && request.iops == 1000
                    && request.snapshot_space_gb == 0
            })
            .times(1)
            .returning(|_| {
                Ok(NetworkStorage {
                    id: Some(24_680),
                    ..NetworkStorage::default()
                })
            });

        let disks = SoftLayerDisks::new(Arc::new(client));
        let properties = DiskCloudProperties {
            iops: 1000,
            datacenter: "lon02".to_string(),
            ..DiskCloudProperties::default()
        };
        let disk = disks
            .create(20_480, &properties, Some("dal09".to_string()))
            .await
            .unwrap();
        assert_eq!(disk, Disk::new(24_680));
    }

    #[tokio::test]
    async fn test_create_without_location_fails_before_ordering() {
        let client = MockSoftLayerClient::new();
        let disks = SoftLayerDisks::new(Arc::new(client));

        let err = disks
            .create(1024, &DiskCloudProperties::default(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::ValidationError("Invalid datacenter name specified.".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_missing_volume_is_ok() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_cancel_block_volume()
            .withf(|id, reason, immediate| *id == 5 && reason == DELETE_DISK_REASON && *immediate)
            .returning(|_, _, _| Err(Error::NotFound("volume".to_string())));

        SoftLayerDisks::new(Arc::new(client)).delete(5).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_absent_volume() {
        let mut client = MockSoftLayerClient::new();
        client
            .expect_get_block_volume_details()
            .returning(|_, _| Ok(None));

        let found = SoftLayerDisks::new(Arc::new(client)).find(5).await.unwrap();
        assert!(found.is_none());
    }
}
