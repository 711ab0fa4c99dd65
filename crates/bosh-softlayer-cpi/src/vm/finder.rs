//! Lookup of VMs by CID, virtual guests first, then bare metal.

use super::{BareMetalVm, VirtualGuestVm, Vm, VmFinder, VmServices};
use async_trait::async_trait;
use softlayer_client::client::{HARDWARE_DEFAULT_MASK, INSTANCE_DETAIL_MASK};
use softlayer_cpi_core::{Result, ResultExt};
use tracing::debug;

/// [`VmFinder`] trying the virtual guest service, then the hardware service.
#[derive(Clone)]
pub struct SoftLayerVmFinder {
    services: VmServices,
}

impl SoftLayerVmFinder {
    /// Create a finder handing its collaborators to the handles it builds.
    #[must_use]
    pub fn new(services: VmServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl VmFinder for SoftLayerVmFinder {
    async fn find(&self, id: i64) -> Result<Option<Box<dyn Vm>>> {
        let guest = self
            .services
            .client
            .get_instance(id, INSTANCE_DETAIL_MASK)
            .await
            .with_context(|| format!("Finding virtual guest with id '{id}'"))?;
        if let Some(guest) = guest {
            debug!(vm_id = id, "Found virtual guest");
            return Ok(Some(Box::new(VirtualGuestVm::new(
                id,
                guest,
                self.services.clone(),
            ))));
        }

        let hardware = self
            .services
            .client
            .get_hardware(id, HARDWARE_DEFAULT_MASK)
            .await
            .with_context(|| format!("Finding bare metal server with id '{id}'"))?;
        Ok(hardware.map(|hardware| {
            debug!(vm_id = id, "Found bare metal server");
            Box::new(BareMetalVm::new(id, hardware, self.services.clone())) as Box<dyn Vm>
        }))
    }
}
