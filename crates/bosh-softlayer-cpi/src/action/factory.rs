//! Builds a [`Dispatcher`] from a loaded configuration.

use super::Dispatcher;
use crate::disk::SoftLayerDisks;
use crate::registry::HttpRegistryClient;
use crate::ssh::SshpassClient;
use crate::stemcell::SoftLayerStemcellFinder;
use crate::vm::{CreatorOptions, SoftLayerCreator, SoftLayerVmFinder, VmServices};
use softlayer_client::{ClientManager, SoftLayerClient};
use softlayer_cpi_core::config::CpiConfig;
use softlayer_cpi_core::{Result, ResultExt};
use std::sync::Arc;

/// Wire the production components for `config`.
///
/// # Errors
///
/// Returns an error if the SoftLayer or registry endpoint cannot be used.
pub fn dispatcher_from_config(config: &CpiConfig) -> Result<Dispatcher> {
    let properties = config.properties();

    let client: Arc<dyn SoftLayerClient> = Arc::new(
        ClientManager::from_config(&properties.softlayer, properties.timeouts)
            .context("Creating SoftLayer client")?,
    );
    let registry = HttpRegistryClient::from_config(&properties.registry)
        .context("Creating registry client")?;

    let services = VmServices {
        client: Arc::clone(&client),
        ssh: Arc::new(SshpassClient::new()),
        registry: Arc::new(registry),
        timeouts: properties.timeouts,
    };
    let finder = Arc::new(SoftLayerVmFinder::new(services.clone()));
    let creator = SoftLayerCreator::new(
        services,
        finder.clone(),
        CreatorOptions::from_properties(properties),
    );
    let disks = Arc::new(SoftLayerDisks::new(Arc::clone(&client)));

    Ok(Dispatcher::new(
        Arc::new(SoftLayerStemcellFinder::new(client)),
        Arc::new(creator),
        finder,
        disks.clone(),
        disks,
    ))
}
