//! Stemcells are SoftLayer image templates managed outside the CPI.

use async_trait::async_trait;
use softlayer_client::client::IMAGE_DEFAULT_MASK;
use softlayer_client::SoftLayerClient;
use softlayer_cpi_core::{Error, Result, ResultExt};
use std::sync::Arc;

/// An image template usable as a stemcell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stemcell {
    /// Image template id
    pub id: i64,
    /// Image global identifier
    pub uuid: String,
}

/// Resolves stemcell CIDs to image templates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StemcellFinder: Send + Sync {
    /// Look up the image template with `id`.
    async fn find_by_id(&self, id: i64) -> Result<Stemcell>;
}

/// [`StemcellFinder`] over the SoftLayer image service.
#[derive(Clone)]
pub struct SoftLayerStemcellFinder {
    client: Arc<dyn SoftLayerClient>,
}

impl SoftLayerStemcellFinder {
    /// Create a finder.
    #[must_use]
    pub fn new(client: Arc<dyn SoftLayerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StemcellFinder for SoftLayerStemcellFinder {
    async fn find_by_id(&self, id: i64) -> Result<Stemcell> {
        let image = self
            .client
            .get_image(id, IMAGE_DEFAULT_MASK)
            .await
            .with_context(|| format!("Getting image with id '{id}'"))?
            .ok_or_else(|| Error::NotFound(format!("Stemcell '{id}' not found")))?;

        Ok(Stemcell {
            id: image.id.unwrap_or(id),
            uuid: image.global_identifier.unwrap_or_default(),
        })
    }
}
