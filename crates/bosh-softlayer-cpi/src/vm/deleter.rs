//! Guest deletion and the waits around it.

use softlayer_client::SoftLayerClient;
use softlayer_cpi_core::config::Timeouts;
use softlayer_cpi_core::poll::{deadline_after, poll_until, PollPolicy, Probe};
use softlayer_cpi_core::{Result, ResultExt};
use std::sync::Arc;
use tracing::info;

/// Tears down virtual guests.
///
/// Deletion drains running transactions, cancels the guest and waits for the delete transaction
/// to start. It then waits for the guest to disappear, unless the running transaction is a long
/// one (monthly billed guests), in which case the delete is accepted as in progress.
#[derive(Clone)]
pub struct VmDeleter {
    client: Arc<dyn SoftLayerClient>,
    timeouts: Timeouts,
}

impl VmDeleter {
    /// Create a deleter.
    #[must_use]
    pub fn new(client: Arc<dyn SoftLayerClient>, timeouts: Timeouts) -> Self {
        Self { client, timeouts }
    }

    fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.timeouts.poll_interval(), self.timeouts.transient_retries)
    }

    /// Delete guest `id`. A guest that is already gone is deleted.
    ///
    /// # Errors
    ///
    /// Returns a timeout error if the delete transaction does not start or settle in time, or
    /// the error of the failing SoftLayer call.
    pub async fn delete(&self, id: i64) -> Result<()> {
        if !self.client.delete_instance(id).await? {
            return Ok(());
        }

        if !self.wait_delete_started(id).await? {
            info!(vm_id = id, "VM doesn't exist. Delete done");
            return Ok(());
        }
        self.wait_delete_settled(id).await
    }

    /// `false` when the guest vanished before a transaction was seen.
    async fn wait_delete_started(&self, id: i64) -> Result<bool> {
        let client = &self.client;
        poll_until(
            self.policy(),
            deadline_after(self.timeouts.delete_settle()),
            "Waiting for DeleteVM transaction to start",
            || async move {
                match client.get_active_transactions(id).await {
                    Ok(transactions) if !transactions.is_empty() => {
                        info!(vm_id = id, "Delete VM transaction started");
                        Ok(Probe::Ready(true))
                    }
                    Ok(_) => Ok(Probe::Pending),
                    Err(err) if err.is_not_found() => Ok(Probe::Ready(false)),
                    Err(err) => Err(err).context("Getting active transactions"),
                }
            },
        )
        .await
    }

    async fn wait_delete_settled(&self, id: i64) -> Result<()> {
        let client = &self.client;
        let threshold = self.timeouts.long_transaction_threshold().as_secs_f64();
        poll_until(
            self.policy(),
            deadline_after(self.timeouts.delete_settle()),
            "After deleting a vm, waiting for active transactions to complete",
            || async move {
                let exists = match client.get_instance(id, "id").await {
                    Ok(guest) => guest.is_some_and(|g| g.id.is_some()),
                    Err(err) if err.is_not_found() => false,
                    Err(err) => return Err(err),
                };
                if !exists {
                    info!(vm_id = id, "VM doesn't exist. Delete done");
                    return Ok(Probe::Ready(()));
                }

                let transaction = match client.get_active_transaction(id).await {
                    Ok(transaction) => transaction,
                    Err(err) if err.is_not_found() => return Ok(Probe::Ready(())),
                    Err(err) => return Err(err).context("Getting active transaction"),
                };
                let average = transaction
                    .as_ref()
                    .and_then(|t| t.average_duration())
                    .unwrap_or_default();
                if average > threshold {
                    info!(
                        vm_id = id,
                        average,
                        "Deleting VM instance had been launched and it is a long transaction"
                    );
                    return Ok(Probe::Ready(()));
                }
                info!(vm_id = id, "Short transaction, waiting for it to complete");
                Ok(Probe::Pending)
            },
        )
        .await
    }
}
