use std::sync::Arc;

use tracing::info;
use tracing::warn;

use super::availability::AvailabilityStateMachine;
use super::client::ClientError;
use super::client::ClientFactory;
use super::client::ClientSlot;
use super::client::RemoteClient;
use super::error::Error;
use super::error::Result;
use super::settings::Credentials;

/// Undecodable responses mean the password did not match; everything else is
/// passed through.
fn classify(e: ClientError) -> Error {
    if e.is_decode() {
        Error::Credentials
    } else {
        Error::Client(e)
    }
}

/// Build a client from `credentials` and check it with a single status probe.
///
/// The client is ended before returning an error.
pub async fn probe<F: ClientFactory>(factory: &F, credentials: &Credentials) -> Result<F::Client> {
    let client = factory.connect(credentials).await.map_err(classify)?;
    match client.status().await {
        Ok(_) => Ok(client),
        Err(e) => {
            client.end().await;
            Err(classify(e))
        }
    }
}

/// Swaps in a new client when the connection settings of a device change.
pub struct CredentialValidator<F: ClientFactory> {
    device_id: String,
    factory: Arc<F>,
    client: Arc<ClientSlot<F::Client>>,
    availability: Arc<AvailabilityStateMachine>,
}

impl<F: ClientFactory> CredentialValidator<F> {
    pub fn new(
        device_id: String,
        factory: Arc<F>,
        client: Arc<ClientSlot<F::Client>>,
        availability: Arc<AvailabilityStateMachine>,
    ) -> Self {
        Self {
            device_id,
            factory,
            client,
            availability,
        }
    }

    /// Check `credentials` against the backend and return the working client.
    ///
    /// The current client and availability are not touched; hand the client
    /// to [`Self::activate`] once the new settings are committed.
    pub async fn validate(&self, credentials: &Credentials) -> Result<F::Client> {
        info!("[{}] Validating new credentials", self.device_id);
        probe(self.factory.as_ref(), credentials)
            .await
            .inspect_err(|e| warn!("[{}] Credential validation failed: {}", self.device_id, e))
    }

    /// Make `client` the active one and mark the device available.
    ///
    /// Refused once the device has been removed, in which case `client` is
    /// ended.
    pub async fn activate(&self, client: F::Client) -> Result<()> {
        if self.availability.is_halted() {
            client.end().await;
            return Err(Error::Removed);
        }
        if let Some(previous) = self.client.replace(client) {
            previous.end().await;
        }
        self.availability.available().await;
        Ok(())
    }
}
