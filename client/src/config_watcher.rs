//! Configuration subscription watcher: a one-shot subscribe call that spawns
//! a background receive task, synchronizes the first-message handshake, and
//! dispatches updates to a handler.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tonic::transport::Channel;
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::Result;
use crate::pb;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);

/// A single configuration value with its version and sidecar-side metadata.
#[derive(Debug, Clone)]
pub struct ConfigurationItem {
    pub value: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
}

impl From<pb::ConfigurationItem> for ConfigurationItem {
    fn from(item: pb::ConfigurationItem) -> Self {
        Self {
            value: item.value,
            version: item.version,
            metadata: item.metadata,
        }
    }
}

/// A batch of updated configuration items delivered for a subscription.
#[derive(Debug, Clone)]
pub struct ConfigurationUpdate {
    pub subscription_id: String,
    pub items: HashMap<String, ConfigurationItem>,
}

/// Typed facade over `GetConfigurationAlpha1`,
/// `SubscribeConfigurationAlpha1` and `UnsubscribeConfigurationAlpha1`.
#[derive(Clone)]
pub struct ConfigurationClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<Channel>,
    pub(crate) envelope: Envelope,
}

impl ConfigurationClient {
    pub(crate) fn new(inner: pb::runtime_client::RuntimeClient<Channel>, envelope: Envelope) -> Self {
        Self { inner, envelope }
    }

    /// Reads the current value of the given keys.
    pub async fn get_configuration(
        &self,
        store: &str,
        keys: Vec<String>,
        metadata: HashMap<String, String>,
    ) -> Result<HashMap<String, ConfigurationItem>> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetConfigurationRequest {
            store_name: store.to_owned(),
            keys,
            metadata,
        }))?;

        let response = self
            .inner
            .clone()
            .get_configuration_alpha1(request)
            .await?
            .into_inner();

        Ok(response
            .items
            .into_iter()
            .map(|(k, v)| (k, v.into()))
            .collect())
    }

    /// Starts a background watch. Returns the subscription id once the
    /// handshake has been observed, or `None` if the sidecar never sends a
    /// first message within the handshake deadline.
    pub async fn subscribe_configuration<H>(
        &self,
        store: &str,
        keys: Vec<String>,
        metadata: HashMap<String, String>,
        mut handler: H,
    ) -> Result<Option<String>>
    where
        H: FnMut(ConfigurationUpdate) + Send + 'static,
    {
        let request = self.envelope.apply(tonic::Request::new(pb::SubscribeConfigurationRequest {
            store_name: store.to_owned(),
            keys,
            metadata,
        }))?;

        let mut stream = self
            .inner
            .clone()
            .subscribe_configuration_alpha1(request)
            .await?
            .into_inner();

        let (handshake_tx, handshake_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut handshake_tx = Some(handshake_tx);
            while let Some(result) = stream.next().await {
                let response = match result {
                    Ok(response) => response,
                    Err(status) => {
                        warn!(error = %status, "configuration watch stream failed");
                        return;
                    }
                };

                let update = ConfigurationUpdate {
                    subscription_id: response.id.clone(),
                    items: response.items.into_iter().map(|(k, v)| (k, v.into())).collect(),
                };

                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(response.id.clone());
                    if update.items.is_empty() {
                        continue;
                    }
                }

                if !update.items.is_empty() {
                    handler(update);
                }
            }
        });

        match tokio::time::timeout(HANDSHAKE_DEADLINE, handshake_rx).await {
            Ok(Ok(id)) => {
                info!(store, id, "configuration watch established");
                Ok(Some(id))
            }
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                warn!(store, "configuration watch handshake timed out");
                Ok(None)
            }
        }
    }

    /// Cancels a previously started subscription.
    pub async fn unsubscribe_configuration(&self, store: &str, id: &str) -> Result<bool> {
        let request = self.envelope.apply(tonic::Request::new(pb::UnsubscribeConfigurationRequest {
            store_name: store.to_owned(),
            id: id.to_owned(),
        }))?;

        let response = self
            .inner
            .clone()
            .unsubscribe_configuration_alpha1(request)
            .await?
            .into_inner();

        Ok(response.ok)
    }
}
