//! Bidirectional-streaming pub/sub subscriber: per-message acknowledgement,
//! a queue-backed response pipeline, automatic reconnection, and a
//! higher-level handler loop.

mod subscription;

use std::collections::HashMap;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::pb;

pub use subscription::{decode_payload, InboundMessage, ParsedPayload, TopicResponse, TopicSubscription};

/// Typed facade over `PublishEvent`, `BulkPublishEventAlpha1` and
/// `SubscribeTopicEventsAlpha1`.
#[derive(Clone)]
pub struct PubsubClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<tonic::transport::Channel>,
    pub(crate) envelope: Envelope,
}

impl PubsubClient {
    pub(crate) fn new(
        inner: pb::runtime_client::RuntimeClient<tonic::transport::Channel>,
        envelope: Envelope,
    ) -> Self {
        Self { inner, envelope }
    }

    /// Publishes a single event.
    pub async fn publish(
        &self,
        pubsub_name: &str,
        topic: &str,
        data: Vec<u8>,
        data_content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::PublishEventRequest {
            pubsub_name: pubsub_name.to_owned(),
            topic: topic.to_owned(),
            data,
            data_content_type: data_content_type.to_owned(),
            metadata,
        }))?;

        self.inner.clone().publish_event(request).await?;
        Ok(())
    }

    /// Publishes many events in one call. Falls back to per-event `publish`
    /// calls when the sidecar reports `UNIMPLEMENTED` and the envelope's
    /// fallback flag is enabled; otherwise the error propagates directly.
    pub async fn bulk_publish(
        &self,
        pubsub_name: &str,
        topic: &str,
        entries: Vec<BulkPublishEntry>,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<BulkPublishFailure>> {
        let request = self.envelope.apply(tonic::Request::new(pb::BulkPublishEventRequest {
            pubsub_name: pubsub_name.to_owned(),
            topic: topic.to_owned(),
            entries: entries
                .iter()
                .cloned()
                .map(|entry| pb::BulkPublishEventRequestEntry {
                    entry_id: entry.entry_id,
                    event: entry.event,
                    content_type: entry.content_type,
                    metadata: entry.metadata,
                })
                .collect(),
            metadata: metadata.clone(),
        }))?;

        match self.inner.clone().bulk_publish_event_alpha1(request).await {
            Ok(response) => Ok(response
                .into_inner()
                .failed_entries
                .into_iter()
                .map(|f| BulkPublishFailure {
                    entry_id: f.entry_id,
                    error: f.error,
                })
                .collect()),
            Err(status)
                if status.code() == tonic::Code::Unimplemented
                    && self.envelope.retry_on_unimplemented_fallback_allowed =>
            {
                let mut failures = Vec::new();
                for entry in entries {
                    if let Err(err) = self
                        .publish(pubsub_name, topic, entry.event, &entry.content_type, metadata.clone())
                        .await
                    {
                        failures.push(BulkPublishFailure {
                            entry_id: entry.entry_id,
                            error: err.to_string(),
                        });
                    }
                }
                Ok(failures)
            }
            Err(status) => Err(status.into()),
        }
    }

    /// Opens a bidirectional subscription, returning once the handshake has
    /// completed.
    pub async fn subscribe(
        &self,
        pubsub_name: &str,
        topic: &str,
        metadata: HashMap<String, String>,
        dead_letter_topic: Option<String>,
    ) -> Result<TopicSubscription> {
        TopicSubscription::start(
            self.inner.clone(),
            self.envelope.clone(),
            pubsub_name.to_owned(),
            topic.to_owned(),
            metadata,
            dead_letter_topic,
        )
        .await
    }
}

/// One entry in a bulk-publish request.
#[derive(Debug, Clone)]
pub struct BulkPublishEntry {
    pub entry_id: String,
    pub event: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// A single failed entry reported by a bulk publish.
#[derive(Debug, Clone)]
pub struct BulkPublishFailure {
    pub entry_id: String,
    pub error: String,
}
