//! The top-level `Client`: wires a shared channel and connection envelope
//! to every subsystem facade.

use std::collections::HashMap;
use std::time::Duration;

use prost_types::Any;
use tokio::sync::OnceCell;
use tonic::transport::Channel;

use crate::conversation::ConversationClient;
use crate::crypto::CryptoClient;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::health;
use crate::jobs::JobsClient;
use crate::pb;
use crate::pubsub::{decode_payload, ParsedPayload, PubsubClient};
use crate::state::StateClient;
use crate::workflow::WorkflowClient;

/// The result of a direct service invocation, with the payload decoded per
/// its reported content type where recognized.
#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub content_type: String,
    pub parsed: Option<ParsedPayload>,
    pub raw: Vec<u8>,
}

/// Metadata reported by the sidecar: its instance id, registered components,
/// and any extended key/value pairs.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub id: String,
    pub registered_components: Vec<String>,
    pub extended: HashMap<String, String>,
}

/// Builder for a [`Client`]. Mirrors the environment contract documented on
/// `Envelope::from_env_or`: explicit fields always win over environment
/// variables, which in turn win over documented defaults.
#[derive(Default)]
pub struct ClientBuilder {
    target: Option<String>,
    api_token: Option<String>,
    user_agent: Option<String>,
    default_timeout: Option<Duration>,
    retry_on_unimplemented_fallback: bool,
    health_port: Option<u16>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retry_on_unimplemented_fallback(mut self, allowed: bool) -> Self {
        self.retry_on_unimplemented_fallback = allowed;
        self
    }

    /// Overrides the sidecar's HTTP health port, which otherwise falls back
    /// to `DAPR_HTTP_PORT` or the documented default.
    #[must_use]
    pub fn health_port(mut self, port: u16) -> Self {
        self.health_port = Some(port);
        self
    }

    /// Resolves the envelope and eagerly opens the shared gRPC channel.
    pub async fn connect(self) -> Result<Client> {
        let mut envelope = Envelope::from_env_or(self.target, self.api_token, self.user_agent)?;
        envelope.default_timeout = self.default_timeout;
        envelope.retry_on_unimplemented_fallback_allowed = self.retry_on_unimplemented_fallback;
        if let Some(port) = self.health_port {
            envelope.health_port = port;
        }

        let channel = envelope.connect().await?;
        Ok(Client::from_parts(channel, envelope))
    }
}

/// The application-facing facade over a single gRPC channel to the sidecar.
///
/// Cloning a `Client` is cheap: every subsystem facade shares the same
/// underlying `tonic::transport::Channel`, which multiplexes calls over one
/// connection.
#[derive(Clone)]
pub struct Client {
    envelope: Envelope,
    channel: Channel,
    closed: std::sync::Arc<OnceCell<()>>,
}

impl Client {
    /// Starts building a client with explicit overrides.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connects using only the environment contract and documented
    /// defaults.
    pub async fn connect() -> Result<Self> {
        ClientBuilder::new().connect().await
    }

    fn from_parts(channel: Channel, envelope: Envelope) -> Self {
        Self {
            envelope,
            channel,
            closed: std::sync::Arc::new(OnceCell::new()),
        }
    }

    fn runtime(&self) -> pb::runtime_client::RuntimeClient<Channel> {
        pb::runtime_client::RuntimeClient::new(self.channel.clone())
    }

    /// Blocks until the sidecar's health endpoint reports ready, or
    /// `deadline` elapses.
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<()> {
        health::wait_until_ready(&self.envelope, deadline).await
    }

    #[must_use]
    pub fn state(&self) -> StateClient {
        StateClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn pubsub(&self) -> PubsubClient {
        PubsubClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn crypto(&self) -> CryptoClient {
        CryptoClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn workflow(&self) -> WorkflowClient {
        WorkflowClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn conversation(&self) -> ConversationClient {
        ConversationClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn jobs(&self) -> JobsClient {
        JobsClient::new(self.runtime(), self.envelope.clone())
    }

    #[must_use]
    pub fn configuration(&self) -> crate::config_watcher::ConfigurationClient {
        crate::config_watcher::ConfigurationClient::new(self.runtime(), self.envelope.clone())
    }

    /// Invokes a method on another application by id, via the sidecar's
    /// service-invocation building block.
    pub async fn invoke_service(
        &self,
        app_id: &str,
        method: &str,
        data: Option<Any>,
        content_type: &str,
        verb: &str,
        querystring: &str,
    ) -> Result<InvokeResult> {
        let request = self.envelope.apply(tonic::Request::new(pb::InvokeServiceRequest {
            id: app_id.to_owned(),
            message: Some(pb::InvokeRequest {
                method: method.to_owned(),
                data,
                content_type: content_type.to_owned(),
                http_extension: Some(pb::HttpExtension {
                    verb: verb.to_owned(),
                    querystring: querystring.to_owned(),
                }),
            }),
        }))?;

        let response = self.runtime().invoke_service(request).await?.into_inner();
        let raw = response.data.map(|any| any.value).unwrap_or_default();
        let parsed = decode_payload(&response.content_type, &raw);

        Ok(InvokeResult {
            content_type: response.content_type,
            parsed,
            raw,
        })
    }

    /// Invokes an output binding by name.
    pub async fn invoke_binding(
        &self,
        name: &str,
        operation: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let request = self.envelope.apply(tonic::Request::new(pb::InvokeBindingRequest {
            name: name.to_owned(),
            data,
            metadata,
            operation: operation.to_owned(),
        }))?;

        let response = self.runtime().invoke_binding(request).await?.into_inner();
        Ok((response.data, response.metadata))
    }

    /// Reads the sidecar's reported metadata.
    pub async fn get_metadata(&self) -> Result<Metadata> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetMetadataRequest {}))?;
        let response = self.runtime().get_metadata(request).await?.into_inner();
        Ok(Metadata {
            id: response.id,
            registered_components: response.registered_components,
            extended: response.extended_metadata,
        })
    }

    /// Sets a single extended metadata key/value pair on the sidecar.
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::SetMetadataRequest {
            key: key.to_owned(),
            value: value.to_owned(),
        }))?;
        self.runtime().set_metadata(request).await?;
        Ok(())
    }

    /// Requests a graceful sidecar shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::ShutdownRequest {}))?;
        self.runtime().shutdown(request).await?;
        Ok(())
    }

    /// Marks this client handle closed. Idempotent; does not tear down the
    /// underlying channel, which may be shared by other clones.
    pub async fn close(&self) {
        let _ = self.closed.get_or_init(|| async {}).await;
    }
}
