//! A typed client for the sidecar runtime's gRPC API: connection
//! management, state and distributed locks, pub/sub, crypto, configuration
//! watching, workflow control, scheduled jobs and the conversational LLM
//! surface.
//!
//! [`Client`] is the entry point. Each subsystem is exposed as a small
//! facade (`client.state()`, `client.pubsub()`, ...) backed by one shared
//! `tonic` channel.

/// Generated wire types, exposed only so the in-process test harness can
/// implement the generated service trait against a fake backend. Not part
/// of the supported public API.
#[doc(hidden)]
pub mod pb;

pub mod actor;
pub mod client;
pub mod config_watcher;
pub mod conversation;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod health;
pub mod jobs;
pub mod lock;
pub mod pubsub;
pub mod state;
pub mod workflow;

pub use actor::{ActorStateClient, ActorStateEntry, StateChange, StateChangeKind};
pub use client::{Client, ClientBuilder, InvokeResult, Metadata};
pub use config_watcher::{ConfigurationClient, ConfigurationItem, ConfigurationUpdate};
pub use conversation::{ConversationClient, ConversationInput, ConversationResult, Parameter};
pub use crypto::{CryptoClient, DecryptOptions, EncryptOptions};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use jobs::{FailurePolicy, Job, JobInfo, JobsClient};
pub use lock::LockHandle;
pub use pubsub::{InboundMessage, PubsubClient, TopicResponse, TopicSubscription};
pub use state::{Consistency, Concurrency, StateClient, StateItem, StateResult};
pub use workflow::{WorkflowClient, WorkflowInstance, WorkflowStatus};
