use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::transport::Channel;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::health;
use crate::pb;

const QUEUE_CAPACITY: usize = 64;
const RECONNECT_HEALTH_DEADLINE: Duration = Duration::from_secs(30);

/// Ack verdict for a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicResponse {
    Success,
    Retry,
    Drop,
}

impl TopicResponse {
    fn into_wire(self) -> pb::TopicEventResponseStatus {
        match self {
            Self::Success => pb::TopicEventResponseStatus::Success,
            Self::Retry => pb::TopicEventResponseStatus::Retry,
            Self::Drop => pb::TopicEventResponseStatus::Drop,
        }
    }
}

/// A payload decoded from the wire per `data_content_type`.
#[derive(Debug, Clone)]
pub enum ParsedPayload {
    Json(serde_json::Value),
    Text(String),
}

/// A single delivered pub/sub event.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub source: String,
    pub event_type: String,
    pub spec_version: String,
    pub topic: String,
    pub pubsub_name: String,
    pub data_content_type: String,
    pub raw_data: Vec<u8>,
    pub parsed_payload: Option<ParsedPayload>,
    pub extensions: HashMap<String, String>,
}

impl From<pb::TopicEventRequest> for InboundMessage {
    fn from(req: pb::TopicEventRequest) -> Self {
        let parsed_payload = decode_payload(&req.data_content_type, &req.data);
        Self {
            id: req.id,
            source: req.source,
            event_type: req.r#type,
            spec_version: req.spec_version,
            topic: req.topic,
            pubsub_name: req.pubsub_name,
            data_content_type: req.data_content_type,
            raw_data: req.data,
            parsed_payload,
            extensions: req.extensions,
        }
    }
}

/// Content-type-keyed decoding strategy table: JSON, text, or passthrough.
pub(crate) fn decode_payload(content_type: &str, data: &[u8]) -> Option<ParsedPayload> {
    if content_type == "application/json" || content_type.ends_with("+json") {
        serde_json::from_slice(data).ok().map(ParsedPayload::Json)
    } else if content_type == "text/plain" {
        String::from_utf8(data.to_vec()).ok().map(ParsedPayload::Text)
    } else {
        None
    }
}

struct AckRequest {
    id: String,
    status: TopicResponse,
}

/// A live subscription to a topic, backed by a bidirectional stream that
/// reconnects transparently on transient transport failures.
pub struct TopicSubscription {
    ack_tx: mpsc::Sender<AckRequest>,
    inbound_rx: AsyncMutex<mpsc::Receiver<InboundMessage>>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl TopicSubscription {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start(
        client: pb::runtime_client::RuntimeClient<Channel>,
        envelope: Envelope,
        pubsub_name: String,
        topic: String,
        metadata: HashMap<String, String>,
        dead_letter_topic: Option<String>,
    ) -> Result<Self> {
        let (ack_tx, ack_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let active = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (handshake_tx, handshake_rx) = oneshot::channel();

        tokio::spawn(run(
            client,
            envelope,
            pubsub_name,
            topic,
            metadata,
            dead_letter_topic,
            ack_rx,
            inbound_tx,
            active.clone(),
            cancel.clone(),
            handshake_tx,
        ));

        handshake_rx.await.map_err(|_| Error::StreamCancelled)??;

        Ok(Self {
            ack_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            active,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }

    /// True while the subscription is connected and accepting acks.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits for the next inbound message, or for `timeout` to elapse.
    /// Returns `Ok(None)` only when the subscription's background task has
    /// exited and no further messages will ever arrive; a timeout is
    /// reported as `Error::DeadlineExceeded` so callers can tell "try again"
    /// from "this subscription is done".
    pub async fn next_message(&self, timeout: Option<Duration>) -> Result<Option<InboundMessage>> {
        let mut rx = self.inbound_rx.lock().await;
        match timeout {
            Some(d) => match tokio::time::timeout(d, rx.recv()).await {
                Ok(message) => Ok(message),
                Err(_) => Err(Error::DeadlineExceeded(Some(d))),
            },
            None => Ok(rx.recv().await),
        }
    }

    async fn respond(&self, id: String, status: TopicResponse) -> Result<()> {
        if !self.is_active() {
            return Err(Error::StreamInactive);
        }
        self.ack_tx
            .send(AckRequest { id, status })
            .await
            .map_err(|_| Error::StreamInactive)
    }

    pub async fn respond_success(&self, id: impl Into<String>) -> Result<()> {
        self.respond(id.into(), TopicResponse::Success).await
    }

    pub async fn respond_retry(&self, id: impl Into<String>) -> Result<()> {
        self.respond(id.into(), TopicResponse::Retry).await
    }

    pub async fn respond_drop(&self, id: impl Into<String>) -> Result<()> {
        self.respond(id.into(), TopicResponse::Drop).await
    }

    /// Runs a loop dequeuing messages, invoking `handler`, and converting its
    /// result into the corresponding ack. A handler that returns `Err` is
    /// treated as `retry` and logged, not propagated.
    pub async fn subscribe_with_handler<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(&InboundMessage) -> std::result::Result<TopicResponse, Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            let Some(message) = self.next_message(None).await? else {
                return Ok(());
            };
            let id = message.id.clone();
            let response = match handler(&message) {
                Ok(status) => status,
                Err(err) => {
                    warn!(error = %err, id, "pub/sub handler failed, retrying delivery");
                    TopicResponse::Retry
                }
            };
            self.respond(id, response).await?;
        }
    }

    /// Marks the subscription inactive and tears down its background work.
    /// Idempotent.
    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    client: pb::runtime_client::RuntimeClient<Channel>,
    envelope: Envelope,
    pubsub_name: String,
    topic: String,
    metadata: HashMap<String, String>,
    dead_letter_topic: Option<String>,
    ack_rx: mpsc::Receiver<AckRequest>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    handshake_tx: oneshot::Sender<Result<()>>,
) {
    let ack_rx = Arc::new(tokio::sync::Mutex::new(ack_rx));
    let mut handshake_tx = Some(handshake_tx);
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(250))
        .with_max_delay(Duration::from_secs(30))
        .without_max_times()
        .build();

    loop {
        if cancel.is_cancelled() {
            active.store(false, Ordering::SeqCst);
            return;
        }

        let outcome = run_once(
            client.clone(),
            &envelope,
            &pubsub_name,
            &topic,
            &metadata,
            &dead_letter_topic,
            &ack_rx,
            &inbound_tx,
            &active,
            &cancel,
            &mut handshake_tx,
        )
        .await;

        match outcome {
            Ok(()) => {
                active.store(false, Ordering::SeqCst);
                return;
            }
            Err(err) if is_transient(&err) => {
                active.store(false, Ordering::SeqCst);
                warn!(error = %err, pubsub_name, topic, "pub/sub stream lost, reconnecting");

                if health::wait_until_ready(&envelope, RECONNECT_HEALTH_DEADLINE).await.is_err() {
                    warn!("sidecar did not become ready during reconnect wait");
                }
                if let Some(delay) = backoff.next() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => {
                active.store(false, Ordering::SeqCst);
                error!(error = %err, pubsub_name, topic, "pub/sub subscription failed permanently");
                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(Err(err));
                }
                return;
            }
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Connection(_))
        || matches!(err, Error::Sidecar { code, .. } if *code == tonic::Code::Unavailable)
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    mut client: pb::runtime_client::RuntimeClient<Channel>,
    envelope: &Envelope,
    pubsub_name: &str,
    topic: &str,
    metadata: &HashMap<String, String>,
    dead_letter_topic: &Option<String>,
    ack_rx: &Arc<tokio::sync::Mutex<mpsc::Receiver<AckRequest>>>,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    active: &Arc<AtomicBool>,
    cancel: &CancellationToken,
    handshake_tx: &mut Option<oneshot::Sender<Result<()>>>,
) -> Result<()> {
    let initial = pb::SubscribeTopicEventsRequestAlpha1 {
        subscribe_topic_events_request_type: Some(
            pb::subscribe_topic_events_request_alpha1::SubscribeTopicEventsRequestType::InitialRequest(
                pb::SubscribeTopicEventsRequestInitialAlpha1 {
                    pubsub_name: pubsub_name.to_owned(),
                    topic: topic.to_owned(),
                    metadata: metadata.clone(),
                    dead_letter_topic: dead_letter_topic.clone().unwrap_or_default(),
                },
            ),
        ),
    };

    let ack_rx_for_stream = ack_rx.clone();
    let outbound = futures_util::stream::once(async move { initial }).chain(futures_util::stream::unfold(
        ack_rx_for_stream,
        |ack_rx| async move {
            let ack = {
                let mut guard = ack_rx.lock().await;
                guard.recv().await
            }?;
            let request = pb::SubscribeTopicEventsRequestAlpha1 {
                subscribe_topic_events_request_type: Some(
                    pb::subscribe_topic_events_request_alpha1::SubscribeTopicEventsRequestType::EventProcessed(
                        pb::SubscribeTopicEventsRequestProcessedAlpha1 {
                            id: ack.id,
                            status: Some(pb::TopicEventResponse {
                                status: ack.status.into_wire() as i32,
                            }),
                        },
                    ),
                ),
            };
            Some((request, ack_rx))
        },
    ));

    let request = envelope.apply(tonic::Request::new(outbound))?;
    let mut inbound = client.subscribe_topic_events_alpha1(request).await?.into_inner();

    let first = inbound.next().await.transpose()?.ok_or_else(|| Error::Sidecar {
        code: tonic::Code::Unavailable,
        message: "stream closed before handshake".to_owned(),
        details: Vec::new(),
    })?;
    debug!(
        handshake_ok = matches!(
            first.subscribe_topic_events_response_type,
            Some(pb::subscribe_topic_events_response_alpha1::SubscribeTopicEventsResponseType::InitialResponse(_))
        ),
        pubsub_name,
        topic,
        "pub/sub handshake frame received"
    );

    active.store(true, Ordering::SeqCst);
    if let Some(tx) = handshake_tx.take() {
        let _ = tx.send(Ok(()));
    }
    info!(pubsub_name, topic, "pub/sub subscription active");

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = inbound.next() => {
                let Some(response) = next.transpose()? else { return Ok(()) };
                let Some(pb::subscribe_topic_events_response_alpha1::SubscribeTopicEventsResponseType::EventMessage(event)) =
                    response.subscribe_topic_events_response_type
                else {
                    continue;
                };
                if inbound_tx.send(event.into()).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
