//! An in-memory `Runtime` implementation served over a Unix socket, driving
//! the real wire path (codec, streaming, metadata) against a fake backend
//! instead of a live sidecar process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures_util::{Stream, StreamExt};
use sidecar_client::pb;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::{Request, Response, Status, Streaming};

#[derive(Debug, Clone)]
struct StoredState {
    data: Vec<u8>,
    etag: String,
}

#[derive(Debug, Clone)]
struct WorkflowState {
    workflow_name: String,
    status: String,
    properties: HashMap<String, String>,
}

/// Records every `EventProcessed` ack the mock receives on a subscription,
/// so tests can assert delivery was acknowledged.
#[derive(Default)]
pub struct AckLog {
    acks: Mutex<Vec<(String, i32)>>,
}

impl AckLog {
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, i32)> {
        self.acks.lock().unwrap().clone()
    }
}

pub struct MockSidecar {
    state: Mutex<HashMap<(String, String), StoredState>>,
    locks: Mutex<HashMap<(String, String), String>>,
    configuration: HashMap<String, pb::ConfigurationItem>,
    workflows: Mutex<HashMap<String, WorkflowState>>,
    jobs: Mutex<HashMap<String, pb::Job>>,
    workflow_seq: AtomicU64,
    pub acks: std::sync::Arc<AckLog>,
    /// Metadata observed on the last `get_metadata` call, for asserting the
    /// envelope attaches its ambient headers. Kept behind an `Arc` so callers
    /// can retain a handle after the sidecar itself is moved into `spawn`.
    pub last_metadata: std::sync::Arc<Mutex<HashMap<String, String>>>,
}

impl Default for MockSidecar {
    fn default() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            configuration: HashMap::new(),
            workflows: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            workflow_seq: AtomicU64::new(0),
            acks: std::sync::Arc::new(AckLog::default()),
            last_metadata: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Capitalizes the first byte of a UTF-8 string, lower-casing the rest --
/// the same transform the reference test fixture applies to saved values.
fn mock_capitalize(data: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(data) {
        Ok(s) if !s.is_empty() => {
            let mut chars = s.chars();
            let first = chars.next().unwrap().to_uppercase().to_string();
            format!("{first}{}", chars.as_str().to_lowercase()).into_bytes()
        }
        _ => data.to_vec(),
    }
}

type RpcResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl pb::runtime_server::Runtime for MockSidecar {
    async fn invoke_service(
        &self,
        request: Request<pb::InvokeServiceRequest>,
    ) -> RpcResult<pb::InvokeResponse> {
        let message = request.into_inner().message.unwrap_or_default();
        Ok(Response::new(pb::InvokeResponse {
            data: message.data,
            content_type: message.content_type,
        }))
    }

    async fn invoke_binding(
        &self,
        request: Request<pb::InvokeBindingRequest>,
    ) -> RpcResult<pb::InvokeBindingResponse> {
        let req = request.into_inner();
        Ok(Response::new(pb::InvokeBindingResponse {
            data: req.data,
            metadata: req.metadata,
        }))
    }

    async fn publish_event(&self, _request: Request<pb::PublishEventRequest>) -> RpcResult<()> {
        Ok(Response::new(()))
    }

    async fn bulk_publish_event_alpha1(
        &self,
        _request: Request<pb::BulkPublishEventRequest>,
    ) -> RpcResult<pb::BulkPublishResponse> {
        Ok(Response::new(pb::BulkPublishResponse {
            failed_entries: Vec::new(),
            error_code: String::new(),
        }))
    }

    type SubscribeTopicEventsAlpha1Stream =
        Pin<Box<dyn Stream<Item = Result<pb::SubscribeTopicEventsResponseAlpha1, Status>> + Send + 'static>>;

    async fn subscribe_topic_events_alpha1(
        &self,
        request: Request<Streaming<pb::SubscribeTopicEventsRequestAlpha1>>,
    ) -> RpcResult<Self::SubscribeTopicEventsAlpha1Stream> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(8);
        let acks = self.acks.clone();

        tokio::spawn(async move {
            let Some(Ok(first)) = inbound.next().await else {
                return;
            };
            let Some(pb::subscribe_topic_events_request_alpha1::SubscribeTopicEventsRequestType::InitialRequest(_)) =
                first.subscribe_topic_events_request_type
            else {
                return;
            };

            if tx
                .send(Ok(pb::SubscribeTopicEventsResponseAlpha1 {
                    subscribe_topic_events_response_type: Some(
                        pb::subscribe_topic_events_response_alpha1::SubscribeTopicEventsResponseType::InitialResponse(
                            pb::SubscribeTopicEventsResponseInitialAlpha1 {},
                        ),
                    ),
                }))
                .await
                .is_err()
            {
                return;
            }

            let reader_acks = acks.clone();
            let reader = tokio::spawn(async move {
                while let Some(Ok(req)) = inbound.next().await {
                    if let Some(pb::subscribe_topic_events_request_alpha1::SubscribeTopicEventsRequestType::EventProcessed(ack)) =
                        req.subscribe_topic_events_request_type
                    {
                        let status = ack.status.map(|s| s.status).unwrap_or_default();
                        reader_acks.acks.lock().unwrap().push((ack.id, status));
                    }
                }
            });

            for (id, content_type, data) in [
                ("111", "text/plain", b"hello".to_vec()),
                ("222", "application/json", br#"{"count":2}"#.to_vec()),
            ] {
                let event = pb::TopicEventRequest {
                    id: id.to_owned(),
                    source: "mock".to_owned(),
                    r#type: "com.example.event".to_owned(),
                    spec_version: "1.0".to_owned(),
                    data_content_type: content_type.to_owned(),
                    data,
                    topic: "example".to_owned(),
                    pubsub_name: "pubsub".to_owned(),
                    extensions: HashMap::new(),
                };
                if tx
                    .send(Ok(pb::SubscribeTopicEventsResponseAlpha1 {
                        subscribe_topic_events_response_type: Some(
                            pb::subscribe_topic_events_response_alpha1::SubscribeTopicEventsResponseType::EventMessage(event),
                        ),
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = tx.send(Err(Status::unavailable("simulated connection drop"))).await;
            reader.abort();
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_state(&self, request: Request<pb::GetStateRequest>) -> RpcResult<pb::GetStateResponse> {
        let req = request.into_inner();
        let stored = self.state.lock().unwrap().get(&(req.store_name, req.key)).cloned();
        match stored {
            Some(item) => Ok(Response::new(pb::GetStateResponse {
                data: mock_capitalize(&item.data),
                etag: item.etag,
                metadata: HashMap::new(),
            })),
            None => Ok(Response::new(pb::GetStateResponse::default())),
        }
    }

    async fn get_bulk_state(
        &self,
        request: Request<pb::GetBulkStateRequest>,
    ) -> RpcResult<pb::GetBulkStateResponse> {
        let req = request.into_inner();
        let state = self.state.lock().unwrap();
        let items = req
            .keys
            .into_iter()
            .map(|key| match state.get(&(req.store_name.clone(), key.clone())) {
                Some(item) => pb::BulkStateItem {
                    key,
                    data: item.data.clone(),
                    etag: item.etag.clone(),
                    error: String::new(),
                    metadata: HashMap::new(),
                },
                None => pb::BulkStateItem {
                    key,
                    data: Vec::new(),
                    etag: String::new(),
                    error: String::new(),
                    metadata: HashMap::new(),
                },
            })
            .collect();
        Ok(Response::new(pb::GetBulkStateResponse { items }))
    }

    async fn save_state(&self, request: Request<pb::SaveStateRequest>) -> RpcResult<()> {
        let req = request.into_inner();
        let mut state = self.state.lock().unwrap();
        for item in req.states {
            let mapkey = (req.store_name.clone(), item.key.clone());
            if let Some(existing) = state.get(&mapkey)
                && !item.etag.is_empty()
                && existing.etag != item.etag
            {
                return Err(Status::aborted("etag mismatch"));
            }
            let etag = if item.etag.is_empty() {
                "ETAG_WAS_NONE".to_owned()
            } else {
                item.etag
            };
            state.insert(mapkey, StoredState { data: item.value, etag });
        }
        Ok(Response::new(()))
    }

    async fn delete_state(&self, request: Request<pb::DeleteStateRequest>) -> RpcResult<()> {
        let req = request.into_inner();
        self.state.lock().unwrap().remove(&(req.store_name, req.key));
        Ok(Response::new(()))
    }

    async fn execute_state_transaction(
        &self,
        request: Request<pb::ExecuteStateTransactionRequest>,
    ) -> RpcResult<()> {
        let req = request.into_inner();
        let mut state = self.state.lock().unwrap();
        for op in req.operations {
            let Some(item) = op.request else { continue };
            let mapkey = (req.store_name.clone(), item.key);
            if op.operation_type == "delete" {
                state.remove(&mapkey);
            } else {
                let etag = if item.etag.is_empty() {
                    "ETAG_WAS_NONE".to_owned()
                } else {
                    item.etag
                };
                state.insert(mapkey, StoredState { data: item.value, etag });
            }
        }
        Ok(Response::new(()))
    }

    async fn query_state_alpha1(
        &self,
        _request: Request<pb::QueryStateRequest>,
    ) -> RpcResult<pb::QueryStateResponse> {
        Ok(Response::new(pb::QueryStateResponse::default()))
    }

    async fn try_lock_alpha1(
        &self,
        request: Request<pb::TryLockRequestAlpha1>,
    ) -> RpcResult<pb::TryLockResponseAlpha1> {
        let req = request.into_inner();
        let mut locks = self.locks.lock().unwrap();
        let mapkey = (req.store_name, req.resource_id);
        let success = if locks.contains_key(&mapkey) {
            false
        } else {
            locks.insert(mapkey, req.lock_owner);
            true
        };
        Ok(Response::new(pb::TryLockResponseAlpha1 { success }))
    }

    async fn unlock_alpha1(
        &self,
        request: Request<pb::UnlockRequestAlpha1>,
    ) -> RpcResult<pb::UnlockResponseAlpha1> {
        let req = request.into_inner();
        let mut locks = self.locks.lock().unwrap();
        let mapkey = (req.store_name, req.resource_id);
        let status = match locks.get(&mapkey) {
            Some(owner) if *owner == req.lock_owner => {
                locks.remove(&mapkey);
                pb::UnlockResponseAlpha1Status::UnlockSuccess
            }
            Some(_) => pb::UnlockResponseAlpha1Status::UnlockLockBelongsToOthers,
            None => pb::UnlockResponseAlpha1Status::UnlockLockDoesNotExist,
        };
        Ok(Response::new(pb::UnlockResponseAlpha1 { status: status as i32 }))
    }

    async fn get_configuration_alpha1(
        &self,
        request: Request<pb::GetConfigurationRequest>,
    ) -> RpcResult<pb::GetConfigurationResponse> {
        let req = request.into_inner();
        let items = req
            .keys
            .into_iter()
            .filter_map(|k| self.configuration.get(&k).cloned().map(|v| (k, v)))
            .collect();
        Ok(Response::new(pb::GetConfigurationResponse { items }))
    }

    type SubscribeConfigurationAlpha1Stream =
        Pin<Box<dyn Stream<Item = Result<pb::SubscribeConfigurationResponse, Status>> + Send + 'static>>;

    async fn subscribe_configuration_alpha1(
        &self,
        request: Request<pb::SubscribeConfigurationRequest>,
    ) -> RpcResult<Self::SubscribeConfigurationAlpha1Stream> {
        let req = request.into_inner();
        let items: HashMap<String, pb::ConfigurationItem> = req
            .keys
            .into_iter()
            .filter_map(|k| self.configuration.get(&k).cloned().map(|v| (k, v)))
            .collect();

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(pb::SubscribeConfigurationResponse {
                    id: "sub-1".to_owned(),
                    items,
                }))
                .await;
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn unsubscribe_configuration_alpha1(
        &self,
        _request: Request<pb::UnsubscribeConfigurationRequest>,
    ) -> RpcResult<pb::UnsubscribeConfigurationResponse> {
        Ok(Response::new(pb::UnsubscribeConfigurationResponse { ok: true }))
    }

    type EncryptAlpha1Stream = Pin<Box<dyn Stream<Item = Result<pb::EncryptResponse, Status>> + Send + 'static>>;

    async fn encrypt_alpha1(
        &self,
        request: Request<Streaming<pb::EncryptRequest>>,
    ) -> RpcResult<Self::EncryptAlpha1Stream> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(Ok(req)) = inbound.next().await {
                if let Some(pb::encrypt_request::RequestType::Payload(payload)) = req.request_type {
                    let transformed = pb::StreamPayload {
                        data: payload.data.to_ascii_uppercase(),
                        seq: payload.seq,
                    };
                    if tx
                        .send(Ok(pb::EncryptResponse {
                            payload: Some(transformed),
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type DecryptAlpha1Stream = Pin<Box<dyn Stream<Item = Result<pb::DecryptResponse, Status>> + Send + 'static>>;

    async fn decrypt_alpha1(
        &self,
        request: Request<Streaming<pb::DecryptRequest>>,
    ) -> RpcResult<Self::DecryptAlpha1Stream> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(Ok(req)) = inbound.next().await {
                if let Some(pb::decrypt_request::RequestType::Payload(payload)) = req.request_type {
                    let transformed = pb::StreamPayload {
                        data: payload.data.to_ascii_lowercase(),
                        seq: payload.seq,
                    };
                    if tx
                        .send(Ok(pb::DecryptResponse {
                            payload: Some(transformed),
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn start_workflow_beta1(
        &self,
        request: Request<pb::StartWorkflowRequest>,
    ) -> RpcResult<pb::StartWorkflowResponse> {
        let req = request.into_inner();
        let instance_id = if req.instance_id.is_empty() {
            format!("wf-{}", self.workflow_seq.fetch_add(1, Ordering::SeqCst))
        } else {
            req.instance_id
        };
        self.workflows.lock().unwrap().insert(
            instance_id.clone(),
            WorkflowState {
                workflow_name: req.workflow_name,
                status: "RUNNING".to_owned(),
                properties: HashMap::new(),
            },
        );
        Ok(Response::new(pb::StartWorkflowResponse { instance_id }))
    }

    async fn get_workflow_beta1(
        &self,
        request: Request<pb::GetWorkflowRequest>,
    ) -> RpcResult<pb::GetWorkflowResponse> {
        let req = request.into_inner();
        let workflows = self.workflows.lock().unwrap();
        let Some(wf) = workflows.get(&req.instance_id) else {
            return Err(Status::not_found("workflow instance not found"));
        };
        Ok(Response::new(pb::GetWorkflowResponse {
            instance_id: req.instance_id,
            workflow_name: wf.workflow_name.clone(),
            created_at: 0,
            last_updated_at: 0,
            runtime_status: wf.status.clone(),
            properties: wf.properties.clone(),
        }))
    }

    async fn pause_workflow_beta1(&self, request: Request<pb::PauseWorkflowRequest>) -> RpcResult<()> {
        self.set_workflow_status(&request.into_inner().instance_id, "SUSPENDED")
    }

    async fn resume_workflow_beta1(&self, request: Request<pb::ResumeWorkflowRequest>) -> RpcResult<()> {
        self.set_workflow_status(&request.into_inner().instance_id, "RUNNING")
    }

    async fn terminate_workflow_beta1(&self, request: Request<pb::TerminateWorkflowRequest>) -> RpcResult<()> {
        self.set_workflow_status(&request.into_inner().instance_id, "TERMINATED")
    }

    async fn purge_workflow_beta1(&self, request: Request<pb::PurgeWorkflowRequest>) -> RpcResult<()> {
        let req = request.into_inner();
        if self.workflows.lock().unwrap().remove(&req.instance_id).is_none() {
            return Err(Status::not_found("workflow instance not found"));
        }
        Ok(Response::new(()))
    }

    async fn raise_event_workflow_beta1(&self, request: Request<pb::RaiseEventWorkflowRequest>) -> RpcResult<()> {
        let req = request.into_inner();
        let mut workflows = self.workflows.lock().unwrap();
        let Some(wf) = workflows.get_mut(&req.instance_id) else {
            return Err(Status::not_found("workflow instance not found"));
        };
        wf.properties.insert(req.event_name, "true".to_owned());
        Ok(Response::new(()))
    }

    async fn converse_alpha1(
        &self,
        request: Request<pb::ConverseRequestAlpha1>,
    ) -> RpcResult<pb::ConverseResponseAlpha1> {
        let req = request.into_inner();
        let echoed = req
            .inputs
            .iter()
            .flat_map(|i| &i.content)
            .find_map(|part| match &part.content_type {
                Some(pb::conversation_message_content_alpha1::ContentType::Text(text)) => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(Response::new(pb::ConverseResponseAlpha1 {
            context_id: req.context_id,
            outputs: vec![pb::ConversationResultAlpha1 {
                result: echoed,
                tool_calls: Vec::new(),
            }],
        }))
    }

    type ConverseStreamAlpha2Stream =
        Pin<Box<dyn Stream<Item = Result<pb::ConverseStreamResponseAlpha2, Status>> + Send + 'static>>;

    async fn converse_stream_alpha2(
        &self,
        request: Request<pb::ConverseStreamRequestAlpha2>,
    ) -> RpcResult<Self::ConverseStreamAlpha2Stream> {
        let req = request.into_inner();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(pb::ConverseStreamResponseAlpha2 {
                    context_id: req.context_id,
                    choices: vec![pb::ConverseStreamResultChoiceAlpha2 {
                        delta: Some(pb::ConverseStreamResultChunkAlpha2 {
                            content: "ok".to_owned(),
                            tool_calls: Vec::new(),
                        }),
                        finish_reason: "stop".to_owned(),
                        index: 0,
                    }],
                    usage: Some(pb::ConversationUsageAlpha2 {
                        prompt_tokens: 1,
                        completion_tokens: 1,
                        total_tokens: 2,
                    }),
                }))
                .await;
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn schedule_job_alpha1(
        &self,
        request: Request<pb::ScheduleJobRequest>,
    ) -> RpcResult<pb::ScheduleJobResponse> {
        let req = request.into_inner();
        if let Some(job) = req.job {
            self.jobs.lock().unwrap().insert(job.name.clone(), job);
        }
        Ok(Response::new(pb::ScheduleJobResponse {}))
    }

    async fn get_job_alpha1(&self, request: Request<pb::GetJobRequest>) -> RpcResult<pb::GetJobResponse> {
        let req = request.into_inner();
        let job = self.jobs.lock().unwrap().get(&req.name).cloned();
        Ok(Response::new(pb::GetJobResponse { job }))
    }

    async fn delete_job_alpha1(&self, request: Request<pb::DeleteJobRequest>) -> RpcResult<()> {
        self.jobs.lock().unwrap().remove(&request.into_inner().name);
        Ok(Response::new(()))
    }

    async fn get_metadata(&self, request: Request<pb::GetMetadataRequest>) -> RpcResult<pb::GetMetadataResponse> {
        let mut captured = HashMap::new();
        for key in ["dapr-api-token", "user-agent"] {
            if let Some(value) = request.metadata().get(key).and_then(|v| v.to_str().ok()) {
                captured.insert(key.to_owned(), value.to_owned());
            }
        }
        *self.last_metadata.lock().unwrap() = captured;


        Ok(Response::new(pb::GetMetadataResponse {
            id: "mock-sidecar".to_owned(),
            registered_components: Vec::new(),
            extended_metadata: HashMap::new(),
        }))
    }

    async fn set_metadata(&self, _request: Request<pb::SetMetadataRequest>) -> RpcResult<()> {
        Ok(Response::new(()))
    }

    async fn shutdown(&self, _request: Request<pb::ShutdownRequest>) -> RpcResult<()> {
        Ok(Response::new(()))
    }
}

impl MockSidecar {
    #[must_use]
    pub fn with_configuration(mut self, key: impl Into<String>, value: &str, version: &str) -> Self {
        self.configuration.insert(
            key.into(),
            pb::ConfigurationItem {
                value: value.to_owned(),
                version: version.to_owned(),
                metadata: HashMap::new(),
            },
        );
        self
    }

    fn set_workflow_status(&self, instance_id: &str, status: &str) -> RpcResult<()> {
        let mut workflows = self.workflows.lock().unwrap();
        let Some(wf) = workflows.get_mut(instance_id) else {
            return Err(Status::not_found("workflow instance not found"));
        };
        wf.status = status.to_owned();
        Ok(Response::new(()))
    }
}

/// Serves `sidecar` on a fresh Unix socket under a temporary directory,
/// returning the socket path once the listener is bound.
pub async fn spawn(sidecar: MockSidecar) -> PathBuf {
    let dir = tempfile::tempdir().expect("create temp dir for mock sidecar socket");
    let path = dir.path().join("sidecar.sock");
    let listener = UnixListener::bind(&path).expect("bind mock sidecar socket");

    // Leak the tempdir so the socket file outlives this function; tests run
    // in short-lived processes where this is an acceptable tradeoff.
    std::mem::forget(dir);

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(pb::runtime_server::RuntimeServer::new(sidecar))
            .serve_with_incoming(UnixListenerStream::new(listener))
            .await
            .expect("mock sidecar server failed");
    });

    path
}
