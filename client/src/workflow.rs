//! Workflow control: start/get/pause/resume/terminate/purge/raise-event, with
//! status mapped from the wire string to a closed local enum.

use std::collections::HashMap;

use tonic::transport::Channel;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::pb;

/// The lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Unknown,
    Running,
    Completed,
    Failed,
    Terminated,
    Pending,
    Suspended,
}

impl From<&str> for WorkflowStatus {
    fn from(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "TERMINATED" => Self::Terminated,
            "PENDING" => Self::Pending,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Unknown,
        }
    }
}

/// A snapshot of a workflow instance's state.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub workflow_name: String,
    pub created_at: i64,
    pub last_updated_at: i64,
    pub status: WorkflowStatus,
    pub properties: HashMap<String, String>,
}

/// Typed facade over the `*WorkflowBeta1` RPCs.
#[derive(Clone)]
pub struct WorkflowClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<Channel>,
    pub(crate) envelope: Envelope,
}

impl WorkflowClient {
    pub(crate) fn new(inner: pb::runtime_client::RuntimeClient<Channel>, envelope: Envelope) -> Self {
        Self { inner, envelope }
    }

    /// Starts a new workflow instance, returning its instance id.
    pub async fn start(
        &self,
        workflow_component: &str,
        workflow_name: &str,
        instance_id: Option<String>,
        input: Vec<u8>,
        options: HashMap<String, String>,
    ) -> Result<String> {
        let request = self.envelope.apply(tonic::Request::new(pb::StartWorkflowRequest {
            instance_id: instance_id.unwrap_or_default(),
            workflow_component: workflow_component.to_owned(),
            workflow_name: workflow_name.to_owned(),
            input,
            options,
        }))?;

        let response = self.inner.clone().start_workflow_beta1(request).await?.into_inner();
        Ok(response.instance_id)
    }

    /// Reads the current state of a workflow instance.
    pub async fn get(&self, workflow_component: &str, instance_id: &str) -> Result<WorkflowInstance> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
        }))?;

        let response = self.inner.clone().get_workflow_beta1(request).await?.into_inner();

        Ok(WorkflowInstance {
            instance_id: response.instance_id,
            workflow_name: response.workflow_name,
            created_at: response.created_at,
            last_updated_at: response.last_updated_at,
            status: response.runtime_status.as_str().into(),
            properties: response.properties,
        })
    }

    pub async fn pause(&self, workflow_component: &str, instance_id: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::PauseWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
        }))?;
        self.inner.clone().pause_workflow_beta1(request).await?;
        Ok(())
    }

    pub async fn resume(&self, workflow_component: &str, instance_id: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::ResumeWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
        }))?;
        self.inner.clone().resume_workflow_beta1(request).await?;
        Ok(())
    }

    pub async fn terminate(&self, workflow_component: &str, instance_id: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::TerminateWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
        }))?;
        self.inner.clone().terminate_workflow_beta1(request).await?;
        Ok(())
    }

    /// Purges a terminal workflow instance's history. Errors if the instance
    /// does not exist.
    pub async fn purge(&self, workflow_component: &str, instance_id: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::PurgeWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
        }))?;
        self.inner.clone().purge_workflow_beta1(request).await?;
        Ok(())
    }

    pub async fn raise_event(
        &self,
        workflow_component: &str,
        instance_id: &str,
        event_name: &str,
        event_data: Vec<u8>,
    ) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::RaiseEventWorkflowRequest {
            instance_id: instance_id.to_owned(),
            workflow_component: workflow_component.to_owned(),
            event_name: event_name.to_owned(),
            event_data,
        }))?;
        self.inner.clone().raise_event_workflow_beta1(request).await?;
        Ok(())
    }
}
