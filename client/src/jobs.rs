//! Scheduling surface: named, scheduled or due-time jobs with a failure
//! policy, symmetric to the workflow control surface.

use prost_types::Any;
use tonic::transport::Channel;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::pb;

/// The action taken when a scheduled job invocation fails.
#[derive(Debug, Clone)]
pub enum FailurePolicy {
    Drop,
    Constant {
        max_retries: Option<i32>,
        interval_seconds: i64,
    },
}

impl FailurePolicy {
    fn into_wire(self) -> pb::JobFailurePolicy {
        let policy_type = match self {
            Self::Drop => pb::job_failure_policy::PolicyType::Drop(pb::JobFailurePolicyDrop {}),
            Self::Constant {
                max_retries,
                interval_seconds,
            } => pb::job_failure_policy::PolicyType::Constant(pb::JobFailurePolicyConstant {
                max_retries,
                interval_seconds,
            }),
        };
        pb::JobFailurePolicy {
            policy_type: Some(policy_type),
        }
    }
}

/// A scheduled or due-time job definition.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub schedule: Option<String>,
    pub repeats: Option<i32>,
    pub due_time: Option<String>,
    pub ttl: Option<String>,
    pub data: Option<Any>,
    pub overwrite: bool,
    pub failure_policy: Option<FailurePolicy>,
}

impl Job {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::argument_invalid("job name must not be empty"));
        }
        if self.schedule.is_none() && self.due_time.is_none() {
            return Err(Error::argument_invalid(
                "job must set at least one of schedule or due_time",
            ));
        }
        Ok(())
    }

    fn into_wire(self) -> pb::Job {
        pb::Job {
            name: self.name,
            schedule: self.schedule,
            repeats: self.repeats,
            due_time: self.due_time,
            ttl: self.ttl,
            data: self.data.or_else(|| Some(Any::default())),
            overwrite: self.overwrite,
            failure_policy: self.failure_policy.map(FailurePolicy::into_wire),
        }
    }
}

/// A job definition read back from the sidecar.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub name: String,
    pub schedule: Option<String>,
    pub repeats: Option<i32>,
    pub due_time: Option<String>,
    pub ttl: Option<String>,
    pub data: Option<Any>,
    pub overwrite: bool,
}

impl From<pb::Job> for JobInfo {
    fn from(job: pb::Job) -> Self {
        Self {
            name: job.name,
            schedule: job.schedule,
            repeats: job.repeats,
            due_time: job.due_time,
            ttl: job.ttl,
            data: job.data,
            overwrite: job.overwrite,
        }
    }
}

/// Typed facade over `ScheduleJobAlpha1`/`GetJobAlpha1`/`DeleteJobAlpha1`.
#[derive(Clone)]
pub struct JobsClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<Channel>,
    pub(crate) envelope: Envelope,
}

impl JobsClient {
    pub(crate) fn new(inner: pb::runtime_client::RuntimeClient<Channel>, envelope: Envelope) -> Self {
        Self { inner, envelope }
    }

    pub async fn schedule_job(&self, job: Job) -> Result<()> {
        job.validate()?;
        let request = self.envelope.apply(tonic::Request::new(pb::ScheduleJobRequest {
            job: Some(job.into_wire()),
        }))?;
        self.inner.clone().schedule_job_alpha1(request).await?;
        Ok(())
    }

    pub async fn get_job(&self, name: &str) -> Result<Option<JobInfo>> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetJobRequest {
            name: name.to_owned(),
        }))?;
        let response = self.inner.clone().get_job_alpha1(request).await?.into_inner();
        Ok(response.job.map(JobInfo::from))
    }

    pub async fn delete_job(&self, name: &str) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::DeleteJobRequest {
            name: name.to_owned(),
        }))?;
        self.inner.clone().delete_job_alpha1(request).await?;
        Ok(())
    }
}
