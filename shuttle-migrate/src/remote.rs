//! Client side of the worker agent's HTTP API.

use std::time::Duration;

use serde::de::DeserializeOwned;

use shuttle_core::api::{
    NodeStatus, RunTaskRequest, RunTaskResponse, SyncRequest, TerminateTaskRequest,
    TerminateTaskResponse,
};
use shuttle_core::{NodeAddress, ShuttleConfig, TaskName};

use crate::error::RemoteError;

/// A worker node able to run migrated tasks.
pub trait RemoteNode: Send + Sync {
    fn address(&self) -> &NodeAddress;

    /// Ask the node to start `task` against the synchronized files.
    fn launch_task(&self, task: &TaskName) -> Result<RunTaskResponse, RemoteError>;

    fn health_check(&self) -> Result<NodeStatus, RemoteError>;

    /// Tell the node that the blob `key` changed so it pulls it now.
    fn notify_changed(&self, key: &str) -> Result<(), RemoteError>;

    /// Stop tasks the node launched earlier.
    fn terminate_task(
        &self,
        request: &TerminateTaskRequest,
    ) -> Result<TerminateTaskResponse, RemoteError>;
}

/// [`RemoteNode`] over the agent's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemoteNode {
    address: NodeAddress,
    base_url: String,
    agent: ureq::Agent,
    status_timeout: Duration,
    launch_timeout: Duration,
}

impl HttpRemoteNode {
    pub fn new(address: NodeAddress, default_port: u16) -> Self {
        let base_url = address.base_url(default_port);
        Self {
            address,
            base_url,
            agent: ureq::AgentBuilder::new().build(),
            status_timeout: Duration::from_secs(5),
            launch_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(address: NodeAddress, config: &ShuttleConfig) -> Self {
        Self::new(address, config.node.port).with_timeouts(
            Duration::from_secs(config.timeouts.status_secs),
            Duration::from_secs(config.timeouts.launch_secs),
        )
    }

    pub fn with_timeouts(mut self, status: Duration, launch: Duration) -> Self {
        self.status_timeout = status;
        self.launch_timeout = launch;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    fn decode<T: DeserializeOwned>(url: &str, response: ureq::Response) -> Result<T, RemoteError> {
        response
            .into_json::<T>()
            .map_err(|e| RemoteError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

impl RemoteNode for HttpRemoteNode {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    fn launch_task(&self, task: &TaskName) -> Result<RunTaskResponse, RemoteError> {
        let url = self.url("/run_task");
        tracing::info!(%url, %task, "requesting remote launch");
        let response = self
            .agent
            .post(&url)
            .timeout(self.launch_timeout)
            .send_json(RunTaskRequest {
                task: task.0.clone(),
            })
            .map_err(|e| classify(&url, e))?;
        Self::decode(&url, response)
    }

    fn health_check(&self) -> Result<NodeStatus, RemoteError> {
        let url = self.url("/status");
        let response = self
            .agent
            .get(&url)
            .timeout(self.status_timeout)
            .call()
            .map_err(|e| classify(&url, e))?;
        Self::decode(&url, response)
    }

    fn notify_changed(&self, key: &str) -> Result<(), RemoteError> {
        let url = self.url("/sync");
        self.agent
            .post(&url)
            .timeout(self.status_timeout)
            .send_json(SyncRequest {
                file: Some(key.to_string()),
            })
            .map_err(|e| classify(&url, e))?;
        tracing::debug!(%url, key, "peer notified");
        Ok(())
    }

    fn terminate_task(
        &self,
        request: &TerminateTaskRequest,
    ) -> Result<TerminateTaskResponse, RemoteError> {
        let url = self.url("/terminate_task");
        tracing::info!(%url, task = ?request.task, pid = ?request.pid, "requesting remote stop");
        let response = self
            .agent
            .post(&url)
            .timeout(self.launch_timeout)
            .send_json(request)
            .map_err(|e| classify(&url, e))?;
        Self::decode(&url, response)
    }
}

fn classify(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => RemoteError::Status {
            url: url.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .is_some_and(|io| {
                    matches!(
                        io.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    )
                });
            if timed_out {
                RemoteError::Timeout {
                    url: url.to_string(),
                }
            } else {
                RemoteError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                }
            }
        }
    }
}
