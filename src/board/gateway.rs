//! Remote gateway: translates board operations into calls against the
//! remote todo resource and back into [`Task`] rows.
//!
//! No state, no retries. Any non-success status is a hard failure for the
//! call that produced it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Task, TaskId, TaskPatch};

/// Which remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Create,
    Update(TaskId),
    Remove(TaskId),
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Create => f.write_str("create"),
            Self::Update(id) => write!(f, "update #{id}"),
            Self::Remove(id) => write!(f, "delete #{id}"),
        }
    }
}

/// A remote operation failed.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{operation} failed: server returned {status}")]
    Status {
        operation: Operation,
        status: StatusCode,
    },
    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} failed: unexpected response body: {reason}")]
    Decode { operation: Operation, reason: String },
}

impl GatewayError {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Status { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Decode { operation, .. } => *operation,
        }
    }
}

/// Outcome of a remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Removal {
    #[serde(rename = "isDeleted")]
    pub removed: bool,
    pub id: TaskId,
}

/// The remote task store, as the board sees it.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list(&self) -> Result<Vec<Task>, GatewayError>;
    async fn create(&self, title: &str, done: bool) -> Result<Task, GatewayError>;
    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, GatewayError>;
    async fn remove(&self, id: TaskId) -> Result<Removal, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct TodoList {
    todos: Vec<Task>,
}

#[derive(Debug, Serialize)]
struct NewTodo<'a> {
    todo: &'a str,
    completed: bool,
    #[serde(rename = "userId")]
    user_id: i64,
}

/// Update body: only the supplied fields are sent.
#[derive(Debug, Default, Serialize)]
struct TodoPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    todo: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<bool>,
}

fn patch_body(patch: &TaskPatch) -> TodoPatch<'_> {
    TodoPatch {
        todo: patch.title.as_deref(),
        completed: patch.status.map(|s| s.is_done()),
    }
}

/// Join a base URL and a path without doubling or dropping slashes.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// HTTP implementation against a `/todos`-shaped REST resource.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    user_id: i64,
}

impl HttpGateway {
    /// `timeout` of `None` leaves calls unbounded.
    pub fn new(base_url: impl Into<String>, user_id: i64, timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
            user_id,
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        tracing::debug!(%operation, "remote call");
        let response = request
            .send()
            .await
            .map_err(|source| GatewayError::Transport { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status { operation, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| GatewayError::Transport { operation, source })?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::Decode {
            operation,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let list: TodoList = self
            .send(Operation::List, self.client.get(self.url("")))
            .await?;
        Ok(list.todos)
    }

    async fn create(&self, title: &str, done: bool) -> Result<Task, GatewayError> {
        let body = NewTodo {
            todo: title,
            completed: done,
            user_id: self.user_id,
        };
        self.send(Operation::Create, self.client.post(self.url("add")).json(&body))
            .await
    }

    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, GatewayError> {
        let request = self
            .client
            .put(self.url(&id.to_string()))
            .json(&patch_body(patch));
        self.send(Operation::Update(id), request).await
    }

    async fn remove(&self, id: TaskId) -> Result<Removal, GatewayError> {
        self.send(Operation::Remove(id), self.client.delete(self.url(&id.to_string())))
            .await
    }
}
