// src/client/http.rs

//! HTTP delivery: POST the task as JSON to `<worker_base_url><worker>`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::client::{ParentResult, TaskClient, WorkerPayload, WorkerResponse};
use crate::config::model::ClientSection;
use crate::errors::{CrewError, Result};
use crate::model::Task;

/// Delivers tasks to workers via HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpPostClient {
    base_url: String,
    authorization_header: Option<String>,
    http: reqwest::Client,
}

impl HttpPostClient {
    pub fn new(
        base_url: impl Into<String>,
        authorization_header: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            authorization_header,
            http,
        })
    }

    pub fn from_config(cfg: &ClientSection) -> Result<Self> {
        Self::new(
            cfg.worker_base_url.clone(),
            cfg.authorization_header.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    /// URL a task is posted to.
    pub fn url_for(&self, task: &Task) -> String {
        format!("{}{}", self.base_url, task.worker)
    }

    async fn post_inner(&self, task: &Task, parents: &[ParentResult]) -> Result<WorkerResponse> {
        let url = self.url_for(task);
        let payload = WorkerPayload::new(task, parents);

        debug!(task = %task.id, worker = %task.worker, url = %url, parents = parents.len(), "posting task to worker");

        let mut req = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload);
        if let Some(auth) = &self.authorization_header {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        debug!(task = %task.id, status = %status, bytes = body.len(), "worker responded");

        if status != reqwest::StatusCode::OK {
            return Err(CrewError::ClientError(format!(
                "worker returned non 200 status code: {}, body: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl TaskClient for HttpPostClient {
    fn post<'a>(
        &'a self,
        task: &'a Task,
        parents: &'a [ParentResult],
    ) -> Pin<Box<dyn Future<Output = Result<WorkerResponse>> + Send + 'a>> {
        Box::pin(self.post_inner(task, parents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_base_plus_worker() {
        let client = HttpPostClient::new("http://localhost:8090/demo/", None, Duration::from_secs(1))
            .expect("client should build");
        let task = Task::new("G", "t", "worker-a");
        assert_eq!(client.url_for(&task), "http://localhost:8090/demo/worker-a");
    }
}
