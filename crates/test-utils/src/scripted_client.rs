#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use taskcrew::client::{ParentResult, TaskClient, WorkerResponse};
use taskcrew::errors::{CrewError, Result};
use taskcrew::model::Task;

/// What the fake worker does for one post.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this response (which may carry a worker error).
    Respond(WorkerResponse),
    /// Fail at the transport level.
    Transport(String),
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Post {
    pub task_id: String,
    pub task_name: String,
    pub worker: String,
    pub input: Value,
    pub parents: Vec<ParentResult>,
}

/// A `TaskClient` that:
/// - records every post
/// - answers from per-task-name scripts, falling back to a successful,
///   empty response
///
/// A script's replies are used in order; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    posts: Mutex<Vec<Post>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every post take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue `reply` for tasks named `name`.
    pub fn on(self, name: &str, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn respond(self, name: &str, response: WorkerResponse) -> Self {
        self.on(name, Reply::Respond(response))
    }

    pub fn fail(self, name: &str, error: &str) -> Self {
        self.respond(name, WorkerResponse::failed(error))
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posted_names(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.task_name).collect()
    }

    pub fn count_for(&self, name: &str) -> usize {
        self.posts().iter().filter(|p| p.task_name == name).count()
    }

    fn next_reply(&self, name: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::Respond(WorkerResponse::output(Value::Null)),
        }
    }
}

impl TaskClient for ScriptedClient {
    fn post<'a>(
        &'a self,
        task: &'a Task,
        parents: &'a [ParentResult],
    ) -> Pin<Box<dyn Future<Output = Result<WorkerResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.posts.lock().unwrap().push(Post {
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                worker: task.worker.clone(),
                input: task.input.clone(),
                parents: parents.to_vec(),
            });
            tracing::debug!(task = %task.id, name = %task.name, "scripted post");

            let reply = self.next_reply(&task.name);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match reply {
                Reply::Respond(response) => Ok(response),
                Reply::Transport(msg) => Err(CrewError::ClientError(msg)),
            }
        })
    }
}
