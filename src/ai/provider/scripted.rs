//! Scripted agent for tests: replays queued replies per task kind.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{AgentOutput, AgentRequest, AgentRunner};
use crate::types::{DeckError, Result, TaskKind};

/// One queued reply
#[derive(Debug, Clone)]
pub enum Reply {
    Output(AgentOutput),
    /// The agent could not be started at all
    SpawnError(String),
}

impl Reply {
    pub fn text(stdout: &str) -> Self {
        Self::Output(AgentOutput::success(stdout))
    }

    pub fn empty() -> Self {
        Self::Output(AgentOutput::success(""))
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Self::Output(AgentOutput::failure(code, stderr))
    }
}

/// Replies are consumed in order per task kind. When a queue runs dry the
/// last reply of that kind is repeated; kinds never scripted get an empty
/// answer.
#[derive(Default)]
pub struct ScriptedAgent {
    queues: Mutex<HashMap<TaskKind, VecDeque<Reply>>>,
    last: Mutex<HashMap<TaskKind, Reply>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: TaskKind, reply: Reply) -> &Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(task).or_default().push_back(reply);
        }
        self
    }

    pub fn push_text(&self, task: TaskKind, stdout: &str) -> &Self {
        self.push(task, Reply::text(stdout))
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, task: TaskKind) -> usize {
        self.calls().iter().filter(|r| r.task == task).count()
    }

    fn next_reply(&self, task: TaskKind) -> Reply {
        let queued = self
            .queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(&task).and_then(VecDeque::pop_front));

        let mut last = self.last.lock().unwrap();
        match queued {
            Some(reply) => {
                last.insert(task, reply.clone());
                reply
            }
            None => last.get(&task).cloned().unwrap_or_else(Reply::empty),
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutput> {
        let task = request.task;
        self.calls.lock().unwrap().push(request);

        match self.next_reply(task) {
            Reply::Output(output) => Ok(output),
            Reply::SpawnError(message) => Err(DeckError::pipeline(task.as_str(), message)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Templates text with a section for every task kind
pub fn all_templates() -> String {
    TaskKind::ALL
        .iter()
        .map(|kind| format!("## [{}]\nPerform {}.\n", kind, kind))
        .collect::<Vec<_>>()
        .join("\n")
}
