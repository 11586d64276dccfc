//! The agent task queue.
//!
//! Tasks are enqueued from the channel dispatch context and drained by an
//! independent polling loop, so the queue is an explicit concurrency
//! boundary: mutex-protected, FIFO, and bounded so a stalled consumer
//! shows up as back-pressure instead of unbounded memory growth.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default queue bound.
pub const DEFAULT_TASK_CAPACITY: usize = 1024;

/// One unit of work for an agent: the opaque bytes a command's `build`
/// step produced, addressed to an agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    pub agent_id: String,
    pub data: Vec<u8>,
}

/// The queue refused a task because it is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("task queue full ({capacity} tasks)")]
pub struct TaskQueueFull {
    pub capacity: usize,
}

/// Bounded FIFO queue of agent tasks. Single consumer, no priority,
/// no expiry.
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<AgentTask>>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Appends a task, failing when the queue is at capacity.
    pub fn push(&self, task: AgentTask) -> Result<(), TaskQueueFull> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.len() >= self.capacity {
            return Err(TaskQueueFull {
                capacity: self.capacity,
            });
        }
        tasks.push_back(task);
        Ok(())
    }

    /// Pops the oldest task, if any.
    pub fn pop(&self) -> Option<AgentTask> {
        self.tasks.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_CAPACITY)
    }
}
