//! Hierarchical result tree.
//!
//! Every test step runs inside a [`ResultNode`]. A node reports its own
//! outcomes locally and, once its body finishes, merges its counters and
//! status into its parent in a single locked region.

use std::fmt;
use std::future::Future;
use std::ops::Index;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::status::Status;

/// Number of outcomes recorded per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts([usize; Status::COUNT]);

impl StatusCounts {
    /// Creates zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self([0; Status::COUNT])
    }

    /// Count for one status.
    #[must_use]
    pub const fn get(&self, status: Status) -> usize {
        self.0[status.index()]
    }

    /// Adds one outcome.
    pub fn increment(&mut self, status: Status) {
        self.0[status.index()] += 1;
    }

    /// Adds every counter of `other`.
    pub fn add(&mut self, other: &Self) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0) {
            *mine += theirs;
        }
    }

    /// Sum over all statuses.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    /// Iterates `(status, count)` pairs, least severe first.
    pub fn iter(&self) -> impl Iterator<Item = (Status, usize)> + '_ {
        Status::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}

impl Index<Status> for StatusCounts {
    type Output = usize;

    fn index(&self, status: Status) -> &usize {
        &self.0[status.index()]
    }
}

impl Serialize for StatusCounts {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.iter().map(|(s, n)| (s.as_str(), n)))
    }
}

#[derive(Debug, Default)]
struct NodeState {
    status: Status,
    counts: StatusCounts,
    children: Vec<Arc<ResultNode>>,
    errors: Vec<String>,
    output: Vec<String>,
    stopped: Option<DateTime<Utc>>,
}

/// One test step in the result tree.
#[derive(Debug)]
pub struct ResultNode {
    name: String,
    started: DateTime<Utc>,
    state: Mutex<NodeState>,
}

impl ResultNode {
    fn create(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            started: Utc::now(),
            state: Mutex::new(NodeState::default()),
        })
    }

    /// Creates a detached root node.
    ///
    /// Call [`ResultNode::finish`] once everything below it has run.
    #[must_use]
    pub fn root(name: impl Into<String>) -> Arc<Self> {
        Self::create(name.into())
    }

    /// Runs `body` inside a new node linked under `parent`, or as a root.
    ///
    /// An `Err` from `body` is an engine malfunction: it escalates the node
    /// to [`Status::Error`] and is recorded before being handed back. The
    /// node is stamped and merged into `parent` whatever the outcome.
    pub async fn child_run<F, Fut, E>(
        name: impl Into<String>,
        parent: Option<&Arc<Self>>,
        body: F,
    ) -> (Arc<Self>, Result<(), E>)
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let node = Self::create(name.into());
        let result = body(Arc::clone(&node)).await;

        if let Err(err) = &result {
            node.error(err);
        }
        node.finish();

        if let Some(parent) = parent {
            parent.adopt(Arc::clone(&node));
        }
        (node, result)
    }

    /// Runs `body` in a child of `self`; see [`ResultNode::child_run`].
    ///
    /// # Errors
    ///
    /// Returns whatever `body` returned.
    pub async fn run_child<F, Fut, E>(self: &Arc<Self>, name: impl Into<String>, body: F) -> Result<(), E>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        Self::child_run(name, Some(self), body).await.1
    }

    fn adopt(&self, child: Arc<Self>) {
        let (child_status, child_counts) = {
            let state = child.state.lock();
            (state.status, state.counts)
        };

        let mut state = self.state.lock();
        state.counts.add(&child_counts);
        state.status = state.status.merge(child_status);
        state.children.push(child);
    }

    fn report(&self, status: Status, message: Option<String>) {
        let mut state = self.state.lock();
        state.counts.increment(status);
        state.status = state.status.merge(status);
        if let Some(message) = message {
            if status.is_failure() {
                state.errors.push(message);
            } else {
                state.output.push(message);
            }
        }
    }

    /// Records a pass.
    pub fn pass(&self) {
        self.report(Status::Pass, None);
    }

    /// Records a protocol failure.
    pub fn fail(&self, err: impl fmt::Display) {
        self.report(Status::Fail, Some(err.to_string()));
    }

    /// Records an unsatisfied precondition.
    pub fn skip(&self, reason: impl fmt::Display) {
        self.report(Status::Skip, Some(reason.to_string()));
    }

    /// Records an operation excluded by configuration.
    pub fn disabled(&self, reason: impl fmt::Display) {
        self.report(Status::Disabled, Some(reason.to_string()));
    }

    /// Records an engine error.
    pub fn error(&self, err: impl fmt::Display) {
        self.report(Status::Error, Some(err.to_string()));
    }

    /// Appends a line of diagnostic output without changing the status.
    pub fn log(&self, line: impl Into<String>) {
        self.state.lock().output.push(line.into());
    }

    /// Stamps the stop time. Later calls keep the first stamp.
    pub fn finish(&self) {
        self.state.lock().stopped.get_or_insert_with(Utc::now);
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Current counters.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        self.state.lock().counts
    }

    /// Children in completion order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.state.lock().children.clone()
    }

    /// First child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<Arc<Self>> {
        self.state
            .lock()
            .children
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Recorded failures and errors.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    /// Recorded skip reasons and diagnostic lines.
    #[must_use]
    pub fn output(&self) -> Vec<String> {
        self.state.lock().output.clone()
    }

    /// When the node was created.
    #[must_use]
    pub const fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// When the node finished, if it has.
    #[must_use]
    pub fn stopped(&self) -> Option<DateTime<Utc>> {
        self.state.lock().stopped
    }

    /// Elapsed time between start and stop.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.stopped().map(|stop| stop - self.started)
    }
}
