use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use parking_lot::Mutex;

use crate::runtime::{ContainerSummary, Cursor, EventStream, Inspection, Runtime};

#[derive(Debug, thiserror::Error)]
#[error("fake runtime: {0}")]
pub(crate) struct FakeError(pub &'static str);

#[derive(Default)]
struct State {
    containers: Vec<ContainerSummary>,
    fail_list: bool,
    inspections: HashMap<String, Inspection>,
    fail_subscriptions: bool,
    inspect_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    cursors: Mutex<Vec<Cursor>>,
}

/// In-memory runtime with a fixed listing and inspect results.
///
/// Containers without a configured inspection fail to inspect. Subscriptions
/// either fail or never yield.
#[derive(Clone, Default)]
pub(crate) struct FakeRuntime {
    state: Arc<State>,
}

impl FakeRuntime {
    fn state_mut(&mut self) -> &mut State {
        Arc::get_mut(&mut self.state).expect("configure before cloning")
    }

    pub(crate) fn with_containers(mut self, containers: Vec<ContainerSummary>) -> Self {
        self.state_mut().containers = containers;
        self
    }

    pub(crate) fn failing_list(mut self) -> Self {
        self.state_mut().fail_list = true;
        self
    }

    pub(crate) fn with_env(self, id: &str, env: &[&str]) -> Self {
        self.with_inspection(
            id,
            Inspection {
                env: env.iter().map(|e| (*e).to_owned()).collect(),
                ..Inspection::default()
            },
        )
    }

    pub(crate) fn with_inspection(mut self, id: &str, inspection: Inspection) -> Self {
        self.state_mut()
            .inspections
            .insert(id.to_owned(), inspection);
        self
    }

    pub(crate) fn failing_subscriptions(mut self) -> Self {
        self.state_mut().fail_subscriptions = true;
        self
    }

    pub(crate) fn inspect_calls(&self) -> usize {
        self.state.inspect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.state.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cursors(&self) -> Vec<Cursor> {
        self.state.cursors.lock().clone()
    }
}

impl Runtime for FakeRuntime {
    type Error = FakeError;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, FakeError> {
        if self.state.fail_list {
            return Err(FakeError("list failed"));
        }
        Ok(self.state.containers.clone())
    }

    async fn inspect(&self, id: &str) -> Result<Inspection, FakeError> {
        self.state.inspect_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .inspections
            .get(id)
            .cloned()
            .ok_or(FakeError("no such container"))
    }

    async fn subscribe_events(&self, since: Cursor) -> Result<EventStream<FakeError>, FakeError> {
        self.state.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state.cursors.lock().push(since);
        if self.state.fail_subscriptions {
            return Err(FakeError("connection refused"));
        }
        Ok(futures::stream::pending().boxed())
    }
}
