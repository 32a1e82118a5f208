use crate::adapters::{ReqwestClient, TokioTimeProvider, WorkerNotifier};
use crate::pages::PendingReplies;
use crate::store::WorkerStore;
use crate::worker::Worker;

use std::sync::Arc;

/// Shared router state, generic over the same ports as the worker so
/// router tests run against the fakes.
pub struct WorkerState<S, C, T, N> {
    pub worker: Arc<Worker<S, C, T, N>>,
    pub replies: Arc<PendingReplies>,
}

impl<S, C, T, N> WorkerState<S, C, T, N> {
    pub fn new(worker: Arc<Worker<S, C, T, N>>) -> Self {
        Self {
            worker,
            replies: Arc::new(PendingReplies::default()),
        }
    }
}

impl<S, C, T, N> Clone for WorkerState<S, C, T, N> {
    fn clone(&self) -> Self {
        Self {
            worker: Arc::clone(&self.worker),
            replies: Arc::clone(&self.replies),
        }
    }
}

pub type AppState = WorkerState<WorkerStore, ReqwestClient, TokioTimeProvider, WorkerNotifier>;
