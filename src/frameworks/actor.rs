//! Polling worker pool for persisted pending work.
//!
//! An [`ActorModel`] says where pending directives come from and how one is
//! processed; [`start`] runs it on a fixed number of workers sharing one pool of
//! loaded directives.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frameworks::context::StorageReady;

/// Unit of pending work
pub(crate) trait Directive: Clone + Send + Sync + Debug + 'static {
    fn id(&self) -> Uuid;
}

/// Why processing a directive did not produce an outcome
#[derive(Debug, Error)]
pub(crate) enum ProcessingError<E: Error + 'static> {
    #[error(transparent)]
    Failed(E),

    #[error("processing panicked: {0}")]
    Panicked(String),
}

/// A queue of persisted work processed by a pool of workers
#[async_trait]
pub(crate) trait ActorModel: Send + Sync + Debug + 'static {
    type Directive: Directive;

    /// Result of processing one directive
    type Outcome: Send + Debug + 'static;

    type Error: Error + Send + Sync + 'static;

    /// Number of concurrently processing workers
    fn num_workers(&self) -> usize;

    /// Minimum time between two loads of pending directives
    fn polling_delay(&self) -> Duration;

    /// Currently pending directives
    async fn load_messages(&self) -> Result<Vec<Self::Directive>, Self::Error>;

    /// Perform the side effect of one directive.
    ///
    /// Must tolerate being re-invoked for a directive whose previous attempt failed.
    async fn process_message(&self, directive: Self::Directive) -> Result<Self::Outcome, Self::Error>;

    fn on_message_success(&self, outcome: &Self::Outcome);

    fn on_message_failure(
        &self,
        directive: &Self::Directive,
        error: &ProcessingError<Self::Error>,
    );
}

/// Directives loaded but not yet finished, shared by all workers of one actor
#[derive(Debug)]
struct PendingPool<D> {
    queue: VecDeque<D>,
    /// Ids queued or being processed; a reload never enqueues these again
    active: HashSet<Uuid>,
    next_poll_at: Instant,
}

impl<D: Directive> PendingPool<D> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: HashSet::new(),
            next_poll_at: Instant::now(),
        }
    }

    fn enqueue(&mut self, directives: Vec<D>) -> usize {
        let mut added = 0;
        for directive in directives {
            if self.active.insert(directive.id()) {
                self.queue.push_back(directive);
                added += 1;
            }
        }
        added
    }
}

/// Start the workers of `actor` once storage is ready.
///
/// Workers run until their handles are aborted.
pub(crate) fn start<A: ActorModel>(actor: Arc<A>, ready: StorageReady) -> Vec<JoinHandle<()>> {
    let pool = Arc::new(Mutex::new(PendingPool::<A::Directive>::new()));

    (0..actor.num_workers().max(1))
        .map(|worker| {
            let actor = Arc::clone(&actor);
            let pool = Arc::clone(&pool);
            let ready = ready.clone();
            tokio::spawn(async move {
                ready.wait().await;
                debug!(worker, "Worker started");
                worker_loop(actor, pool).await;
            })
        })
        .collect()
}

async fn worker_loop<A: ActorModel>(actor: Arc<A>, pool: Arc<Mutex<PendingPool<A::Directive>>>) {
    loop {
        match next_directive(&actor, &pool).await {
            Some(directive) => {
                let id = directive.id();
                process_one(&actor, directive).await;
                pool.lock().await.active.remove(&id);
            }
            None => sleep(actor.polling_delay()).await,
        }
    }
}

/// Take the next queued directive, reloading from storage when the queue is empty
/// and the polling delay has passed.
///
/// The pool is unlocked while loading; moving `next_poll_at` first keeps the other
/// workers from starting a second load.
async fn next_directive<A: ActorModel>(
    actor: &Arc<A>,
    pool: &Mutex<PendingPool<A::Directive>>,
) -> Option<A::Directive> {
    {
        let mut pool = pool.lock().await;
        if let Some(directive) = pool.queue.pop_front() {
            return Some(directive);
        }

        let now = Instant::now();
        if now < pool.next_poll_at {
            return None;
        }
        pool.next_poll_at = now + actor.polling_delay();
    }

    let loaded = actor.load_messages().await;

    let mut pool = pool.lock().await;
    match loaded {
        Ok(directives) => {
            let added = pool.enqueue(directives);
            if added > 0 {
                info!(added, "Loaded pending directives");
            }
        }
        Err(e) => warn!(error = %e, "Failed to load pending directives"),
    }

    pool.queue.pop_front()
}

/// Process one directive on its own task so a panic is contained to it
async fn process_one<A: ActorModel>(actor: &Arc<A>, directive: A::Directive) {
    let handle = tokio::spawn({
        let actor = Arc::clone(actor);
        let directive = directive.clone();
        async move { actor.process_message(directive).await }
    });

    match handle.await {
        Ok(Ok(outcome)) => actor.on_message_success(&outcome),
        Ok(Err(e)) => actor.on_message_failure(&directive, &ProcessingError::Failed(e)),
        Err(e) => actor.on_message_failure(&directive, &ProcessingError::Panicked(e.to_string())),
    }
}
